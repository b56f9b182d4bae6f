use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::HashMap;

/// Category weights for one subject/cohort are expected to add up to this.
pub const WEIGHT_SUM_TARGET: f64 = 100.0;
/// Tolerance for the weight-sum check.
pub const WEIGHT_SUM_EPSILON: f64 = 0.01;

// Weights and grades are entered with a handful of decimals; anything below
// this is accumulation noise from float sums, not a real difference.
const FLOAT_NOISE_SNAP: f64 = 1e9;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct WeightedValue {
    pub value: f64,
    pub weight: f64,
}

/// Weight-normalized average `Σ(value·weight) / Σ(weight)`.
///
/// Empty input or a zero total weight yields `0.0`. Values are not
/// re-validated here; callers enforce the `[0, 100]` range on entry.
pub fn compute_final_grade(entries: &[WeightedValue]) -> f64 {
    let mut weighted_sum = 0.0_f64;
    let mut weight_total = 0.0_f64;
    for e in entries {
        weighted_sum += e.value * e.weight;
        weight_total += e.weight;
    }
    if weight_total != 0.0 {
        weighted_sum / weight_total
    } else {
        0.0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AcademicStatus {
    Incomplete,
    Excellent,
    Good,
    Satisfactory,
    Passing,
    Failing,
}

impl AcademicStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            AcademicStatus::Incomplete => "incomplete",
            AcademicStatus::Excellent => "excellent",
            AcademicStatus::Good => "good",
            AcademicStatus::Satisfactory => "satisfactory",
            AcademicStatus::Passing => "passing",
            AcademicStatus::Failing => "failing",
        }
    }
}

/// Numeric bucket only. Inclusive lower bounds, checked top-down.
///
/// The grade is snapped before comparing, so `79.99999999999999` coming out
/// of a weighted mean of all-80 grades still lands in `Good`.
pub fn status_for_grade(final_grade: f64) -> AcademicStatus {
    let final_grade = snap(final_grade);
    if final_grade >= 90.0 {
        AcademicStatus::Excellent
    } else if final_grade >= 80.0 {
        AcademicStatus::Good
    } else if final_grade >= 70.0 {
        AcademicStatus::Satisfactory
    } else if final_grade >= 60.0 {
        AcademicStatus::Passing
    } else {
        AcademicStatus::Failing
    }
}

/// A student with no recorded entries is `Incomplete` whatever the grade is;
/// a computed 0 would otherwise read as failing.
pub fn classify_status(final_grade: f64, recorded_entries: usize) -> AcademicStatus {
    if recorded_entries == 0 {
        return AcademicStatus::Incomplete;
    }
    status_for_grade(final_grade)
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WeightCheck {
    pub total: f64,
    pub remaining: f64,
    pub balanced: bool,
}

fn snap(x: f64) -> f64 {
    (x * FLOAT_NOISE_SNAP).round() / FLOAT_NOISE_SNAP
}

pub fn check_weights(weights: &[f64]) -> WeightCheck {
    let total: f64 = weights.iter().sum();
    WeightCheck {
        total: snap(total),
        remaining: snap(WEIGHT_SUM_TARGET - total),
        balanced: validate_weight_sum(weights),
    }
}

/// Advisory predicate: true iff the weights add up to 100 within 0.01.
/// Grade entry is never blocked on this.
pub fn validate_weight_sum(weights: &[f64]) -> bool {
    snap((weights.iter().sum::<f64>() - WEIGHT_SUM_TARGET).abs()) < WEIGHT_SUM_EPSILON
}

/// How categories without a recorded entry take part in the final grade.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MissingGradePolicy {
    /// Counts as 0 with the category's full weight.
    #[default]
    Zero,
    /// Dropped; the average is renormalized over graded categories.
    Exclude,
}

impl MissingGradePolicy {
    pub fn as_str(self) -> &'static str {
        match self {
            MissingGradePolicy::Zero => "zero",
            MissingGradePolicy::Exclude => "exclude",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "zero" => Some(MissingGradePolicy::Zero),
            "exclude" => Some(MissingGradePolicy::Exclude),
            _ => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct CategoryWeight {
    pub category_id: String,
    pub name: String,
    pub weight: f64,
    pub active: bool,
}

#[derive(Debug, Clone)]
pub struct RecordedGrade {
    pub category_id: String,
    pub value: f64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CategoryLine {
    pub category_id: String,
    pub name: String,
    pub weight: f64,
    pub value: Option<f64>,
    /// Share of the final grade coming from this category.
    pub contribution: f64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SubjectResult {
    pub final_grade: f64,
    pub status: AcademicStatus,
    pub policy: MissingGradePolicy,
    pub graded_categories: usize,
    pub total_categories: usize,
    pub weight_check: WeightCheck,
    pub categories: Vec<CategoryLine>,
}

/// Aggregates one student's entries for one subject/cohort.
///
/// Only active categories take part. Entries pointing at unknown or inactive
/// categories are ignored.
pub fn aggregate_subject(
    categories: &[CategoryWeight],
    entries: &[RecordedGrade],
    policy: MissingGradePolicy,
) -> SubjectResult {
    let active: Vec<&CategoryWeight> = categories.iter().filter(|c| c.active).collect();

    let mut value_by_category: HashMap<&str, f64> = HashMap::new();
    for e in entries {
        value_by_category.insert(e.category_id.as_str(), e.value);
    }

    let mut pairs: Vec<WeightedValue> = Vec::with_capacity(active.len());
    let mut graded_categories = 0usize;
    let mut lines: Vec<(Option<usize>, CategoryLine)> = Vec::with_capacity(active.len());
    for c in &active {
        let value = value_by_category.get(c.category_id.as_str()).copied();
        if value.is_some() {
            graded_categories += 1;
        }
        let pair_idx = match (value, policy) {
            (Some(v), _) => {
                pairs.push(WeightedValue {
                    value: v,
                    weight: c.weight,
                });
                Some(pairs.len() - 1)
            }
            (None, MissingGradePolicy::Zero) => {
                pairs.push(WeightedValue {
                    value: 0.0,
                    weight: c.weight,
                });
                Some(pairs.len() - 1)
            }
            (None, MissingGradePolicy::Exclude) => None,
        };
        lines.push((
            pair_idx,
            CategoryLine {
                category_id: c.category_id.clone(),
                name: c.name.clone(),
                weight: c.weight,
                value,
                contribution: 0.0,
            },
        ));
    }

    let final_grade = compute_final_grade(&pairs);
    let used_weight: f64 = pairs.iter().map(|p| p.weight).sum();
    let categories_out: Vec<CategoryLine> = lines
        .into_iter()
        .map(|(idx, mut line)| {
            if let Some(p) = idx.and_then(|i| pairs.get(i)) {
                if used_weight != 0.0 {
                    line.contribution = p.value * p.weight / used_weight;
                }
            }
            line
        })
        .collect();

    let weights: Vec<f64> = active.iter().map(|c| c.weight).collect();

    SubjectResult {
        final_grade,
        status: classify_status(final_grade, graded_categories),
        policy,
        graded_categories,
        total_categories: active.len(),
        weight_check: check_weights(&weights),
        categories: categories_out,
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusHistogram {
    pub incomplete: usize,
    pub excellent: usize,
    pub good: usize,
    pub satisfactory: usize,
    pub passing: usize,
    pub failing: usize,
}

impl StatusHistogram {
    fn bump(&mut self, status: AcademicStatus) {
        let slot = match status {
            AcademicStatus::Incomplete => &mut self.incomplete,
            AcademicStatus::Excellent => &mut self.excellent,
            AcademicStatus::Good => &mut self.good,
            AcademicStatus::Satisfactory => &mut self.satisfactory,
            AcademicStatus::Passing => &mut self.passing,
            AcademicStatus::Failing => &mut self.failing,
        };
        *slot += 1;
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ClassStats {
    pub student_count: usize,
    pub graded_count: usize,
    pub average: Option<f64>,
    pub median: Option<f64>,
    pub min: Option<f64>,
    pub max: Option<f64>,
    pub distribution: StatusHistogram,
}

fn compute_median(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(Ordering::Equal));
    let n = sorted.len();
    if n % 2 == 1 {
        Some(sorted[n / 2])
    } else {
        Some((sorted[(n / 2) - 1] + sorted[n / 2]) / 2.0)
    }
}

/// Cohort-level figures. Incomplete students are counted in the histogram
/// but left out of average/median/min/max.
pub fn class_stats(results: &[SubjectResult]) -> ClassStats {
    let mut distribution = StatusHistogram::default();
    let mut graded: Vec<f64> = Vec::new();
    for r in results {
        distribution.bump(r.status);
        if r.status != AcademicStatus::Incomplete {
            graded.push(r.final_grade);
        }
    }

    let average = if graded.is_empty() {
        None
    } else {
        Some(graded.iter().sum::<f64>() / graded.len() as f64)
    };
    let min = graded.iter().copied().reduce(f64::min);
    let max = graded.iter().copied().reduce(f64::max);

    ClassStats {
        student_count: results.len(),
        graded_count: graded.len(),
        average,
        median: compute_median(&graded),
        min,
        max,
        distribution,
    }
}

/// Half-up rounding for display, e.g. `round_display(80.125, 2) == 80.13`.
pub fn round_display(x: f64, decimals: u32) -> f64 {
    let factor = 10_f64.powi(decimals.min(6) as i32);
    ((x * factor) + 0.5).floor() / factor
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cat(id: &str, weight: f64) -> CategoryWeight {
        CategoryWeight {
            category_id: id.to_string(),
            name: id.to_uppercase(),
            weight,
            active: true,
        }
    }

    fn grade(id: &str, value: f64) -> RecordedGrade {
        RecordedGrade {
            category_id: id.to_string(),
            value,
        }
    }

    #[test]
    fn weight_sum_tolerance_absorbs_float_noise_only() {
        assert!(validate_weight_sum(&[30.0, 30.0, 40.0]));
        assert!(!validate_weight_sum(&[30.0, 30.0, 39.99]));
        assert!(validate_weight_sum(&[30.0, 30.0, 40.005]));
        assert!(!validate_weight_sum(&[]));
    }

    #[test]
    fn check_weights_reports_remaining() {
        let c = check_weights(&[40.0, 35.0]);
        assert_eq!(c.total, 75.0);
        assert_eq!(c.remaining, 25.0);
        assert!(!c.balanced);
    }

    #[test]
    fn status_thresholds_are_inclusive_lower_bounds() {
        assert_eq!(status_for_grade(100.0), AcademicStatus::Excellent);
        assert_eq!(status_for_grade(80.0), AcademicStatus::Good);
        assert_eq!(status_for_grade(79.99), AcademicStatus::Satisfactory);
        assert_eq!(status_for_grade(70.0), AcademicStatus::Satisfactory);
        assert_eq!(status_for_grade(0.0), AcademicStatus::Failing);
    }

    #[test]
    fn aggregate_zero_policy_counts_missing_as_zero() {
        let cats = vec![cat("exam", 60.0), cat("hw", 40.0)];
        let r = aggregate_subject(&cats, &[grade("exam", 90.0)], MissingGradePolicy::Zero);
        assert!((r.final_grade - 54.0).abs() < 1e-9);
        assert_eq!(r.status, AcademicStatus::Failing);
        assert_eq!(r.graded_categories, 1);
        assert_eq!(r.total_categories, 2);
        assert!(r.weight_check.balanced);
    }

    #[test]
    fn aggregate_exclude_policy_renormalizes() {
        let cats = vec![cat("exam", 60.0), cat("hw", 40.0)];
        let r = aggregate_subject(&cats, &[grade("exam", 90.0)], MissingGradePolicy::Exclude);
        assert!((r.final_grade - 90.0).abs() < 1e-9);
        assert_eq!(r.status, AcademicStatus::Excellent);
        assert_eq!(r.categories[1].value, None);
        assert_eq!(r.categories[1].contribution, 0.0);
    }

    #[test]
    fn aggregate_ignores_inactive_and_unknown_categories() {
        let mut retired = cat("quiz", 50.0);
        retired.active = false;
        let cats = vec![cat("exam", 100.0), retired];
        let r = aggregate_subject(
            &cats,
            &[grade("quiz", 10.0), grade("ghost", 10.0)],
            MissingGradePolicy::Zero,
        );
        assert_eq!(r.total_categories, 1);
        assert_eq!(r.graded_categories, 0);
        assert_eq!(r.status, AcademicStatus::Incomplete);
    }

    #[test]
    fn contributions_add_up_to_final_grade() {
        let cats = vec![cat("a", 20.0), cat("b", 30.0), cat("c", 50.0)];
        let r = aggregate_subject(
            &cats,
            &[grade("a", 75.0), grade("b", 88.0), grade("c", 61.5)],
            MissingGradePolicy::Zero,
        );
        let sum: f64 = r.categories.iter().map(|l| l.contribution).sum();
        assert!((sum - r.final_grade).abs() < 1e-9);
    }

    #[test]
    fn class_stats_skip_incomplete_for_averages() {
        let cats = vec![cat("exam", 100.0)];
        let results = vec![
            aggregate_subject(&cats, &[grade("exam", 95.0)], MissingGradePolicy::Zero),
            aggregate_subject(&cats, &[grade("exam", 65.0)], MissingGradePolicy::Zero),
            aggregate_subject(&cats, &[grade("exam", 70.0)], MissingGradePolicy::Zero),
            aggregate_subject(&cats, &[], MissingGradePolicy::Zero),
        ];
        let stats = class_stats(&results);
        assert_eq!(stats.student_count, 4);
        assert_eq!(stats.graded_count, 3);
        assert_eq!(stats.median, Some(70.0));
        assert_eq!(stats.min, Some(65.0));
        assert_eq!(stats.max, Some(95.0));
        assert!((stats.average.expect("average") - 230.0 / 3.0).abs() < 1e-9);
        assert_eq!(stats.distribution.incomplete, 1);
        assert_eq!(stats.distribution.excellent, 1);
        assert_eq!(stats.distribution.passing, 1);
        assert_eq!(stats.distribution.satisfactory, 1);
    }

    #[test]
    fn round_display_is_half_up() {
        assert_eq!(round_display(80.0, 2), 80.0);
        assert_eq!(round_display(66.666, 2), 66.67);
        assert_eq!(round_display(35.6818, 1), 35.7);
    }
}
