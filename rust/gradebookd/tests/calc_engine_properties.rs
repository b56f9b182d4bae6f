#[path = "../src/calc.rs"]
mod calc;

use calc::{
    aggregate_subject, classify_status, compute_final_grade, validate_weight_sum, AcademicStatus,
    CategoryWeight, MissingGradePolicy, RecordedGrade, WeightedValue,
};

fn wv(value: f64, weight: f64) -> WeightedValue {
    WeightedValue { value, weight }
}

fn approx(a: f64, b: f64) -> bool {
    (a - b).abs() < 1e-9
}

#[test]
fn weight_sum_tolerance_is_one_hundredth() {
    assert!(validate_weight_sum(&[30.0, 30.0, 40.0]));
    assert!(!validate_weight_sum(&[30.0, 30.0, 39.99]));
    assert!(validate_weight_sum(&[30.0, 30.0, 40.005]));
    assert!(!validate_weight_sum(&[]));
    assert!(!validate_weight_sum(&[50.0, 60.0]));
}

#[test]
fn final_grade_of_nothing_is_zero() {
    assert_eq!(compute_final_grade(&[]), 0.0);
    assert_eq!(compute_final_grade(&[wv(80.0, 0.0)]), 0.0);
}

#[test]
fn final_grade_is_weighted_mean() {
    assert!(approx(compute_final_grade(&[wv(90.0, 50.0), wv(70.0, 50.0)]), 80.0));
    assert!(approx(compute_final_grade(&[wv(100.0, 30.0), wv(0.0, 70.0)]), 30.0));
    // Weights need not add up to 100.
    assert!(approx(compute_final_grade(&[wv(90.0, 1.0), wv(60.0, 2.0)]), 70.0));
}

#[test]
fn final_grade_stays_within_value_range() {
    let entries = [wv(12.5, 10.0), wv(99.0, 45.0), wv(63.0, 45.0)];
    let g = compute_final_grade(&entries);
    assert!((12.5..=99.0).contains(&g));
}

#[test]
fn final_grade_is_idempotent() {
    let entries = [wv(71.3, 20.0), wv(88.8, 35.0), wv(54.1, 45.0)];
    let first = compute_final_grade(&entries);
    let second = compute_final_grade(&entries);
    assert_eq!(first.to_bits(), second.to_bits());
}

#[test]
fn status_boundaries() {
    assert_eq!(classify_status(90.0, 1), AcademicStatus::Excellent);
    assert_eq!(classify_status(89.999, 1), AcademicStatus::Good);
    assert_eq!(classify_status(80.0, 3), AcademicStatus::Good);
    assert_eq!(classify_status(70.0, 3), AcademicStatus::Satisfactory);
    assert_eq!(classify_status(60.0, 1), AcademicStatus::Passing);
    assert_eq!(classify_status(59.999, 1), AcademicStatus::Failing);
    assert_eq!(classify_status(0.0, 2), AcademicStatus::Failing);
}

#[test]
fn no_entries_is_incomplete_regardless_of_grade() {
    assert_eq!(classify_status(0.0, 0), AcademicStatus::Incomplete);
    assert_eq!(classify_status(95.0, 0), AcademicStatus::Incomplete);
}

fn cat(id: &str, weight: f64) -> CategoryWeight {
    CategoryWeight {
        category_id: id.to_string(),
        name: id.to_string(),
        weight,
        active: true,
    }
}

fn rec(id: &str, value: f64) -> RecordedGrade {
    RecordedGrade {
        category_id: id.to_string(),
        value,
    }
}

#[test]
fn fully_graded_subject_matches_plain_weighted_mean_under_both_policies() {
    let cats = [cat("exam", 60.0), cat("hw", 40.0)];
    let grades = [rec("exam", 85.0), rec("hw", 95.0)];
    let zero = aggregate_subject(&cats, &grades, MissingGradePolicy::Zero);
    let exclude = aggregate_subject(&cats, &grades, MissingGradePolicy::Exclude);
    let plain = compute_final_grade(&[wv(85.0, 60.0), wv(95.0, 40.0)]);
    assert!(approx(zero.final_grade, plain));
    assert!(approx(exclude.final_grade, plain));
    assert_eq!(zero.status, AcademicStatus::Excellent);
    assert!(zero.weight_check.balanced);
}

#[test]
fn missing_category_policies_differ_only_when_something_is_missing() {
    let cats = [cat("exam", 50.0), cat("hw", 50.0)];
    let grades = [rec("exam", 80.0)];
    let zero = aggregate_subject(&cats, &grades, MissingGradePolicy::Zero);
    let exclude = aggregate_subject(&cats, &grades, MissingGradePolicy::Exclude);
    assert!(approx(zero.final_grade, 40.0));
    assert_eq!(zero.status, AcademicStatus::Failing);
    assert!(approx(exclude.final_grade, 80.0));
    assert_eq!(exclude.status, AcademicStatus::Good);
    assert_eq!(zero.graded_categories, 1);
    assert_eq!(zero.total_categories, 2);
}

#[test]
fn float_noise_does_not_drop_a_threshold_grade_into_the_next_band() {
    let cats = [cat("a", 99.16), cat("b", 0.84)];
    let grades = [rec("a", 80.0), rec("b", 80.0)];
    let r = aggregate_subject(&cats, &grades, MissingGradePolicy::Zero);
    assert!(approx(r.final_grade, 80.0));
    assert!(r.weight_check.balanced);
    assert_eq!(r.status, AcademicStatus::Good);

    let cats = [cat("a", 27.35), cat("b", 47.64), cat("c", 25.01)];
    let grades = [rec("a", 80.0), rec("b", 80.0), rec("c", 80.0)];
    let r = aggregate_subject(&cats, &grades, MissingGradePolicy::Zero);
    assert_eq!(r.status, AcademicStatus::Good);

    // A real shortfall still falls through.
    assert_eq!(classify_status(79.9999, 2), AcademicStatus::Satisfactory);
}
