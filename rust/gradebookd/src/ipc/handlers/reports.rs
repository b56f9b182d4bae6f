use crate::calc::{self, ClassStats, MissingGradePolicy, RecordedGrade, SubjectResult, WeightCheck};
use crate::ipc::handlers::aggregation::{grading_policy, student_subject_result};
use crate::ipc::handlers::categories::active_weight_check;
use crate::ipc::handlers::setup;
use crate::ipc::helpers::{
    db_conn, require_manage, require_pair, require_session, require_student, required_str,
    respond, HandlerErr, HandlerResult,
};
use crate::ipc::types::{AppState, Request};
use crate::session::Role;
use crate::store::{self, Subject};
use rusqlite::Connection;
use serde::Serialize;
use serde_json::json;
use std::collections::HashMap;
use std::path::PathBuf;
use tracing::info;

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
struct StudentRow {
    student_id: String,
    display_name: String,
    final_grade: f64,
    status: calc::AcademicStatus,
    graded_categories: usize,
    total_categories: usize,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
struct SubjectSummary {
    subject: Subject,
    promotion_id: String,
    policy: MissingGradePolicy,
    weight_check: WeightCheck,
    students: Vec<StudentRow>,
    stats: ClassStats,
}

fn build_subject_summary(
    conn: &Connection,
    subject: Subject,
    promotion_id: &str,
    policy: MissingGradePolicy,
) -> Result<SubjectSummary, HandlerErr> {
    let students = store::students_in_promotion(conn, promotion_id)?;
    let categories = store::list_categories(conn, &subject.id, promotion_id)?;
    let weights: Vec<calc::CategoryWeight> = categories.iter().map(|c| c.as_weight()).collect();

    let mut by_student: HashMap<String, Vec<RecordedGrade>> = HashMap::new();
    for e in store::list_entries(conn, &subject.id, promotion_id, None)? {
        by_student
            .entry(e.student_id.clone())
            .or_default()
            .push(e.as_recorded());
    }

    let mut results: Vec<SubjectResult> = Vec::with_capacity(students.len());
    let mut rows: Vec<StudentRow> = Vec::with_capacity(students.len());
    for s in &students {
        let entries = by_student.get(&s.id).map(Vec::as_slice).unwrap_or(&[]);
        let r = calc::aggregate_subject(&weights, entries, policy);
        rows.push(StudentRow {
            student_id: s.id.clone(),
            display_name: s.display_name(),
            final_grade: r.final_grade,
            status: r.status,
            graded_categories: r.graded_categories,
            total_categories: r.total_categories,
        });
        results.push(r);
    }

    Ok(SubjectSummary {
        subject,
        promotion_id: promotion_id.to_string(),
        policy,
        weight_check: active_weight_check(&categories),
        students: rows,
        stats: calc::class_stats(&results),
    })
}

fn load_summary(state: &AppState, req: &Request) -> Result<(SubjectSummary, u32), HandlerErr> {
    let session = require_session(req)?;
    let conn = db_conn(state)?;
    let subject_id = required_str(req, "subjectId")?;
    let promotion_id = required_str(req, "promotionId")?;
    let subject = require_pair(conn, &subject_id, &promotion_id)?;
    require_manage(conn, session, &subject_id, &promotion_id)?;

    let grading = setup::load_grading(conn)
        .map_err(|e| HandlerErr::new("db_query_failed", e.to_string()))?;
    let summary = build_subject_summary(conn, subject, &promotion_id, grading.missing_grade_policy)?;
    Ok((summary, grading.display_decimals))
}

fn reports_subject_summary(state: &mut AppState, req: &Request) -> HandlerResult {
    let (summary, _) = load_summary(state, req)?;
    serde_json::to_value(&summary).map_err(|e| HandlerErr::new("internal", e.to_string()))
}

fn csv_quote(s: &str) -> String {
    if s.contains(',') || s.contains('"') || s.contains('\n') || s.contains('\r') {
        format!("\"{}\"", s.replace('"', "\"\""))
    } else {
        s.to_string()
    }
}

fn summary_csv(summary: &SubjectSummary, decimals: u32) -> String {
    let mut csv = String::from(
        "student_id,student_name,final_grade,status,graded_categories,total_categories,weights_balanced\n",
    );
    for row in &summary.students {
        csv.push_str(&format!(
            "{},{},{:.*},{},{},{},{}\n",
            csv_quote(&row.student_id),
            csv_quote(&row.display_name),
            decimals as usize,
            calc::round_display(row.final_grade, decimals),
            row.status.as_str(),
            row.graded_categories,
            row.total_categories,
            summary.weight_check.balanced
        ));
    }
    csv
}

fn reports_subject_csv(state: &mut AppState, req: &Request) -> HandlerResult {
    let out_path = required_str(req, "outPath")?;
    let (summary, decimals) = load_summary(state, req)?;
    let csv = summary_csv(&summary, decimals);

    let out = PathBuf::from(&out_path);
    if let Some(parent) = out.parent() {
        std::fs::create_dir_all(parent).map_err(|e| {
            HandlerErr::new("io_failed", e.to_string()).with_details(json!({ "path": out_path }))
        })?;
    }
    std::fs::write(&out, csv).map_err(|e| {
        HandlerErr::new("io_failed", e.to_string()).with_details(json!({ "path": out_path }))
    })?;
    info!(path = %out_path, rows = summary.students.len(), "subject csv exported");

    Ok(json!({
        "ok": true,
        "rowsExported": summary.students.len(),
        "path": out_path,
    }))
}

fn reports_student_report(state: &mut AppState, req: &Request) -> HandlerResult {
    let session = require_session(req)?;
    let conn = db_conn(state)?;
    let student_id = required_str(req, "studentId")?;
    let student = require_student(conn, &student_id)?;
    let Some(promotion_id) = student.promotion_id.clone() else {
        return Err(HandlerErr::bad_params("student has no promotion"));
    };

    let mut subjects = store::subjects_for_promotion(conn, &promotion_id)?;
    match session.role {
        Role::Admin => {}
        Role::Student => {
            if session.user_id != student.id {
                return Err(HandlerErr::new(
                    "forbidden",
                    "students may only read their own report",
                ));
            }
        }
        Role::Professor => {
            let mut kept = Vec::with_capacity(subjects.len());
            for s in subjects {
                if store::is_assigned(conn, &session.user_id, &s.id, &promotion_id)? {
                    kept.push(s);
                }
            }
            if kept.is_empty() {
                return Err(HandlerErr::new(
                    "forbidden",
                    "not assigned to any subject of this student's promotion",
                ));
            }
            subjects = kept;
        }
    }

    let policy = grading_policy(conn)?;
    let mut lines: Vec<serde_json::Value> = Vec::with_capacity(subjects.len());
    let mut graded: Vec<f64> = Vec::new();
    for s in &subjects {
        let r = student_subject_result(conn, &student.id, &s.id, &promotion_id, policy)?;
        if r.status != calc::AcademicStatus::Incomplete {
            graded.push(r.final_grade);
        }
        lines.push(json!({
            "subjectId": s.id,
            "subjectName": s.name,
            "result": r,
        }));
    }
    let overall_average = if graded.is_empty() {
        None
    } else {
        Some(graded.iter().sum::<f64>() / graded.len() as f64)
    };

    Ok(json!({
        "student": {
            "id": student.id,
            "displayName": student.display_name(),
            "promotionId": promotion_id,
        },
        "policy": policy,
        "subjects": lines,
        "overallAverage": overall_average,
    }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let result = match req.method.as_str() {
        "reports.subjectSummary" => reports_subject_summary(state, req),
        "reports.subjectCsv" => reports_subject_csv(state, req),
        "reports.studentReport" => reports_student_report(state, req),
        _ => return None,
    };
    Some(respond(req, result))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn csv_quotes_names_with_commas() {
        assert_eq!(csv_quote("Doe, Jane"), "\"Doe, Jane\"");
        assert_eq!(csv_quote("say \"hi\""), "\"say \"\"hi\"\"\"");
        assert_eq!(csv_quote("plain"), "plain");
    }
}
