use crate::calc::{self, MissingGradePolicy, RecordedGrade, SubjectResult, WeightedValue};
use crate::ipc::handlers::setup;
use crate::ipc::helpers::{
    db_conn, grade_access, require_pair, require_session, require_student, required_str,
    respond, HandlerErr, HandlerResult,
};
use crate::ipc::types::{AppState, Request};
use crate::session::GradeAccess;
use crate::store;
use rusqlite::Connection;
use serde_json::json;

pub fn grading_policy(conn: &Connection) -> Result<MissingGradePolicy, HandlerErr> {
    setup::load_grading(conn)
        .map(|g| g.missing_grade_policy)
        .map_err(|e| HandlerErr::new("db_query_failed", e.to_string()))
}

/// Final grade for one student in one subject/cohort, straight from the store.
pub fn student_subject_result(
    conn: &Connection,
    student_id: &str,
    subject_id: &str,
    promotion_id: &str,
    policy: MissingGradePolicy,
) -> Result<SubjectResult, HandlerErr> {
    let categories: Vec<calc::CategoryWeight> =
        store::list_categories(conn, subject_id, promotion_id)?
            .iter()
            .map(|c| c.as_weight())
            .collect();
    let entries: Vec<RecordedGrade> =
        store::list_entries(conn, subject_id, promotion_id, Some(student_id))?
            .iter()
            .map(|e| e.as_recorded())
            .collect();
    Ok(calc::aggregate_subject(&categories, &entries, policy))
}

fn calc_final_grade(_state: &mut AppState, req: &Request) -> HandlerResult {
    let Some(raw) = req.params.get("entries") else {
        return Err(HandlerErr::bad_params("missing entries"));
    };
    let entries: Vec<WeightedValue> = serde_json::from_value(raw.clone()).map_err(|e| {
        HandlerErr::bad_params(format!("entries must be [{{value, weight}}]: {}", e))
    })?;
    Ok(json!({ "finalGrade": calc::compute_final_grade(&entries) }))
}

fn calc_validate_weights(_state: &mut AppState, req: &Request) -> HandlerResult {
    let Some(raw) = req.params.get("weights") else {
        return Err(HandlerErr::bad_params("missing weights"));
    };
    let weights: Vec<f64> = serde_json::from_value(raw.clone())
        .map_err(|e| HandlerErr::bad_params(format!("weights must be numbers: {}", e)))?;
    let check = calc::check_weights(&weights);
    Ok(json!({
        "balanced": check.balanced,
        "total": check.total,
        "remaining": check.remaining,
    }))
}

fn calc_classify(_state: &mut AppState, req: &Request) -> HandlerResult {
    let Some(final_grade) = req.params.get("finalGrade").and_then(|v| v.as_f64()) else {
        return Err(HandlerErr::bad_params("finalGrade must be a number"));
    };
    let Some(recorded) = req.params.get("recordedEntries").and_then(|v| v.as_u64()) else {
        return Err(HandlerErr::bad_params(
            "recordedEntries must be a non-negative integer",
        ));
    };
    let status = calc::classify_status(final_grade, recorded as usize);
    Ok(json!({ "status": status.as_str() }))
}

fn calc_student_subject(state: &mut AppState, req: &Request) -> HandlerResult {
    let session = require_session(req)?;
    let conn = db_conn(state)?;
    let student_id = required_str(req, "studentId")?;
    let subject_id = required_str(req, "subjectId")?;
    let promotion_id = required_str(req, "promotionId")?;
    let subject = require_pair(conn, &subject_id, &promotion_id)?;

    match grade_access(conn, session, &subject_id, &promotion_id)? {
        GradeAccess::Manage => {}
        GradeAccess::ReadOwn if student_id == session.user_id => {}
        GradeAccess::ReadOwn | GradeAccess::None => {
            return Err(HandlerErr::new(
                "forbidden",
                "students may only read their own grades",
            ))
        }
    }
    let student = require_student(conn, &student_id)?;
    if student.promotion_id.as_deref() != Some(promotion_id.as_str()) {
        return Err(HandlerErr::bad_params("student is not enrolled in this promotion"));
    }

    let policy = grading_policy(conn)?;
    let result = student_subject_result(conn, &student_id, &subject_id, &promotion_id, policy)?;
    Ok(json!({
        "student": { "id": student.id, "displayName": student.display_name() },
        "subject": subject,
        "result": result,
    }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let result = match req.method.as_str() {
        "calc.finalGrade" => calc_final_grade(state, req),
        "calc.validateWeights" => calc_validate_weights(state, req),
        "calc.classify" => calc_classify(state, req),
        "calc.studentSubject" => calc_student_subject(state, req),
        _ => return None,
    };
    Some(respond(req, result))
}
