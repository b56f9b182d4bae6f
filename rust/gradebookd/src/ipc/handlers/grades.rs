use crate::ipc::handlers::categories::active_weight_check;
use crate::ipc::helpers::{
    db_conn, grade_access, optional_str, parse_grade_value, require_manage, require_pair,
    require_session, require_student, required_str, respond, HandlerErr, HandlerResult,
};
use crate::ipc::types::{AppState, Request};
use crate::session::GradeAccess;
use crate::store::{self, EntryWrite, GradeCategory, UpsertOutcome};
use rusqlite::Connection;
use serde_json::json;
use std::collections::{HashMap, HashSet};
use tracing::info;

const BULK_UPSERT_MAX_EDITS: usize = 5000;

fn grades_list(state: &mut AppState, req: &Request) -> HandlerResult {
    let session = require_session(req)?;
    let conn = db_conn(state)?;
    let subject_id = required_str(req, "subjectId")?;
    let promotion_id = required_str(req, "promotionId")?;
    let requested_student = optional_str(req, "studentId")?;
    require_pair(conn, &subject_id, &promotion_id)?;

    let student_filter = match grade_access(conn, session, &subject_id, &promotion_id)? {
        GradeAccess::Manage => requested_student,
        GradeAccess::ReadOwn => match requested_student {
            Some(sid) if sid != session.user_id => {
                return Err(HandlerErr::new(
                    "forbidden",
                    "students may only read their own grades",
                ))
            }
            _ => Some(session.user_id.clone()),
        },
        GradeAccess::None => return Err(HandlerErr::new("forbidden", "no access to these grades")),
    };

    let entries = store::list_entries(conn, &subject_id, &promotion_id, student_filter.as_deref())?;
    Ok(json!({ "entries": entries }))
}

/// Checks one edit against the subject/cohort its category belongs to.
fn validate_edit(
    conn: &Connection,
    raw: &serde_json::Value,
    categories: &HashMap<String, GradeCategory>,
    students_ok: &mut HashSet<String>,
    promotion_id: &str,
) -> Result<EntryWrite, HandlerErr> {
    let student_id = raw
        .get("studentId")
        .and_then(|v| v.as_str())
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .ok_or_else(|| HandlerErr::bad_params("edit missing studentId"))?
        .to_string();
    let category_id = raw
        .get("categoryId")
        .and_then(|v| v.as_str())
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .ok_or_else(|| HandlerErr::bad_params("edit missing categoryId"))?
        .to_string();
    let value = parse_grade_value(raw.get("value"), "value")?;
    // Absent keeps the stored comment; null or blank clears it.
    let comments = match raw.get("comments") {
        None => None,
        Some(v) if v.is_null() => Some(None),
        Some(v) => match v.as_str() {
            Some(s) if s.trim().is_empty() => Some(None),
            Some(s) => Some(Some(s.trim().to_string())),
            None => return Err(HandlerErr::bad_params("comments must be a string or null")),
        },
    };

    match categories.get(&category_id) {
        None => {
            return Err(
                HandlerErr::bad_params("category does not belong to this subject and promotion")
                    .with_details(json!({ "categoryId": category_id })),
            )
        }
        // Retired categories take no part in any result.
        Some(c) if !c.active => {
            return Err(HandlerErr::bad_params("category is inactive")
                .with_details(json!({ "categoryId": category_id })))
        }
        Some(_) => {}
    }
    if !students_ok.contains(&student_id) {
        let student = require_student(conn, &student_id)?;
        if student.promotion_id.as_deref() != Some(promotion_id) {
            return Err(
                HandlerErr::bad_params("student is not enrolled in this promotion")
                    .with_details(json!({ "studentId": student_id })),
            );
        }
        students_ok.insert(student_id.clone());
    }

    Ok(EntryWrite {
        student_id,
        category_id,
        value,
        comments,
    })
}

fn outcome_str(o: UpsertOutcome) -> &'static str {
    match o {
        UpsertOutcome::Created => "created",
        UpsertOutcome::Updated => "updated",
    }
}

fn categories_by_id(categories: Vec<GradeCategory>) -> HashMap<String, GradeCategory> {
    categories.into_iter().map(|c| (c.id.clone(), c)).collect()
}

fn grades_upsert(state: &mut AppState, req: &Request) -> HandlerResult {
    let session = require_session(req)?;
    let conn = db_conn(state)?;
    let category_id = required_str(req, "categoryId")?;
    let Some(cat) = store::get_category(conn, &category_id)? else {
        return Err(HandlerErr::new("not_found", "category not found")
            .with_details(json!({ "categoryId": category_id })));
    };
    require_manage(conn, session, &cat.subject_id, &cat.promotion_id)?;

    let siblings = store::list_categories(conn, &cat.subject_id, &cat.promotion_id)?;
    let check = active_weight_check(&siblings);
    let by_id = categories_by_id(siblings);
    let mut students_ok = HashSet::new();
    let write = validate_edit(conn, &req.params, &by_id, &mut students_ok, &cat.promotion_id)?;

    let outcome = store::upsert_entry(conn, &write, &session.user_id)?;
    Ok(json!({
        "outcome": outcome_str(outcome),
        "weightsBalanced": check.balanced,
    }))
}

fn grades_bulk_upsert(state: &mut AppState, req: &Request) -> HandlerResult {
    let session = require_session(req)?;
    let conn = db_conn(state)?;
    let subject_id = required_str(req, "subjectId")?;
    let promotion_id = required_str(req, "promotionId")?;
    let Some(edits) = req.params.get("edits").and_then(|v| v.as_array()) else {
        return Err(HandlerErr::bad_params("edits must be an array"));
    };
    if edits.len() > BULK_UPSERT_MAX_EDITS {
        return Err(HandlerErr::new("limit_exceeded", "too many edits").with_details(json!({
            "max": BULK_UPSERT_MAX_EDITS,
            "got": edits.len(),
        })));
    }
    require_pair(conn, &subject_id, &promotion_id)?;
    require_manage(conn, session, &subject_id, &promotion_id)?;

    let categories = store::list_categories(conn, &subject_id, &promotion_id)?;
    let check = active_weight_check(&categories);
    let by_id = categories_by_id(categories);

    // Validate everything before the first write so a bad edit leaves no trace.
    let mut students_ok = HashSet::new();
    let mut writes: Vec<EntryWrite> = Vec::with_capacity(edits.len());
    for (i, raw) in edits.iter().enumerate() {
        let write = validate_edit(conn, raw, &by_id, &mut students_ok, &promotion_id).map_err(
            |mut e| {
                let mut details = e.details.take().unwrap_or_else(|| json!({}));
                details["index"] = json!(i);
                e.with_details(details)
            },
        )?;
        writes.push(write);
    }

    let tx = conn
        .unchecked_transaction()
        .map_err(|e| HandlerErr::new("db_tx_failed", e.to_string()))?;
    let mut created = 0usize;
    let mut updated = 0usize;
    for w in &writes {
        match store::upsert_entry(&tx, w, &session.user_id)? {
            UpsertOutcome::Created => created += 1,
            UpsertOutcome::Updated => updated += 1,
        }
    }
    tx.commit()
        .map_err(|e| HandlerErr::new("db_tx_failed", e.to_string()))?;
    info!(subject = %subject_id, created, updated, "bulk grade upsert");

    Ok(json!({
        "created": created,
        "updated": updated,
        "weightsBalanced": check.balanced,
    }))
}

fn grades_delete(state: &mut AppState, req: &Request) -> HandlerResult {
    let session = require_session(req)?;
    let conn = db_conn(state)?;
    let student_id = required_str(req, "studentId")?;
    let category_id = required_str(req, "categoryId")?;
    let Some(cat) = store::get_category(conn, &category_id)? else {
        return Err(HandlerErr::new("not_found", "category not found"));
    };
    require_manage(conn, session, &cat.subject_id, &cat.promotion_id)?;

    let deleted = store::delete_entry(conn, &student_id, &category_id)?;
    Ok(json!({ "deleted": deleted }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let result = match req.method.as_str() {
        "grades.list" => grades_list(state, req),
        "grades.upsert" => grades_upsert(state, req),
        "grades.bulkUpsert" => grades_bulk_upsert(state, req),
        "grades.delete" => grades_delete(state, req),
        _ => return None,
    };
    Some(respond(req, result))
}
