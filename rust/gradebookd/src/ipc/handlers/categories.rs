use crate::calc::{self, WeightCheck};
use crate::ipc::helpers::{
    db_conn, grade_access, optional_str, parse_weight, require_manage, require_pair,
    require_session, required_str, respond, HandlerErr, HandlerResult,
};
use crate::ipc::types::{AppState, Request};
use crate::store::{self, CategoryPatch, GradeCategory, NewCategory};
use rusqlite::Connection;
use serde_json::json;
use tracing::info;

pub fn active_weight_check(categories: &[GradeCategory]) -> WeightCheck {
    let weights: Vec<f64> = categories
        .iter()
        .filter(|c| c.active)
        .map(|c| c.weight)
        .collect();
    calc::check_weights(&weights)
}

/// Advisory payload for the UI banner. Never blocks anything.
pub fn weight_warning(check: &WeightCheck) -> Option<String> {
    if check.balanced {
        None
    } else {
        Some(format!(
            "category weights add up to {}% ({}% remaining)",
            check.total, check.remaining
        ))
    }
}

fn pair_weight_check(
    conn: &Connection,
    subject_id: &str,
    promotion_id: &str,
) -> Result<serde_json::Value, HandlerErr> {
    let categories = store::list_categories(conn, subject_id, promotion_id)?;
    let check = active_weight_check(&categories);
    Ok(json!({
        "weightCheck": check,
        "warning": weight_warning(&check),
    }))
}

fn categories_list(state: &mut AppState, req: &Request) -> HandlerResult {
    let session = require_session(req)?;
    let conn = db_conn(state)?;
    let subject_id = required_str(req, "subjectId")?;
    let promotion_id = required_str(req, "promotionId")?;
    require_pair(conn, &subject_id, &promotion_id)?;
    grade_access(conn, session, &subject_id, &promotion_id)?;

    let categories = store::list_categories(conn, &subject_id, &promotion_id)?;
    let check = active_weight_check(&categories);
    Ok(json!({
        "categories": categories,
        "weightCheck": check,
        "warning": weight_warning(&check),
    }))
}

fn categories_create(state: &mut AppState, req: &Request) -> HandlerResult {
    let session = require_session(req)?;
    let conn = db_conn(state)?;
    let subject_id = required_str(req, "subjectId")?;
    let promotion_id = required_str(req, "promotionId")?;
    let name = required_str(req, "name")?;
    let description = optional_str(req, "description")?;
    let weight = parse_weight(req.params.get("weight"), "weight")?;
    require_pair(conn, &subject_id, &promotion_id)?;
    require_manage(conn, session, &subject_id, &promotion_id)?;

    let category_id = store::create_category(
        conn,
        &NewCategory {
            subject_id: &subject_id,
            promotion_id: &promotion_id,
            name: &name,
            description: description.as_deref(),
            weight,
        },
    )?;
    info!(category = %name, weight, "category created");

    let mut out = pair_weight_check(conn, &subject_id, &promotion_id)?;
    out["categoryId"] = json!(category_id);
    Ok(out)
}

fn parse_category_patch(req: &Request) -> Result<CategoryPatch, HandlerErr> {
    let Some(patch) = req.params.get("patch").and_then(|v| v.as_object()) else {
        return Err(HandlerErr::bad_params("missing/invalid patch"));
    };
    let mut out = CategoryPatch::default();
    for (k, v) in patch {
        match k.as_str() {
            "name" => {
                let Some(s) = v.as_str().map(str::trim) else {
                    return Err(HandlerErr::bad_params("patch.name must be a string"));
                };
                if s.is_empty() {
                    return Err(HandlerErr::bad_params("name must not be empty"));
                }
                out.name = Some(s.to_string());
            }
            "description" => {
                if v.is_null() {
                    out.description = Some(None);
                } else if let Some(s) = v.as_str() {
                    let t = s.trim();
                    out.description = Some(if t.is_empty() { None } else { Some(t.to_string()) });
                } else {
                    return Err(HandlerErr::bad_params(
                        "patch.description must be a string or null",
                    ));
                }
            }
            "weight" => {
                out.weight = Some(parse_weight(Some(v), "patch.weight")?);
            }
            "active" => {
                let Some(b) = v.as_bool() else {
                    return Err(HandlerErr::bad_params("patch.active must be a boolean"));
                };
                out.active = Some(b);
            }
            _ => {
                return Err(HandlerErr::bad_params(format!("unknown patch field: {}", k)))
            }
        }
    }
    if out.is_empty() {
        return Err(HandlerErr::bad_params(
            "patch must include at least one field",
        ));
    }
    Ok(out)
}

fn require_category(conn: &Connection, category_id: &str) -> Result<GradeCategory, HandlerErr> {
    store::get_category(conn, category_id)?.ok_or_else(|| {
        HandlerErr::new("not_found", "category not found")
            .with_details(json!({ "categoryId": category_id }))
    })
}

fn categories_update(state: &mut AppState, req: &Request) -> HandlerResult {
    let session = require_session(req)?;
    let conn = db_conn(state)?;
    let category_id = required_str(req, "categoryId")?;
    let patch = parse_category_patch(req)?;
    let cat = require_category(conn, &category_id)?;
    require_manage(conn, session, &cat.subject_id, &cat.promotion_id)?;

    store::update_category(conn, &category_id, &patch)?;
    pair_weight_check(conn, &cat.subject_id, &cat.promotion_id)
}

fn categories_delete(state: &mut AppState, req: &Request) -> HandlerResult {
    let session = require_session(req)?;
    let conn = db_conn(state)?;
    let category_id = required_str(req, "categoryId")?;
    let cat = require_category(conn, &category_id)?;
    require_manage(conn, session, &cat.subject_id, &cat.promotion_id)?;

    let removed_entries = store::delete_category(conn, &category_id)?;
    info!(category = %cat.name, removed_entries, "category deleted");
    let mut out = pair_weight_check(conn, &cat.subject_id, &cat.promotion_id)?;
    out["removedEntries"] = json!(removed_entries);
    Ok(out)
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let result = match req.method.as_str() {
        "categories.list" => categories_list(state, req),
        "categories.create" => categories_create(state, req),
        "categories.update" => categories_update(state, req),
        "categories.delete" => categories_delete(state, req),
        _ => return None,
    };
    Some(respond(req, result))
}
