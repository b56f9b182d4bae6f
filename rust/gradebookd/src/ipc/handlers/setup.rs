use crate::calc::MissingGradePolicy;
use crate::db;
use crate::ipc::helpers::{
    db_conn, require_admin, require_session, respond, HandlerErr, HandlerResult,
};
use crate::ipc::types::{AppState, Request};
use serde_json::{json, Map, Value};

const GRADING_KEY: &str = "setup.grading";
const MAX_DISPLAY_DECIMALS: i64 = 4;

#[derive(Debug, Clone, Copy)]
pub struct GradingSettings {
    pub missing_grade_policy: MissingGradePolicy,
    pub display_decimals: u32,
}

fn default_grading() -> Value {
    json!({
        "missingGradePolicy": "zero",
        "displayDecimals": 2
    })
}

fn merge_grading_patch(current: &mut Value, patch: &Map<String, Value>) -> Result<(), String> {
    let Some(obj) = current.as_object_mut() else {
        return Err("grading settings must be an object".into());
    };
    for (k, v) in patch {
        match k.as_str() {
            "missingGradePolicy" => {
                let Some(s) = v.as_str() else {
                    return Err("missingGradePolicy must be a string".into());
                };
                let Some(policy) = MissingGradePolicy::parse(s) else {
                    return Err("missingGradePolicy must be one of: zero, exclude".into());
                };
                obj.insert(k.clone(), Value::String(policy.as_str().to_string()));
            }
            "displayDecimals" => {
                let Some(n) = v.as_i64() else {
                    return Err("displayDecimals must be an integer".into());
                };
                if !(0..=MAX_DISPLAY_DECIMALS).contains(&n) {
                    return Err(format!(
                        "displayDecimals must be between 0 and {}",
                        MAX_DISPLAY_DECIMALS
                    ));
                }
                obj.insert(k.clone(), Value::from(n));
            }
            _ => return Err(format!("unknown grading field: {}", k)),
        }
    }
    Ok(())
}

fn load_grading_value(conn: &rusqlite::Connection) -> anyhow::Result<Value> {
    let mut current = default_grading();
    if let Some(saved) = db::settings_get_json(conn, GRADING_KEY)? {
        if let Some(saved_obj) = saved.as_object() {
            // Malformed historical values fall back to defaults field by field.
            for (k, v) in saved_obj {
                let mut one = Map::new();
                one.insert(k.clone(), v.clone());
                let _ = merge_grading_patch(&mut current, &one);
            }
        }
    }
    Ok(current)
}

pub fn load_grading(conn: &rusqlite::Connection) -> anyhow::Result<GradingSettings> {
    let v = load_grading_value(conn)?;
    let missing_grade_policy = v
        .get("missingGradePolicy")
        .and_then(|s| s.as_str())
        .and_then(MissingGradePolicy::parse)
        .unwrap_or_default();
    let display_decimals = v
        .get("displayDecimals")
        .and_then(|n| n.as_u64())
        .unwrap_or(2) as u32;
    Ok(GradingSettings {
        missing_grade_policy,
        display_decimals,
    })
}

fn setup_get(state: &mut AppState, req: &Request) -> HandlerResult {
    require_session(req)?;
    let conn = db_conn(state)?;
    let grading = load_grading_value(conn)
        .map_err(|e| HandlerErr::new("db_query_failed", e.to_string()))?;
    Ok(json!({ "grading": grading }))
}

fn setup_update(state: &mut AppState, req: &Request) -> HandlerResult {
    require_admin(req)?;
    let conn = db_conn(state)?;
    match req.params.get("section").and_then(|v| v.as_str()) {
        Some("grading") => {}
        Some(_) => return Err(HandlerErr::bad_params("unknown section")),
        None => return Err(HandlerErr::bad_params("missing section")),
    }
    let Some(patch) = req.params.get("patch").and_then(|v| v.as_object()) else {
        return Err(HandlerErr::bad_params("patch must be an object"));
    };

    let mut current = load_grading_value(conn)
        .map_err(|e| HandlerErr::new("db_query_failed", e.to_string()))?;
    merge_grading_patch(&mut current, patch).map_err(HandlerErr::bad_params)?;
    db::settings_set_json(conn, GRADING_KEY, &current)
        .map_err(|e| HandlerErr::new("db_update_failed", e.to_string()))?;
    Ok(json!({ "grading": current }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "setup.get" => Some(respond(req, setup_get(state, req))),
        "setup.update" => Some(respond(req, setup_update(state, req))),
        _ => None,
    }
}
