use crate::ipc::error::{err, ok};
use crate::ipc::types::{AppState, Request};
use crate::session::{GradeAccess, Role, Session};
use crate::store::{self, Person, StoreError};
use rusqlite::Connection;
use serde_json::json;
use tracing::warn;

pub struct HandlerErr {
    pub code: &'static str,
    pub message: String,
    pub details: Option<serde_json::Value>,
}

impl HandlerErr {
    pub fn new(code: &'static str, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            details: None,
        }
    }

    pub fn bad_params(message: impl Into<String>) -> Self {
        Self::new("bad_params", message)
    }

    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = Some(details);
        self
    }

    pub fn response(self, id: &str) -> serde_json::Value {
        err(id, self.code, self.message, self.details)
    }
}

impl From<StoreError> for HandlerErr {
    fn from(e: StoreError) -> Self {
        HandlerErr {
            code: e.code(),
            message: e.to_string(),
            details: e.details(),
        }
    }
}

pub type HandlerResult = Result<serde_json::Value, HandlerErr>;

pub fn respond(req: &Request, result: HandlerResult) -> serde_json::Value {
    match result {
        Ok(v) => ok(&req.id, v),
        Err(e) => {
            warn!(id = %req.id, method = %req.method, code = e.code, "{}", e.message);
            e.response(&req.id)
        }
    }
}

pub fn db_conn(state: &AppState) -> Result<&Connection, HandlerErr> {
    state
        .db
        .as_ref()
        .ok_or_else(|| HandlerErr::new("no_workspace", "select a workspace first"))
}

/// Trimmed, non-empty string param.
pub fn required_str(req: &Request, key: &str) -> Result<String, HandlerErr> {
    match req.params.get(key).and_then(|v| v.as_str()).map(str::trim) {
        Some(v) if !v.is_empty() => Ok(v.to_string()),
        Some(_) => Err(HandlerErr::bad_params(format!("{} must not be empty", key))),
        None => Err(HandlerErr::bad_params(format!("missing {}", key))),
    }
}

/// Absent and null both read as `None`; blank strings too.
pub fn optional_str(req: &Request, key: &str) -> Result<Option<String>, HandlerErr> {
    match req.params.get(key) {
        None => Ok(None),
        Some(v) if v.is_null() => Ok(None),
        Some(v) => {
            let Some(s) = v.as_str() else {
                return Err(HandlerErr::bad_params(format!(
                    "{} must be a string or null",
                    key
                )));
            };
            let t = s.trim();
            Ok(if t.is_empty() { None } else { Some(t.to_string()) })
        }
    }
}

pub fn parse_grade_value(v: Option<&serde_json::Value>, key: &str) -> Result<f64, HandlerErr> {
    let Some(n) = v.and_then(|v| v.as_f64()) else {
        return Err(HandlerErr::bad_params(format!("{} must be a number", key)));
    };
    if !n.is_finite() || !(0.0..=100.0).contains(&n) {
        return Err(
            HandlerErr::bad_params(format!("{} must be between 0 and 100", key))
                .with_details(json!({ key: n })),
        );
    }
    Ok(n)
}

pub fn parse_weight(v: Option<&serde_json::Value>, key: &str) -> Result<f64, HandlerErr> {
    let Some(n) = v.and_then(|v| v.as_f64()) else {
        return Err(HandlerErr::bad_params(format!("{} must be a number", key)));
    };
    if !n.is_finite() || n <= 0.0 || n > 100.0 {
        return Err(
            HandlerErr::bad_params(format!("{} must be in (0, 100]", key))
                .with_details(json!({ key: n })),
        );
    }
    Ok(n)
}

pub fn require_session(req: &Request) -> Result<&Session, HandlerErr> {
    req.session
        .as_ref()
        .ok_or_else(|| HandlerErr::new("unauthenticated", "request has no session"))
}

pub fn require_admin(req: &Request) -> Result<&Session, HandlerErr> {
    let session = require_session(req)?;
    if !session.is_admin() {
        return Err(HandlerErr::new("forbidden", "admin role required"));
    }
    Ok(session)
}

/// Access to grades of one subject/cohort pair. `None` never comes back: it
/// is turned into `forbidden`.
pub fn grade_access(
    conn: &Connection,
    session: &Session,
    subject_id: &str,
    promotion_id: &str,
) -> Result<GradeAccess, HandlerErr> {
    let assigned = match session.role {
        Role::Professor => store::is_assigned(conn, &session.user_id, subject_id, promotion_id)?,
        Role::Admin | Role::Student => false,
    };
    match session.grade_access(assigned) {
        GradeAccess::None => Err(HandlerErr::new(
            "forbidden",
            "not assigned to this subject and promotion",
        )),
        GradeAccess::ReadOwn => {
            let me = store::get_person(conn, &session.user_id)?;
            let in_promotion = me
                .as_ref()
                .and_then(|p| p.promotion_id.as_deref())
                .map(|pid| pid == promotion_id)
                .unwrap_or(false);
            if !in_promotion {
                return Err(HandlerErr::new(
                    "forbidden",
                    "student is not enrolled in this promotion",
                ));
            }
            Ok(GradeAccess::ReadOwn)
        }
        GradeAccess::Manage => Ok(GradeAccess::Manage),
    }
}

pub fn require_manage(
    conn: &Connection,
    session: &Session,
    subject_id: &str,
    promotion_id: &str,
) -> Result<(), HandlerErr> {
    match grade_access(conn, session, subject_id, promotion_id)? {
        GradeAccess::Manage => Ok(()),
        GradeAccess::ReadOwn | GradeAccess::None => Err(HandlerErr::new(
            "forbidden",
            "read-only access to this subject",
        )),
    }
}

pub fn require_student(conn: &Connection, student_id: &str) -> Result<Person, HandlerErr> {
    match store::get_person(conn, student_id)? {
        Some(p) if p.role == Role::Student => Ok(p),
        Some(_) => Err(HandlerErr::bad_params("person is not a student")
            .with_details(json!({ "studentId": student_id }))),
        None => Err(HandlerErr::new("not_found", "student not found")
            .with_details(json!({ "studentId": student_id }))),
    }
}

pub fn require_pair(
    conn: &Connection,
    subject_id: &str,
    promotion_id: &str,
) -> Result<store::Subject, HandlerErr> {
    let Some(subject) = store::get_subject(conn, subject_id)? else {
        return Err(HandlerErr::new("not_found", "subject not found"));
    };
    if !store::promotion_exists(conn, promotion_id)? {
        return Err(HandlerErr::new("not_found", "promotion not found"));
    }
    Ok(subject)
}
