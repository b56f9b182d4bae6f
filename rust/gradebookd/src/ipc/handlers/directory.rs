use crate::ipc::helpers::{
    db_conn, optional_str, require_admin, require_session, required_str, respond, HandlerErr,
    HandlerResult,
};
use crate::ipc::types::{AppState, Request};
use crate::session::Role;
use crate::store::{self, NewPerson};
use serde_json::json;
use tracing::info;

const MIN_PROMOTION_YEAR: i64 = 1900;
const MAX_PROMOTION_YEAR: i64 = 2999;

fn promotions_list(state: &mut AppState, req: &Request) -> HandlerResult {
    require_session(req)?;
    let conn = db_conn(state)?;
    let promotions = store::list_promotions(conn)?;
    Ok(json!({ "promotions": promotions }))
}

fn promotions_create(state: &mut AppState, req: &Request) -> HandlerResult {
    require_admin(req)?;
    let conn = db_conn(state)?;
    let name = required_str(req, "name")?;
    let Some(year) = req.params.get("year").and_then(|v| v.as_i64()) else {
        return Err(HandlerErr::bad_params("year must be an integer"));
    };
    if !(MIN_PROMOTION_YEAR..=MAX_PROMOTION_YEAR).contains(&year) {
        return Err(HandlerErr::bad_params("year out of range").with_details(json!({ "year": year })));
    }
    let shift = optional_str(req, "shift")?;

    let promotion_id = store::create_promotion(conn, &name, year, shift.as_deref())?;
    info!(promotion = %name, "promotion created");
    Ok(json!({ "promotionId": promotion_id }))
}

fn subjects_list(state: &mut AppState, req: &Request) -> HandlerResult {
    require_session(req)?;
    let conn = db_conn(state)?;
    let subjects = match optional_str(req, "promotionId")? {
        Some(pid) => store::subjects_for_promotion(conn, &pid)?,
        None => store::list_subjects(conn)?,
    };
    Ok(json!({ "subjects": subjects }))
}

fn subjects_create(state: &mut AppState, req: &Request) -> HandlerResult {
    require_admin(req)?;
    let conn = db_conn(state)?;
    let name = required_str(req, "name")?;
    let code = optional_str(req, "code")?;
    let description = optional_str(req, "description")?;
    let subject_id = store::create_subject(conn, &name, code.as_deref(), description.as_deref())?;
    Ok(json!({ "subjectId": subject_id }))
}

fn parse_role_param(req: &Request) -> Result<Option<Role>, HandlerErr> {
    match optional_str(req, "role")? {
        None => Ok(None),
        Some(s) => Role::parse(&s).map(Some).ok_or_else(|| {
            HandlerErr::bad_params("role must be one of: admin, professor, student")
                .with_details(json!({ "role": s }))
        }),
    }
}

fn people_list(state: &mut AppState, req: &Request) -> HandlerResult {
    let session = require_session(req)?;
    let conn = db_conn(state)?;
    let requested = parse_role_param(req)?;
    let role = match session.role {
        Role::Admin => requested,
        Role::Professor => match requested {
            None | Some(Role::Student) => Some(Role::Student),
            Some(Role::Admin | Role::Professor) => {
                return Err(HandlerErr::new("forbidden", "professors may only list students"))
            }
        },
        Role::Student => return Err(HandlerErr::new("forbidden", "students cannot list people")),
    };
    let promotion_id = optional_str(req, "promotionId")?;
    let people = store::list_people(conn, role, promotion_id.as_deref())?;
    let rows: Vec<serde_json::Value> = people
        .iter()
        .map(|p| {
            json!({
                "id": p.id,
                "role": p.role,
                "displayName": p.display_name(),
                "firstName": p.first_name,
                "lastName": p.last_name,
                "email": p.email,
                "promotionId": p.promotion_id,
            })
        })
        .collect();
    Ok(json!({ "people": rows }))
}

fn people_create(state: &mut AppState, req: &Request) -> HandlerResult {
    require_admin(req)?;
    let conn = db_conn(state)?;
    let Some(role) = parse_role_param(req)? else {
        return Err(HandlerErr::bad_params("missing role"));
    };
    let first_name = required_str(req, "firstName")?;
    let last_name = required_str(req, "lastName")?;
    let email = optional_str(req, "email")?;
    if let Some(e) = &email {
        if !e.contains('@') {
            return Err(HandlerErr::bad_params("email is not valid").with_details(json!({ "email": e })));
        }
    }
    let promotion_id = optional_str(req, "promotionId")?;

    let person_id = store::create_person(
        conn,
        &NewPerson {
            role,
            first_name: &first_name,
            last_name: &last_name,
            email: email.as_deref(),
            promotion_id: promotion_id.as_deref(),
        },
    )?;
    Ok(json!({ "personId": person_id }))
}

fn teaching_assign(state: &mut AppState, req: &Request) -> HandlerResult {
    require_admin(req)?;
    let conn = db_conn(state)?;
    let professor_id = required_str(req, "professorId")?;
    let subject_id = required_str(req, "subjectId")?;
    let promotion_id = required_str(req, "promotionId")?;
    store::assign_teaching(conn, &professor_id, &subject_id, &promotion_id)?;
    Ok(json!({ "ok": true }))
}

fn teaching_list(state: &mut AppState, req: &Request) -> HandlerResult {
    let session = require_session(req)?;
    let conn = db_conn(state)?;
    let professor_id = match session.role {
        Role::Admin => optional_str(req, "professorId")?,
        Role::Professor => Some(session.user_id.clone()),
        Role::Student => {
            return Err(HandlerErr::new(
                "forbidden",
                "students cannot list teaching assignments",
            ))
        }
    };
    let assignments = store::list_teaching(conn, professor_id.as_deref())?;
    Ok(json!({ "assignments": assignments }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let result = match req.method.as_str() {
        "promotions.list" => promotions_list(state, req),
        "promotions.create" => promotions_create(state, req),
        "subjects.list" => subjects_list(state, req),
        "subjects.create" => subjects_create(state, req),
        "people.list" => people_list(state, req),
        "people.create" => people_create(state, req),
        "teaching.assign" => teaching_assign(state, req),
        "teaching.list" => teaching_list(state, req),
        _ => return None,
    };
    Some(respond(req, result))
}
