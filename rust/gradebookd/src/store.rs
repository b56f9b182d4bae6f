//! Typed access to the grade record store.
//!
//! Plain CRUD only. Aggregation lives in `calc`; permission checks live in the
//! IPC layer.

use crate::calc::{CategoryWeight, RecordedGrade};
use crate::session::Role;
use rusqlite::types::Value;
use rusqlite::{params_from_iter, Connection, OptionalExtension, Row};
use serde::Serialize;
use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("{0} not found")]
    NotFound(&'static str),
    #[error("{0}")]
    Invalid(String),
    #[error("{0}")]
    Query(#[from] rusqlite::Error),
    #[error("{table}: {source}")]
    Write {
        code: &'static str,
        table: &'static str,
        #[source]
        source: rusqlite::Error,
    },
}

impl StoreError {
    pub fn code(&self) -> &'static str {
        match self {
            StoreError::NotFound(_) => "not_found",
            StoreError::Invalid(_) => "bad_params",
            StoreError::Query(_) => "db_query_failed",
            StoreError::Write { code, .. } => *code,
        }
    }

    pub fn details(&self) -> Option<serde_json::Value> {
        match self {
            StoreError::Write { table, .. } => Some(serde_json::json!({ "table": table })),
            _ => None,
        }
    }
}

fn write_err(code: &'static str, table: &'static str) -> impl FnOnce(rusqlite::Error) -> StoreError {
    move |source| StoreError::Write {
        code,
        table,
        source,
    }
}

pub type StoreResult<T> = Result<T, StoreError>;

fn now_stamp() -> String {
    chrono::Utc::now().to_rfc3339()
}

// ---------------------------------------------------------------------------
// Promotions & subjects

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Promotion {
    pub id: String,
    pub name: String,
    pub year: i64,
    pub shift: Option<String>,
    pub student_count: i64,
}

pub fn list_promotions(conn: &Connection) -> StoreResult<Vec<Promotion>> {
    let mut stmt = conn.prepare(
        "SELECT
           p.id,
           p.name,
           p.year,
           p.shift,
           (SELECT COUNT(*) FROM people s WHERE s.promotion_id = p.id AND s.role = 'student')
         FROM promotions p
         ORDER BY p.year DESC, p.name",
    )?;
    let rows = stmt
        .query_map([], |r| {
            Ok(Promotion {
                id: r.get(0)?,
                name: r.get(1)?,
                year: r.get(2)?,
                shift: r.get(3)?,
                student_count: r.get(4)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

pub fn create_promotion(
    conn: &Connection,
    name: &str,
    year: i64,
    shift: Option<&str>,
) -> StoreResult<String> {
    let exists: Option<i64> = conn
        .query_row("SELECT 1 FROM promotions WHERE name = ?", [name], |r| r.get(0))
        .optional()?;
    if exists.is_some() {
        return Err(StoreError::Invalid(format!("promotion already exists: {}", name)));
    }
    let id = Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO promotions(id, name, year, shift) VALUES(?, ?, ?, ?)",
        (&id, name, year, shift),
    )
    .map_err(write_err("db_insert_failed", "promotions"))?;
    Ok(id)
}

pub fn promotion_exists(conn: &Connection, promotion_id: &str) -> StoreResult<bool> {
    Ok(conn
        .query_row("SELECT 1 FROM promotions WHERE id = ?", [promotion_id], |r| {
            r.get::<_, i64>(0)
        })
        .optional()?
        .is_some())
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Subject {
    pub id: String,
    pub name: String,
    pub code: Option<String>,
    pub description: Option<String>,
}

fn subject_from_row(r: &Row<'_>) -> rusqlite::Result<Subject> {
    Ok(Subject {
        id: r.get(0)?,
        name: r.get(1)?,
        code: r.get(2)?,
        description: r.get(3)?,
    })
}

pub fn list_subjects(conn: &Connection) -> StoreResult<Vec<Subject>> {
    let mut stmt =
        conn.prepare("SELECT id, name, code, description FROM subjects ORDER BY name")?;
    let rows = stmt
        .query_map([], subject_from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

pub fn create_subject(
    conn: &Connection,
    name: &str,
    code: Option<&str>,
    description: Option<&str>,
) -> StoreResult<String> {
    let id = Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO subjects(id, name, code, description) VALUES(?, ?, ?, ?)",
        (&id, name, code, description),
    )
    .map_err(write_err("db_insert_failed", "subjects"))?;
    Ok(id)
}

pub fn get_subject(conn: &Connection, subject_id: &str) -> StoreResult<Option<Subject>> {
    Ok(conn
        .query_row(
            "SELECT id, name, code, description FROM subjects WHERE id = ?",
            [subject_id],
            subject_from_row,
        )
        .optional()?)
}

/// Subjects that have at least one category configured for the cohort.
pub fn subjects_for_promotion(conn: &Connection, promotion_id: &str) -> StoreResult<Vec<Subject>> {
    let mut stmt = conn.prepare(
        "SELECT s.id, s.name, s.code, s.description
         FROM subjects s
         WHERE EXISTS (
           SELECT 1 FROM grade_categories c
           WHERE c.subject_id = s.id AND c.promotion_id = ?
         )
         ORDER BY s.name",
    )?;
    let rows = stmt
        .query_map([promotion_id], subject_from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

// ---------------------------------------------------------------------------
// People & teaching assignments

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Person {
    pub id: String,
    pub role: Role,
    pub first_name: String,
    pub last_name: String,
    pub email: Option<String>,
    pub promotion_id: Option<String>,
}

impl Person {
    pub fn display_name(&self) -> String {
        format!("{}, {}", self.last_name, self.first_name)
    }
}

#[derive(Debug, Clone)]
pub struct NewPerson<'a> {
    pub role: Role,
    pub first_name: &'a str,
    pub last_name: &'a str,
    pub email: Option<&'a str>,
    pub promotion_id: Option<&'a str>,
}

fn person_from_row(r: &Row<'_>) -> rusqlite::Result<Person> {
    let role_raw: String = r.get(1)?;
    let role = Role::parse(&role_raw).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            1,
            rusqlite::types::Type::Text,
            format!("unknown role: {}", role_raw).into(),
        )
    })?;
    Ok(Person {
        id: r.get(0)?,
        role,
        first_name: r.get(2)?,
        last_name: r.get(3)?,
        email: r.get(4)?,
        promotion_id: r.get(5)?,
    })
}

pub fn list_people(
    conn: &Connection,
    role: Option<Role>,
    promotion_id: Option<&str>,
) -> StoreResult<Vec<Person>> {
    let mut sql = String::from(
        "SELECT id, role, first_name, last_name, email, promotion_id FROM people WHERE 1 = 1",
    );
    let mut binds: Vec<Value> = Vec::new();
    if let Some(role) = role {
        sql.push_str(" AND role = ?");
        binds.push(Value::Text(role.as_str().to_string()));
    }
    if let Some(pid) = promotion_id {
        sql.push_str(" AND promotion_id = ?");
        binds.push(Value::Text(pid.to_string()));
    }
    sql.push_str(" ORDER BY last_name, first_name");

    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map(params_from_iter(binds), person_from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

pub fn students_in_promotion(conn: &Connection, promotion_id: &str) -> StoreResult<Vec<Person>> {
    list_people(conn, Some(Role::Student), Some(promotion_id))
}

pub fn get_person(conn: &Connection, person_id: &str) -> StoreResult<Option<Person>> {
    Ok(conn
        .query_row(
            "SELECT id, role, first_name, last_name, email, promotion_id FROM people WHERE id = ?",
            [person_id],
            person_from_row,
        )
        .optional()?)
}

pub fn create_person(conn: &Connection, p: &NewPerson<'_>) -> StoreResult<String> {
    match (p.role, p.promotion_id) {
        (Role::Student, None) => {
            return Err(StoreError::Invalid(
                "students must belong to a promotion".into(),
            ))
        }
        (Role::Student, Some(pid)) => {
            if !promotion_exists(conn, pid)? {
                return Err(StoreError::NotFound("promotion"));
            }
        }
        (Role::Admin | Role::Professor, Some(_)) => {
            return Err(StoreError::Invalid(
                "only students belong to a promotion".into(),
            ))
        }
        (Role::Admin | Role::Professor, None) => {}
    }

    let id = Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO people(id, role, first_name, last_name, email, promotion_id, created_at)
         VALUES(?, ?, ?, ?, ?, ?, ?)",
        (
            &id,
            p.role.as_str(),
            p.first_name,
            p.last_name,
            p.email,
            p.promotion_id,
            now_stamp(),
        ),
    )
    .map_err(write_err("db_insert_failed", "people"))?;
    Ok(id)
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TeachingAssignment {
    pub professor_id: String,
    pub subject_id: String,
    pub subject_name: String,
    pub promotion_id: String,
    pub promotion_name: String,
}

pub fn assign_teaching(
    conn: &Connection,
    professor_id: &str,
    subject_id: &str,
    promotion_id: &str,
) -> StoreResult<()> {
    let Some(prof) = get_person(conn, professor_id)? else {
        return Err(StoreError::NotFound("professor"));
    };
    if prof.role != Role::Professor {
        return Err(StoreError::Invalid("person is not a professor".into()));
    }
    if get_subject(conn, subject_id)?.is_none() {
        return Err(StoreError::NotFound("subject"));
    }
    if !promotion_exists(conn, promotion_id)? {
        return Err(StoreError::NotFound("promotion"));
    }
    conn.execute(
        "INSERT OR IGNORE INTO teaching_assignments(professor_id, subject_id, promotion_id)
         VALUES(?, ?, ?)",
        (professor_id, subject_id, promotion_id),
    )
    .map_err(write_err("db_insert_failed", "teaching_assignments"))?;
    Ok(())
}

pub fn list_teaching(
    conn: &Connection,
    professor_id: Option<&str>,
) -> StoreResult<Vec<TeachingAssignment>> {
    let mut sql = String::from(
        "SELECT t.professor_id, t.subject_id, s.name, t.promotion_id, p.name
         FROM teaching_assignments t
         JOIN subjects s ON s.id = t.subject_id
         JOIN promotions p ON p.id = t.promotion_id",
    );
    let mut binds: Vec<Value> = Vec::new();
    if let Some(pid) = professor_id {
        sql.push_str(" WHERE t.professor_id = ?");
        binds.push(Value::Text(pid.to_string()));
    }
    sql.push_str(" ORDER BY p.name, s.name");

    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map(params_from_iter(binds), |r| {
            Ok(TeachingAssignment {
                professor_id: r.get(0)?,
                subject_id: r.get(1)?,
                subject_name: r.get(2)?,
                promotion_id: r.get(3)?,
                promotion_name: r.get(4)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

pub fn is_assigned(
    conn: &Connection,
    professor_id: &str,
    subject_id: &str,
    promotion_id: &str,
) -> StoreResult<bool> {
    Ok(conn
        .query_row(
            "SELECT 1 FROM teaching_assignments
             WHERE professor_id = ? AND subject_id = ? AND promotion_id = ?",
            (professor_id, subject_id, promotion_id),
            |r| r.get::<_, i64>(0),
        )
        .optional()?
        .is_some())
}

// ---------------------------------------------------------------------------
// Grade categories

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GradeCategory {
    pub id: String,
    pub subject_id: String,
    pub promotion_id: String,
    pub name: String,
    pub description: Option<String>,
    pub weight: f64,
    pub active: bool,
    pub sort_order: i64,
}

impl GradeCategory {
    pub fn as_weight(&self) -> CategoryWeight {
        CategoryWeight {
            category_id: self.id.clone(),
            name: self.name.clone(),
            weight: self.weight,
            active: self.active,
        }
    }
}

fn category_from_row(r: &Row<'_>) -> rusqlite::Result<GradeCategory> {
    Ok(GradeCategory {
        id: r.get(0)?,
        subject_id: r.get(1)?,
        promotion_id: r.get(2)?,
        name: r.get(3)?,
        description: r.get(4)?,
        weight: r.get(5)?,
        active: r.get::<_, i64>(6)? != 0,
        sort_order: r.get(7)?,
    })
}

const CATEGORY_COLUMNS: &str =
    "id, subject_id, promotion_id, name, description, weight, active, sort_order";

pub fn list_categories(
    conn: &Connection,
    subject_id: &str,
    promotion_id: &str,
) -> StoreResult<Vec<GradeCategory>> {
    let sql = format!(
        "SELECT {} FROM grade_categories
         WHERE subject_id = ? AND promotion_id = ?
         ORDER BY sort_order",
        CATEGORY_COLUMNS
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map((subject_id, promotion_id), category_from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

pub fn get_category(conn: &Connection, category_id: &str) -> StoreResult<Option<GradeCategory>> {
    let sql = format!(
        "SELECT {} FROM grade_categories WHERE id = ?",
        CATEGORY_COLUMNS
    );
    Ok(conn
        .query_row(&sql, [category_id], category_from_row)
        .optional()?)
}

#[derive(Debug, Clone)]
pub struct NewCategory<'a> {
    pub subject_id: &'a str,
    pub promotion_id: &'a str,
    pub name: &'a str,
    pub description: Option<&'a str>,
    pub weight: f64,
}

pub fn create_category(conn: &Connection, c: &NewCategory<'_>) -> StoreResult<String> {
    if get_subject(conn, c.subject_id)?.is_none() {
        return Err(StoreError::NotFound("subject"));
    }
    if !promotion_exists(conn, c.promotion_id)? {
        return Err(StoreError::NotFound("promotion"));
    }
    let sort_order: i64 = conn.query_row(
        "SELECT COALESCE(MAX(sort_order), -1) + 1 FROM grade_categories
         WHERE subject_id = ? AND promotion_id = ?",
        (c.subject_id, c.promotion_id),
        |r| r.get(0),
    )?;

    let id = Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO grade_categories(id, subject_id, promotion_id, name, description, weight, active, sort_order)
         VALUES(?, ?, ?, ?, ?, ?, 1, ?)",
        (
            &id,
            c.subject_id,
            c.promotion_id,
            c.name,
            c.description,
            c.weight,
            sort_order,
        ),
    )
    .map_err(write_err("db_insert_failed", "grade_categories"))?;
    Ok(id)
}

#[derive(Debug, Clone, Default)]
pub struct CategoryPatch {
    pub name: Option<String>,
    /// `Some(None)` clears the description.
    pub description: Option<Option<String>>,
    pub weight: Option<f64>,
    pub active: Option<bool>,
}

impl CategoryPatch {
    pub fn is_empty(&self) -> bool {
        self.name.is_none()
            && self.description.is_none()
            && self.weight.is_none()
            && self.active.is_none()
    }
}

pub fn update_category(
    conn: &Connection,
    category_id: &str,
    patch: &CategoryPatch,
) -> StoreResult<()> {
    if patch.is_empty() {
        return Err(StoreError::Invalid(
            "patch must include at least one field".into(),
        ));
    }
    let mut set_parts: Vec<&str> = Vec::new();
    let mut binds: Vec<Value> = Vec::new();
    if let Some(name) = &patch.name {
        set_parts.push("name = ?");
        binds.push(Value::Text(name.clone()));
    }
    if let Some(desc) = &patch.description {
        set_parts.push("description = ?");
        binds.push(desc.clone().map(Value::Text).unwrap_or(Value::Null));
    }
    if let Some(w) = patch.weight {
        set_parts.push("weight = ?");
        binds.push(Value::Real(w));
    }
    if let Some(active) = patch.active {
        set_parts.push("active = ?");
        binds.push(Value::Integer(i64::from(active)));
    }
    binds.push(Value::Text(category_id.to_string()));

    let sql = format!(
        "UPDATE grade_categories SET {} WHERE id = ?",
        set_parts.join(", ")
    );
    let changed = conn
        .execute(&sql, params_from_iter(binds))
        .map_err(write_err("db_update_failed", "grade_categories"))?;
    if changed == 0 {
        return Err(StoreError::NotFound("category"));
    }
    Ok(())
}

/// Removes a category and its entries. Returns how many entries went with it.
pub fn delete_category(conn: &Connection, category_id: &str) -> StoreResult<usize> {
    let Some(cat) = get_category(conn, category_id)? else {
        return Err(StoreError::NotFound("category"));
    };

    let tx = conn
        .unchecked_transaction()
        .map_err(write_err("db_tx_failed", "grade_categories"))?;
    let removed_entries = tx
        .execute(
            "DELETE FROM grade_entries WHERE category_id = ?",
            [category_id],
        )
        .map_err(write_err("db_delete_failed", "grade_entries"))?;
    tx.execute("DELETE FROM grade_categories WHERE id = ?", [category_id])
        .map_err(write_err("db_delete_failed", "grade_categories"))?;
    // Keep sort_order contiguous.
    tx.execute(
        "UPDATE grade_categories
         SET sort_order = sort_order - 1
         WHERE subject_id = ? AND promotion_id = ? AND sort_order > ?",
        (&cat.subject_id, &cat.promotion_id, cat.sort_order),
    )
    .map_err(write_err("db_update_failed", "grade_categories"))?;
    tx.commit()
        .map_err(write_err("db_tx_failed", "grade_categories"))?;
    Ok(removed_entries)
}

// ---------------------------------------------------------------------------
// Grade entries

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GradeEntry {
    pub id: String,
    pub student_id: String,
    pub category_id: String,
    pub value: f64,
    pub comments: Option<String>,
    pub recorded_at: String,
    pub updated_at: String,
    pub editor_id: String,
}

impl GradeEntry {
    pub fn as_recorded(&self) -> RecordedGrade {
        RecordedGrade {
            category_id: self.category_id.clone(),
            value: self.value,
        }
    }
}

/// Entries for a subject/cohort, optionally narrowed to one student.
pub fn list_entries(
    conn: &Connection,
    subject_id: &str,
    promotion_id: &str,
    student_id: Option<&str>,
) -> StoreResult<Vec<GradeEntry>> {
    let mut sql = String::from(
        "SELECT e.id, e.student_id, e.category_id, e.value, e.comments,
                e.recorded_at, e.updated_at, e.editor_id
         FROM grade_entries e
         JOIN grade_categories c ON c.id = e.category_id
         WHERE c.subject_id = ? AND c.promotion_id = ?",
    );
    let mut binds: Vec<Value> = vec![
        Value::Text(subject_id.to_string()),
        Value::Text(promotion_id.to_string()),
    ];
    if let Some(sid) = student_id {
        sql.push_str(" AND e.student_id = ?");
        binds.push(Value::Text(sid.to_string()));
    }
    sql.push_str(" ORDER BY e.student_id, c.sort_order");

    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map(params_from_iter(binds), |r| {
            Ok(GradeEntry {
                id: r.get(0)?,
                student_id: r.get(1)?,
                category_id: r.get(2)?,
                value: r.get(3)?,
                comments: r.get(4)?,
                recorded_at: r.get(5)?,
                updated_at: r.get(6)?,
                editor_id: r.get(7)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

#[derive(Debug, Clone)]
pub struct EntryWrite {
    pub student_id: String,
    pub category_id: String,
    pub value: f64,
    /// `None` keeps whatever comment is stored; `Some(None)` clears it.
    pub comments: Option<Option<String>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOutcome {
    Created,
    Updated,
}

/// One row per (student, category): inserted the first time, updated after.
/// `recorded_at` keeps the first-write stamp. A write without comments leaves
/// the stored comment alone.
pub fn upsert_entry(
    conn: &Connection,
    write: &EntryWrite,
    editor_id: &str,
) -> StoreResult<UpsertOutcome> {
    let existed: Option<i64> = conn
        .query_row(
            "SELECT 1 FROM grade_entries WHERE student_id = ? AND category_id = ?",
            (&write.student_id, &write.category_id),
            |r| r.get(0),
        )
        .optional()?;

    let now = now_stamp();
    conn.execute(
        "INSERT INTO grade_entries(id, student_id, category_id, value, comments, recorded_at, updated_at, editor_id)
         VALUES(?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
         ON CONFLICT(student_id, category_id) DO UPDATE SET
           value = excluded.value,
           comments = CASE WHEN ?9 THEN excluded.comments ELSE grade_entries.comments END,
           updated_at = excluded.updated_at,
           editor_id = excluded.editor_id",
        (
            Uuid::new_v4().to_string(),
            &write.student_id,
            &write.category_id,
            write.value,
            write.comments.as_ref().and_then(|c| c.as_deref()),
            &now,
            &now,
            editor_id,
            write.comments.is_some(),
        ),
    )
    .map_err(write_err("db_insert_failed", "grade_entries"))?;

    Ok(if existed.is_some() {
        UpsertOutcome::Updated
    } else {
        UpsertOutcome::Created
    })
}

pub fn delete_entry(conn: &Connection, student_id: &str, category_id: &str) -> StoreResult<bool> {
    let changed = conn
        .execute(
            "DELETE FROM grade_entries WHERE student_id = ? AND category_id = ?",
            (student_id, category_id),
        )
        .map_err(write_err("db_delete_failed", "grade_entries"))?;
    Ok(changed > 0)
}
