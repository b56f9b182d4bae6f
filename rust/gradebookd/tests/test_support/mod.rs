#![allow(dead_code)]

use serde_json::{json, Value};
use std::io::{BufRead, BufReader, Write};
use std::path::PathBuf;
use std::process::{Child, ChildStdin, ChildStdout, Command, Stdio};
use std::time::{SystemTime, UNIX_EPOCH};

pub fn temp_dir(prefix: &str) -> PathBuf {
    let p = std::env::temp_dir().join(format!(
        "{}-{}",
        prefix,
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("clock")
            .as_nanos()
    ));
    std::fs::create_dir_all(&p).expect("create temp dir");
    p
}

pub fn spawn_sidecar() -> (Child, ChildStdin, BufReader<ChildStdout>) {
    let exe = env!("CARGO_BIN_EXE_gradebookd");
    let mut child = Command::new(exe)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .env_remove("GRADEBOOKD_WORKSPACE")
        .spawn()
        .expect("spawn gradebookd");
    let stdin = child.stdin.take().expect("child stdin");
    let stdout = child.stdout.take().expect("child stdout");
    (child, stdin, BufReader::new(stdout))
}

pub fn admin() -> Value {
    json!({ "userId": "admin-1", "role": "admin" })
}

pub fn as_professor(id: &str) -> Value {
    json!({ "userId": id, "role": "professor" })
}

pub fn as_student(id: &str) -> Value {
    json!({ "userId": id, "role": "student" })
}

/// Sends one request and returns the raw response. `session` of `Null` is
/// left off the wire.
pub fn request(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    method: &str,
    params: Value,
    session: &Value,
) -> Value {
    let mut payload = json!({
        "id": id,
        "method": method,
        "params": params,
    });
    if !session.is_null() {
        payload["session"] = session.clone();
    }
    writeln!(stdin, "{}", payload).expect("write request");
    stdin.flush().expect("flush request");

    let mut line = String::new();
    reader.read_line(&mut line).expect("read response line");
    assert!(!line.trim().is_empty(), "empty response for {}", method);
    let value: Value = serde_json::from_str(line.trim()).expect("parse response json");
    assert_eq!(value.get("id").and_then(|v| v.as_str()), Some(id));
    value
}

pub fn request_ok(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    method: &str,
    params: Value,
    session: &Value,
) -> Value {
    let value = request(stdin, reader, id, method, params, session);
    assert_eq!(
        value.get("ok").and_then(|v| v.as_bool()),
        Some(true),
        "{} failed: {}",
        method,
        value
    );
    value.get("result").cloned().unwrap_or(Value::Null)
}

/// Returns the error code of a request that must fail.
pub fn request_err(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    method: &str,
    params: Value,
    session: &Value,
) -> String {
    let value = request(stdin, reader, id, method, params, session);
    assert_eq!(
        value.get("ok").and_then(|v| v.as_bool()),
        Some(false),
        "{} unexpectedly succeeded: {}",
        method,
        value
    );
    value
        .get("error")
        .and_then(|e| e.get("code"))
        .and_then(|v| v.as_str())
        .expect("error code")
        .to_string()
}

pub fn str_field(v: &Value, key: &str) -> String {
    v.get(key)
        .and_then(|v| v.as_str())
        .unwrap_or_else(|| panic!("missing {} in {}", key, v))
        .to_string()
}

/// A cohort with one subject, two professors (one assigned) and two students.
pub struct Course {
    pub promotion_id: String,
    pub subject_id: String,
    pub professor_id: String,
    pub other_professor_id: String,
    pub student_ids: Vec<String>,
}

pub fn seed_course(stdin: &mut ChildStdin, reader: &mut BufReader<ChildStdout>) -> Course {
    let admin = admin();
    let promotion = request_ok(
        stdin,
        reader,
        "seed-1",
        "promotions.create",
        json!({ "name": "2024A AM", "year": 2024, "shift": "AM" }),
        &admin,
    );
    let promotion_id = str_field(&promotion, "promotionId");
    let subject = request_ok(
        stdin,
        reader,
        "seed-2",
        "subjects.create",
        json!({ "name": "Algebra", "code": "MAT-101" }),
        &admin,
    );
    let subject_id = str_field(&subject, "subjectId");

    let professor = request_ok(
        stdin,
        reader,
        "seed-3",
        "people.create",
        json!({ "role": "professor", "firstName": "Ada", "lastName": "Lovelace", "email": "ada@school.test" }),
        &admin,
    );
    let professor_id = str_field(&professor, "personId");
    let other = request_ok(
        stdin,
        reader,
        "seed-4",
        "people.create",
        json!({ "role": "professor", "firstName": "Alan", "lastName": "Turing" }),
        &admin,
    );
    let other_professor_id = str_field(&other, "personId");

    let mut student_ids = Vec::new();
    for (i, (first, last)) in [("Grace", "Hopper"), ("Linus", "Torvalds")]
        .iter()
        .enumerate()
    {
        let created = request_ok(
            stdin,
            reader,
            &format!("seed-s{}", i),
            "people.create",
            json!({
                "role": "student",
                "firstName": first,
                "lastName": last,
                "promotionId": promotion_id,
            }),
            &admin,
        );
        student_ids.push(str_field(&created, "personId"));
    }

    let _ = request_ok(
        stdin,
        reader,
        "seed-5",
        "teaching.assign",
        json!({
            "professorId": professor_id,
            "subjectId": subject_id,
            "promotionId": promotion_id,
        }),
        &admin,
    );

    Course {
        promotion_id,
        subject_id,
        professor_id,
        other_professor_id,
        student_ids,
    }
}

pub fn create_category(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    course: &Course,
    name: &str,
    weight: f64,
) -> String {
    let created = request_ok(
        stdin,
        reader,
        id,
        "categories.create",
        json!({
            "subjectId": course.subject_id,
            "promotionId": course.promotion_id,
            "name": name,
            "weight": weight,
        }),
        &as_professor(&course.professor_id),
    );
    str_field(&created, "categoryId")
}
