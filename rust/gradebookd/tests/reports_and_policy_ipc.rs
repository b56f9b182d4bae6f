mod test_support;

use serde_json::{json, Value};
use test_support::{
    admin, as_professor, create_category, request_ok, seed_course, spawn_sidecar, temp_dir,
};

#[test]
fn missing_grade_policy_changes_final_grade_and_status() {
    let workspace = temp_dir("gradebook-policy");
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
        &Value::Null,
    );
    let course = seed_course(&mut stdin, &mut reader);
    let prof = as_professor(&course.professor_id);
    let exam = create_category(&mut stdin, &mut reader, "2", &course, "Exam", 50.0);
    let hw = create_category(&mut stdin, &mut reader, "3", &course, "Homework", 50.0);
    let s0 = &course.student_ids[0];
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "4",
        "grades.upsert",
        json!({ "studentId": s0, "categoryId": exam, "value": 80 }),
        &prof,
    );
    let params = json!({
        "studentId": s0,
        "subjectId": course.subject_id,
        "promotionId": course.promotion_id,
    });

    let setup = request_ok(&mut stdin, &mut reader, "5", "setup.get", json!({}), &prof);
    assert_eq!(setup["grading"]["missingGradePolicy"], "zero");

    let zero = request_ok(
        &mut stdin,
        &mut reader,
        "6",
        "calc.studentSubject",
        params.clone(),
        &prof,
    );
    assert_eq!(zero["result"]["finalGrade"], 40.0);
    assert_eq!(zero["result"]["status"], "failing");
    assert_eq!(zero["result"]["gradedCategories"], 1);
    assert_eq!(zero["result"]["totalCategories"], 2);

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "7",
        "setup.update",
        json!({ "section": "grading", "patch": { "missingGradePolicy": "exclude" } }),
        &admin(),
    );
    let exclude = request_ok(&mut stdin, &mut reader, "8", "calc.studentSubject", params, &prof);
    assert_eq!(exclude["result"]["finalGrade"], 80.0);
    assert_eq!(exclude["result"]["status"], "good");
    assert_eq!(exclude["result"]["policy"], "exclude");

    // Retiring the ungraded category has the same effect under the zero policy.
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "9",
        "setup.update",
        json!({ "section": "grading", "patch": { "missingGradePolicy": "zero" } }),
        &admin(),
    );
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "10",
        "categories.update",
        json!({ "categoryId": hw, "patch": { "active": false } }),
        &prof,
    );
    let retired = request_ok(
        &mut stdin,
        &mut reader,
        "11",
        "calc.studentSubject",
        json!({
            "studentId": s0,
            "subjectId": course.subject_id,
            "promotionId": course.promotion_id,
        }),
        &prof,
    );
    assert_eq!(retired["result"]["finalGrade"], 80.0);
    assert_eq!(retired["result"]["totalCategories"], 1);
    assert_eq!(retired["result"]["weightCheck"]["balanced"], false);

    let _ = std::fs::remove_dir_all(workspace);
}

#[test]
fn subject_summary_and_csv_cover_every_student_in_the_cohort() {
    let workspace = temp_dir("gradebook-summary");
    let csv_out = workspace.join("exports").join("algebra.csv");
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
        &Value::Null,
    );
    let course = seed_course(&mut stdin, &mut reader);
    let prof = as_professor(&course.professor_id);
    let exam = create_category(&mut stdin, &mut reader, "2", &course, "Exam", 60.0);
    let hw = create_category(&mut stdin, &mut reader, "3", &course, "Homework", 40.0);
    let s0 = &course.student_ids[0];
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "4",
        "grades.bulkUpsert",
        json!({
            "subjectId": course.subject_id,
            "promotionId": course.promotion_id,
            "edits": [
                { "studentId": s0, "categoryId": exam, "value": 90 },
                { "studentId": s0, "categoryId": hw, "value": 80.5 },
            ],
        }),
        &prof,
    );
    let pair = json!({ "subjectId": course.subject_id, "promotionId": course.promotion_id });

    let summary = request_ok(
        &mut stdin,
        &mut reader,
        "5",
        "reports.subjectSummary",
        pair.clone(),
        &prof,
    );
    let students = summary["students"].as_array().expect("students");
    assert_eq!(students.len(), 2);
    assert_eq!(students[0]["displayName"], "Hopper, Grace");
    assert_eq!(students[0]["status"], "excellent");
    assert_eq!(students[1]["status"], "incomplete");
    assert_eq!(summary["stats"]["studentCount"], 2);
    assert_eq!(summary["stats"]["gradedCount"], 1);
    assert_eq!(summary["stats"]["distribution"]["incomplete"], 1);
    assert_eq!(summary["weightCheck"]["balanced"], true);
    let avg = summary["stats"]["average"].as_f64().expect("average");
    assert!((avg - 86.2).abs() < 1e-9);

    let mut params = pair;
    params["outPath"] = json!(csv_out.to_string_lossy());
    let exported = request_ok(&mut stdin, &mut reader, "6", "reports.subjectCsv", params, &prof);
    assert_eq!(exported["rowsExported"], 2);

    let text = std::fs::read_to_string(&csv_out).expect("read csv");
    let lines: Vec<&str> = text.lines().collect();
    assert_eq!(
        lines[0],
        "student_id,student_name,final_grade,status,graded_categories,total_categories,weights_balanced"
    );
    assert_eq!(
        lines[1],
        format!("{},\"Hopper, Grace\",86.20,excellent,2,2,true", s0)
    );
    assert_eq!(
        lines[2],
        format!(
            "{},\"Torvalds, Linus\",0.00,incomplete,0,2,true",
            course.student_ids[1]
        )
    );

    let _ = std::fs::remove_dir_all(workspace);
}
