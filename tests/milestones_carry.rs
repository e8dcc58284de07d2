mod test_support;

use serde_json::json;
use test_support::{request_err_code, request_ok, spawn_sidecar, temp_dir};

#[test]
fn milestone_carry_shifts_target_date_by_period_offset() {
    let workspace = temp_dir("planbook-milestone-carry");
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );

    let created = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "milestones.create",
        json!({
            "token": "2025-Q1",
            "input": { "title": "First deliverable", "targetDate": "2025-02-10" }
        }),
    );
    let milestone_id = created
        .get("milestoneId")
        .and_then(|v| v.as_str())
        .expect("milestoneId")
        .to_string();

    let continued = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "milestones.continue",
        json!({ "milestoneId": milestone_id }),
    );
    assert_eq!(
        continued.get("token").and_then(|v| v.as_str()),
        Some("2025-Q2")
    );
    // Q1 2025 starts 2025-01-06, Q2 starts 2025-04-07: 91 days later.
    assert_eq!(
        continued.get("targetDate").and_then(|v| v.as_str()),
        Some("2025-05-12")
    );

    let listed = request_ok(
        &mut stdin,
        &mut reader,
        "4",
        "milestones.list",
        json!({ "token": "2025-Q2" }),
    );
    let milestones = listed
        .get("milestones")
        .and_then(|v| v.as_array())
        .expect("milestones");
    assert_eq!(milestones.len(), 1);
    let carried = &milestones[0];
    assert_eq!(
        carried.get("sourceId").and_then(|v| v.as_str()),
        Some(milestone_id.as_str())
    );
    assert_eq!(
        carried.get("isContinuation").and_then(|v| v.as_bool()),
        Some(true)
    );
    assert_eq!(carried.get("status").and_then(|v| v.as_str()), Some("open"));

    // Source list is untouched.
    let source_list = request_ok(
        &mut stdin,
        &mut reader,
        "5",
        "milestones.list",
        json!({ "token": "2025-Q1" }),
    );
    assert_eq!(
        source_list
            .get("milestones")
            .and_then(|v| v.as_array())
            .map(|a| a.len()),
        Some(1)
    );
}

#[test]
fn milestone_without_target_date_carries_with_none() {
    let workspace = temp_dir("planbook-milestone-no-date");
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );

    let created = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "milestones.create",
        json!({ "token": "2025-Q3", "input": { "title": "Open ended" } }),
    );
    let milestone_id = created
        .get("milestoneId")
        .and_then(|v| v.as_str())
        .expect("milestoneId");

    let continued = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "milestones.continue",
        json!({ "milestoneId": milestone_id, "targetToken": "2025-Q4" }),
    );
    assert!(continued.get("targetDate").map(|v| v.is_null()).unwrap_or(true));
}

#[test]
fn milestone_update_validates_status_and_date() {
    let workspace = temp_dir("planbook-milestone-update");
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );

    let created = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "milestones.create",
        json!({ "token": "2025-Q1", "input": { "title": "Checkpoint" } }),
    );
    let milestone_id = created
        .get("milestoneId")
        .and_then(|v| v.as_str())
        .expect("milestoneId")
        .to_string();

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "milestones.update",
        json!({ "milestoneId": milestone_id, "patch": { "status": "reached" } }),
    );

    let bad_status = request_err_code(
        &mut stdin,
        &mut reader,
        "4",
        "milestones.update",
        json!({ "milestoneId": milestone_id, "patch": { "status": "finished" } }),
    );
    assert_eq!(bad_status, "bad_params");

    let bad_date = request_err_code(
        &mut stdin,
        &mut reader,
        "5",
        "milestones.update",
        json!({ "milestoneId": milestone_id, "patch": { "targetDate": "next tuesday" } }),
    );
    assert_eq!(bad_date, "bad_params");
}
