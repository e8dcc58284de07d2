mod test_support;

use serde_json::json;
use std::io::BufReader;
use std::process::{ChildStdin, ChildStdout};
use test_support::{request_err_code, request_ok, spawn_sidecar, temp_dir};

fn seed_quest_with_tasks(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id_base: u32,
) -> (String, Vec<String>) {
    let quest = request_ok(
        stdin,
        reader,
        &format!("{}", id_base),
        "quests.create",
        json!({ "token": "2025-Q2", "input": { "title": "Learn Rust" } }),
    );
    let quest_id = quest
        .get("questId")
        .and_then(|v| v.as_str())
        .expect("questId")
        .to_string();

    let mut task_ids = Vec::new();
    for (i, (title, status)) in [
        ("Read the book", "done"),
        ("Write a parser", "todo"),
        ("Port the planner", "doing"),
    ]
    .iter()
    .enumerate()
    {
        let task = request_ok(
            stdin,
            reader,
            &format!("{}", id_base + 1 + i as u32),
            "tasks.create",
            json!({ "questId": quest_id, "input": { "title": title, "status": status } }),
        );
        task_ids.push(
            task.get("taskId")
                .and_then(|v| v.as_str())
                .expect("taskId")
                .to_string(),
        );
    }
    (quest_id, task_ids)
}

#[test]
fn incomplete_tasks_only_carries_unfinished_tasks_into_next_quarter() {
    let workspace = temp_dir("planbook-continue-incomplete");
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    let (quest_id, _) = seed_quest_with_tasks(&mut stdin, &mut reader, 10);

    let continued = request_ok(
        &mut stdin,
        &mut reader,
        "20",
        "quests.continue",
        json!({ "questId": quest_id, "strategy": "incomplete_tasks_only" }),
    );
    // Default target is the quarter after the source's.
    assert_eq!(
        continued.get("token").and_then(|v| v.as_str()),
        Some("2025-Q3")
    );
    assert_eq!(
        continued.get("carriedTaskCount").and_then(|v| v.as_i64()),
        Some(2)
    );

    let new_quest_id = continued
        .get("questId")
        .and_then(|v| v.as_str())
        .expect("questId");
    let opened = request_ok(
        &mut stdin,
        &mut reader,
        "21",
        "quests.open",
        json!({ "questId": new_quest_id }),
    );
    let quest = opened.get("quest").expect("quest");
    assert_eq!(
        quest.get("sourceId").and_then(|v| v.as_str()),
        Some(quest_id.as_str())
    );
    assert_eq!(
        quest.get("isContinuation").and_then(|v| v.as_bool()),
        Some(true)
    );
    assert_eq!(
        quest.get("strategy").and_then(|v| v.as_str()),
        Some("incomplete_tasks_only")
    );
    assert!(quest
        .get("continuationDate")
        .and_then(|v| v.as_str())
        .is_some());

    let tasks = opened.get("tasks").and_then(|v| v.as_array()).expect("tasks");
    assert_eq!(tasks.len(), 2);
    for task in tasks {
        assert_eq!(
            task.get("isContinuation").and_then(|v| v.as_bool()),
            Some(true)
        );
        assert!(task.get("sourceId").and_then(|v| v.as_str()).is_some());
        assert_ne!(task.get("status").and_then(|v| v.as_str()), Some("done"));
    }

    // The source quest is untouched.
    let source = request_ok(
        &mut stdin,
        &mut reader,
        "22",
        "quests.open",
        json!({ "questId": quest_id }),
    );
    assert_eq!(
        source
            .get("quest")
            .and_then(|q| q.get("isContinuation"))
            .and_then(|v| v.as_bool()),
        Some(false)
    );
    assert_eq!(
        source
            .get("tasks")
            .and_then(|v| v.as_array())
            .map(|a| a.len()),
        Some(3)
    );
}

#[test]
fn all_tasks_carries_everything_to_an_explicit_target() {
    let workspace = temp_dir("planbook-continue-all");
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    let (quest_id, _) = seed_quest_with_tasks(&mut stdin, &mut reader, 10);

    let continued = request_ok(
        &mut stdin,
        &mut reader,
        "20",
        "quests.continue",
        json!({
            "questId": quest_id,
            "strategy": "all_tasks",
            "targetToken": "2026-Q1"
        }),
    );
    assert_eq!(
        continued.get("token").and_then(|v| v.as_str()),
        Some("2026-Q1")
    );
    assert_eq!(
        continued.get("carriedTaskCount").and_then(|v| v.as_i64()),
        Some(3)
    );

    let listed = request_ok(
        &mut stdin,
        &mut reader,
        "21",
        "quests.list",
        json!({ "token": "2026-Q1" }),
    );
    let quests = listed.get("quests").and_then(|v| v.as_array()).expect("quests");
    assert_eq!(quests.len(), 1);
    assert_eq!(
        quests[0].get("title").and_then(|v| v.as_str()),
        Some("Learn Rust")
    );
}

#[test]
fn custom_strategy_uses_the_allowlist() {
    let workspace = temp_dir("planbook-continue-custom");
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    let (quest_id, task_ids) = seed_quest_with_tasks(&mut stdin, &mut reader, 10);

    let continued = request_ok(
        &mut stdin,
        &mut reader,
        "20",
        "quests.continue",
        json!({
            "questId": quest_id,
            "strategy": "custom",
            "taskIds": [task_ids[0], task_ids[2]]
        }),
    );
    assert_eq!(
        continued.get("carriedTaskCount").and_then(|v| v.as_i64()),
        Some(2)
    );

    // The allowlist is required for custom.
    let code = request_err_code(
        &mut stdin,
        &mut reader,
        "21",
        "quests.continue",
        json!({ "questId": quest_id, "strategy": "custom" }),
    );
    assert_eq!(code, "bad_params");
}

#[test]
fn continuation_guards_reject_bad_targets_and_sources() {
    let workspace = temp_dir("planbook-continue-guards");
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    let (quest_id, _) = seed_quest_with_tasks(&mut stdin, &mut reader, 10);

    let same_period = request_err_code(
        &mut stdin,
        &mut reader,
        "20",
        "quests.continue",
        json!({
            "questId": quest_id,
            "strategy": "all_tasks",
            "targetToken": "2025-Q2"
        }),
    );
    assert_eq!(same_period, "bad_params");

    let bad_token = request_err_code(
        &mut stdin,
        &mut reader,
        "21",
        "quests.continue",
        json!({
            "questId": quest_id,
            "strategy": "all_tasks",
            "targetToken": "soon"
        }),
    );
    assert_eq!(bad_token, "bad_params");

    let missing_quest = request_err_code(
        &mut stdin,
        &mut reader,
        "22",
        "quests.continue",
        json!({ "questId": "no-such-quest", "strategy": "all_tasks" }),
    );
    assert_eq!(missing_quest, "not_found");

    let bad_strategy = request_err_code(
        &mut stdin,
        &mut reader,
        "23",
        "quests.continue",
        json!({ "questId": quest_id, "strategy": "everything" }),
    );
    assert_eq!(bad_strategy, "bad_params");
}
