use crate::continuity::{STATUS_DOING, STATUS_DONE, STATUS_TODO};
use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{now_ts, parse_opt_string, required_str};
use crate::ipc::types::{AppState, Request};
use crate::period::{format_period_token, PeriodRef};
use rusqlite::{params, Connection, OptionalExtension};
use serde_json::json;
use uuid::Uuid;

use super::quests::quest_period;
use super::stats::STATS_RESOURCE;

pub fn validate_task_status(status: &str) -> bool {
    matches!(status, STATUS_TODO | STATUS_DOING | STATUS_DONE)
}

fn task_quest_period(conn: &Connection, task_id: &str) -> Result<Option<PeriodRef>, String> {
    conn.query_row(
        "SELECT q.year, q.quarter FROM tasks t JOIN quests q ON q.id = t.quest_id WHERE t.id = ?",
        [task_id],
        |r| {
            Ok(PeriodRef {
                year: r.get(0)?,
                quarter: r.get::<_, i64>(1)? as u8,
            })
        },
    )
    .optional()
    .map_err(|e| e.to_string())
}

fn next_sort_order(conn: &Connection, quest_id: &str) -> Result<i64, String> {
    conn.query_row(
        "SELECT COALESCE(MAX(sort_order), -1) + 1 FROM tasks WHERE quest_id = ?",
        [quest_id],
        |r| r.get::<_, i64>(0),
    )
    .map(|v| v.max(0))
    .map_err(|e| e.to_string())
}

fn handle_create(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let quest_id = match required_str(req, "questId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let Some(input) = req.params.get("input").and_then(|v| v.as_object()) else {
        return err(&req.id, "bad_params", "input must be an object", None);
    };
    let Some(title) = input
        .get("title")
        .and_then(|v| v.as_str())
        .map(str::trim)
        .filter(|s| !s.is_empty())
    else {
        return err(&req.id, "bad_params", "missing input.title", None);
    };
    let status = match input.get("status").and_then(|v| v.as_str()) {
        None => STATUS_TODO.to_string(),
        Some(raw) => {
            let s = raw.trim().to_ascii_lowercase();
            if !validate_task_status(&s) {
                return err(
                    &req.id,
                    "bad_params",
                    "status must be one of: todo, doing, done",
                    None,
                );
            }
            s
        }
    };

    let period = match quest_period(conn, &quest_id) {
        Ok(Some(p)) => p,
        Ok(None) => return err(&req.id, "not_found", "quest not found", None),
        Err(e) => return err(&req.id, "db_query_failed", e, None),
    };

    let sort_order = match next_sort_order(conn, &quest_id) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e, None),
    };
    let task_id = Uuid::new_v4().to_string();
    let ts = now_ts();
    if let Err(e) = conn.execute(
        "INSERT INTO tasks(
            id, quest_id, title, status, sort_order,
            source_id, is_continuation, continuation_date, created_at, updated_at
         ) VALUES(?, ?, ?, ?, ?, NULL, 0, NULL, ?, ?)",
        params![task_id, quest_id, title, status, sort_order, ts, ts],
    ) {
        return err(&req.id, "db_insert_failed", e.to_string(), None);
    }

    state
        .cache
        .invalidate_scope(STATS_RESOURCE, &format_period_token(period));
    ok(&req.id, json!({ "taskId": task_id }))
}

fn handle_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let quest_id = match required_str(req, "questId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    match quest_period(conn, &quest_id) {
        Ok(Some(_)) => {}
        Ok(None) => return err(&req.id, "not_found", "quest not found", None),
        Err(e) => return err(&req.id, "db_query_failed", e, None),
    }

    let mut stmt = match conn.prepare(
        "SELECT id, title, status, sort_order, source_id, is_continuation, continuation_date,
                created_at, updated_at
         FROM tasks WHERE quest_id = ? ORDER BY sort_order, id",
    ) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let tasks = match stmt.query_map([&quest_id], |r| {
        Ok(json!({
            "id": r.get::<_, String>(0)?,
            "title": r.get::<_, String>(1)?,
            "status": r.get::<_, String>(2)?,
            "sortOrder": r.get::<_, i64>(3)?,
            "sourceId": r.get::<_, Option<String>>(4)?,
            "isContinuation": r.get::<_, i64>(5)? != 0,
            "continuationDate": r.get::<_, Option<String>>(6)?,
            "createdAt": r.get::<_, Option<String>>(7)?,
            "updatedAt": r.get::<_, Option<String>>(8)?,
        }))
    }) {
        Ok(rows) => match rows.collect::<Result<Vec<_>, _>>() {
            Ok(v) => v,
            Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
        },
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    ok(&req.id, json!({ "tasks": tasks }))
}

fn handle_update(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let task_id = match required_str(req, "taskId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let Some(patch) = req.params.get("patch").and_then(|v| v.as_object()) else {
        return err(&req.id, "bad_params", "patch must be an object", None);
    };
    let title = match parse_opt_string(patch.get("title")) {
        Ok(v) => v,
        Err(m) => return err(&req.id, "bad_params", format!("title {}", m), None),
    };

    let period = match task_quest_period(conn, &task_id) {
        Ok(Some(p)) => p,
        Ok(None) => return err(&req.id, "not_found", "task not found", None),
        Err(e) => return err(&req.id, "db_query_failed", e, None),
    };

    match conn.execute(
        "UPDATE tasks SET title = COALESCE(?, title), updated_at = ? WHERE id = ?",
        params![title, now_ts(), task_id],
    ) {
        Ok(0) => err(&req.id, "not_found", "task not found", None),
        Ok(_) => {
            state
                .cache
                .invalidate_scope(STATS_RESOURCE, &format_period_token(period));
            ok(&req.id, json!({ "ok": true }))
        }
        Err(e) => err(&req.id, "db_update_failed", e.to_string(), None),
    }
}

fn handle_set_status(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let task_id = match required_str(req, "taskId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let status = match required_str(req, "status") {
        Ok(v) => v.to_ascii_lowercase(),
        Err(e) => return e,
    };
    if !validate_task_status(&status) {
        return err(
            &req.id,
            "bad_params",
            "status must be one of: todo, doing, done",
            None,
        );
    }

    let period = match task_quest_period(conn, &task_id) {
        Ok(Some(p)) => p,
        Ok(None) => return err(&req.id, "not_found", "task not found", None),
        Err(e) => return err(&req.id, "db_query_failed", e, None),
    };

    match conn.execute(
        "UPDATE tasks SET status = ?, updated_at = ? WHERE id = ?",
        params![status, now_ts(), task_id],
    ) {
        Ok(0) => err(&req.id, "not_found", "task not found", None),
        Ok(_) => {
            state
                .cache
                .invalidate_scope(STATS_RESOURCE, &format_period_token(period));
            ok(&req.id, json!({ "ok": true }))
        }
        Err(e) => err(&req.id, "db_update_failed", e.to_string(), None),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "tasks.create" => Some(handle_create(state, req)),
        "tasks.list" => Some(handle_list(state, req)),
        "tasks.update" => Some(handle_update(state, req)),
        "tasks.setStatus" => Some(handle_set_status(state, req)),
        _ => None,
    }
}
