use crate::continuity::{create_continuation, select_carried_tasks, CarryStrategy, CarryTask};
use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{
    now_ts, parse_bool, parse_opt_string, parse_opt_string_array, required_str,
    strict_period_param, today,
};
use crate::ipc::types::{AppState, Request};
use crate::period::{format_period_token, next_period, parse_period_token, resolve_quarter, PeriodRef};
use rusqlite::{params, Connection, OptionalExtension};
use serde_json::{json, Value as JsonValue};
use std::collections::HashSet;
use uuid::Uuid;

use super::stats::STATS_RESOURCE;

pub const STATUS_ACTIVE: &str = "active";
pub const STATUS_COMPLETED: &str = "completed";
pub const STATUS_ABANDONED: &str = "abandoned";

pub fn validate_quest_status(status: &str) -> bool {
    matches!(status, STATUS_ACTIVE | STATUS_COMPLETED | STATUS_ABANDONED)
}

fn next_sort_order(conn: &Connection, year: i32, quarter: u8) -> Result<i64, String> {
    conn.query_row(
        "SELECT COALESCE(MAX(sort_order), -1) + 1 FROM quests WHERE year = ? AND quarter = ?",
        params![year, i64::from(quarter)],
        |r| r.get::<_, i64>(0),
    )
    .map(|v| v.max(0))
    .map_err(|e| e.to_string())
}

const QUEST_COLUMNS: &str = "id, year, quarter, title, detail, status, sort_order, archived, \
     source_id, is_continuation, strategy, continuation_date, created_at, updated_at";

fn quest_row_to_json(r: &rusqlite::Row<'_>) -> rusqlite::Result<JsonValue> {
    let year: i32 = r.get(1)?;
    let quarter: i64 = r.get(2)?;
    Ok(json!({
        "id": r.get::<_, String>(0)?,
        "year": year,
        "quarter": quarter,
        "token": format_period_token(PeriodRef { year, quarter: quarter as u8 }),
        "title": r.get::<_, String>(3)?,
        "detail": r.get::<_, String>(4)?,
        "status": r.get::<_, String>(5)?,
        "sortOrder": r.get::<_, i64>(6)?,
        "archived": r.get::<_, i64>(7)? != 0,
        "sourceId": r.get::<_, Option<String>>(8)?,
        "isContinuation": r.get::<_, i64>(9)? != 0,
        "strategy": r.get::<_, Option<String>>(10)?,
        "continuationDate": r.get::<_, Option<String>>(11)?,
        "createdAt": r.get::<_, Option<String>>(12)?,
        "updatedAt": r.get::<_, Option<String>>(13)?,
    }))
}

fn handle_create(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let period = match strict_period_param(req, "token") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let period = period.unwrap_or_else(|| resolve_quarter(today()));

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
    let detail = input
        .get("detail")
        .and_then(|v| v.as_str())
        .map(str::trim)
        .unwrap_or("")
        .to_string();
    let status = match input.get("status").and_then(|v| v.as_str()) {
        None => STATUS_ACTIVE.to_string(),
        Some(raw) => {
            let s = raw.trim().to_ascii_lowercase();
            if !validate_quest_status(&s) {
                return err(
                    &req.id,
                    "bad_params",
                    "status must be one of: active, completed, abandoned",
                    None,
                );
            }
            s
        }
    };

    let sort_order = match next_sort_order(conn, period.year, period.quarter) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e, None),
    };
    let quest_id = Uuid::new_v4().to_string();
    let ts = now_ts();
    if let Err(e) = conn.execute(
        "INSERT INTO quests(
            id, year, quarter, title, detail, status, sort_order, archived,
            source_id, is_continuation, strategy, continuation_date, created_at, updated_at
         ) VALUES(?, ?, ?, ?, ?, ?, ?, 0, NULL, 0, NULL, NULL, ?, ?)",
        params![
            quest_id,
            period.year,
            i64::from(period.quarter),
            title,
            detail,
            status,
            sort_order,
            ts,
            ts
        ],
    ) {
        return err(&req.id, "db_insert_failed", e.to_string(), None);
    }

    let token = format_period_token(period);
    state.cache.invalidate_scope(STATS_RESOURCE, &token);
    ok(&req.id, json!({ "questId": quest_id, "token": token }))
}

fn handle_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    // Read side: malformed tokens mean "show me the current quarter".
    let period = parse_period_token(req.params.get("token").and_then(|v| v.as_str()), today());
    let include_archived = match parse_bool(req.params.get("includeArchived"), false) {
        Ok(v) => v,
        Err(m) => return err(&req.id, "bad_params", format!("includeArchived {}", m), None),
    };

    let sql = if include_archived {
        format!(
            "SELECT {} FROM quests WHERE year = ? AND quarter = ? ORDER BY sort_order, id",
            QUEST_COLUMNS
        )
    } else {
        format!(
            "SELECT {} FROM quests WHERE year = ? AND quarter = ? AND archived = 0 ORDER BY sort_order, id",
            QUEST_COLUMNS
        )
    };
    let mut stmt = match conn.prepare(&sql) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let quests = match stmt.query_map(
        params![period.year, i64::from(period.quarter)],
        quest_row_to_json,
    ) {
        Ok(rows) => match rows.collect::<Result<Vec<_>, _>>() {
            Ok(v) => v,
            Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
        },
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    ok(
        &req.id,
        json!({ "token": format_period_token(period), "quests": quests }),
    )
}

fn handle_open(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let quest_id = match required_str(req, "questId") {
        Ok(v) => v,
        Err(e) => return e,
    };

    let quest = match conn
        .query_row(
            &format!("SELECT {} FROM quests WHERE id = ?", QUEST_COLUMNS),
            [&quest_id],
            quest_row_to_json,
        )
        .optional()
    {
        Ok(Some(v)) => v,
        Ok(None) => return err(&req.id, "not_found", "quest not found", None),
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    let mut task_stmt = match conn.prepare(
        "SELECT id, title, status, sort_order, source_id, is_continuation, continuation_date
         FROM tasks WHERE quest_id = ? ORDER BY sort_order, id",
    ) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let tasks = match task_stmt.query_map([&quest_id], |r| {
        Ok(json!({
            "id": r.get::<_, String>(0)?,
            "title": r.get::<_, String>(1)?,
            "status": r.get::<_, String>(2)?,
            "sortOrder": r.get::<_, i64>(3)?,
            "sourceId": r.get::<_, Option<String>>(4)?,
            "isContinuation": r.get::<_, i64>(5)? != 0,
            "continuationDate": r.get::<_, Option<String>>(6)?,
        }))
    }) {
        Ok(rows) => match rows.collect::<Result<Vec<_>, _>>() {
            Ok(v) => v,
            Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
        },
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    let mut ms_stmt = match conn.prepare(
        "SELECT id, title, target_date, status, source_id, is_continuation, continuation_date
         FROM milestones WHERE quest_id = ? ORDER BY sort_order, id",
    ) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let milestones = match ms_stmt.query_map([&quest_id], |r| {
        Ok(json!({
            "id": r.get::<_, String>(0)?,
            "title": r.get::<_, String>(1)?,
            "targetDate": r.get::<_, Option<String>>(2)?,
            "status": r.get::<_, String>(3)?,
            "sourceId": r.get::<_, Option<String>>(4)?,
            "isContinuation": r.get::<_, i64>(5)? != 0,
            "continuationDate": r.get::<_, Option<String>>(6)?,
        }))
    }) {
        Ok(rows) => match rows.collect::<Result<Vec<_>, _>>() {
            Ok(v) => v,
            Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
        },
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    ok(
        &req.id,
        json!({ "quest": quest, "tasks": tasks, "milestones": milestones }),
    )
}

pub fn quest_period(conn: &Connection, quest_id: &str) -> Result<Option<PeriodRef>, String> {
    conn.query_row(
        "SELECT year, quarter FROM quests WHERE id = ?",
        [quest_id],
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

fn handle_update(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let quest_id = match required_str(req, "questId") {
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
    let detail = match patch.get("detail") {
        None => None,
        Some(v) if v.is_null() => Some(String::new()),
        Some(v) => match v.as_str() {
            Some(s) => Some(s.trim().to_string()),
            None => return err(&req.id, "bad_params", "detail must be string or null", None),
        },
    };
    let status = match parse_opt_string(patch.get("status")) {
        Ok(v) => v.map(|s| s.to_ascii_lowercase()),
        Err(m) => return err(&req.id, "bad_params", format!("status {}", m), None),
    };
    if let Some(s) = &status {
        if !validate_quest_status(s) {
            return err(
                &req.id,
                "bad_params",
                "status must be one of: active, completed, abandoned",
                None,
            );
        }
    }

    let period = match quest_period(conn, &quest_id) {
        Ok(Some(p)) => p,
        Ok(None) => return err(&req.id, "not_found", "quest not found", None),
        Err(e) => return err(&req.id, "db_query_failed", e, None),
    };

    let result = conn.execute(
        "UPDATE quests SET
            title = COALESCE(?, title),
            detail = COALESCE(?, detail),
            status = COALESCE(?, status),
            updated_at = ?
         WHERE id = ?",
        params![title, detail, status, now_ts(), quest_id],
    );
    match result {
        Ok(0) => err(&req.id, "not_found", "quest not found", None),
        Ok(_) => {
            state
                .cache
                .invalidate_scope(STATS_RESOURCE, &format_period_token(period));
            ok(&req.id, json!({ "ok": true }))
        }
        Err(e) => err(&req.id, "db_update_failed", e.to_string(), None),
    }
}

fn handle_archive(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let quest_id = match required_str(req, "questId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let archived = match parse_bool(req.params.get("archived"), true) {
        Ok(v) => v,
        Err(m) => return err(&req.id, "bad_params", format!("archived {}", m), None),
    };

    let period = match quest_period(conn, &quest_id) {
        Ok(Some(p)) => p,
        Ok(None) => return err(&req.id, "not_found", "quest not found", None),
        Err(e) => return err(&req.id, "db_query_failed", e, None),
    };

    match conn.execute(
        "UPDATE quests SET archived = ?, updated_at = ? WHERE id = ?",
        params![if archived { 1 } else { 0 }, now_ts(), quest_id],
    ) {
        Ok(0) => err(&req.id, "not_found", "quest not found", None),
        Ok(_) => {
            state
                .cache
                .invalidate_scope(STATS_RESOURCE, &format_period_token(period));
            ok(&req.id, json!({ "ok": true }))
        }
        Err(e) => err(&req.id, "db_update_failed", e.to_string(), None),
    }
}

fn handle_continue(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let quest_id = match required_str(req, "questId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let strategy_raw = match required_str(req, "strategy") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let task_ids = match parse_opt_string_array(req.params.get("taskIds")) {
        Ok(v) => v,
        Err(m) => return err(&req.id, "bad_params", format!("taskIds {}", m), None),
    };
    let strategy = match CarryStrategy::parse(&strategy_raw, task_ids) {
        Ok(s) => s,
        Err(e) => return err(&req.id, &e.code, e.message, None),
    };
    let explicit_target = match strict_period_param(req, "targetToken") {
        Ok(v) => v,
        Err(e) => return e,
    };

    let source = match conn
        .query_row(
            "SELECT year, quarter, title, detail FROM quests WHERE id = ?",
            [&quest_id],
            |r| {
                Ok((
                    r.get::<_, i32>(0)?,
                    r.get::<_, i64>(1)?,
                    r.get::<_, String>(2)?,
                    r.get::<_, String>(3)?,
                ))
            },
        )
        .optional()
    {
        Ok(Some(row)) => row,
        Ok(None) => return err(&req.id, "not_found", "quest not found", None),
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let source_period = PeriodRef {
        year: source.0,
        quarter: source.1 as u8,
    };
    let target = explicit_target.unwrap_or_else(|| next_period(source_period));
    if target == source_period {
        return err(
            &req.id,
            "bad_params",
            "continuation must target a different period",
            None,
        );
    }

    let patch = match create_continuation(Some(&quest_id), Some(&strategy), today()) {
        Ok(p) => p,
        Err(e) => return err(&req.id, &e.code, e.message, None),
    };

    let mut task_stmt = match conn.prepare(
        "SELECT id, title, status FROM tasks WHERE quest_id = ? ORDER BY sort_order, id",
    ) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let task_rows = match task_stmt.query_map([&quest_id], |r| {
        Ok((
            r.get::<_, String>(0)?,
            r.get::<_, String>(1)?,
            r.get::<_, String>(2)?,
        ))
    }) {
        Ok(rows) => match rows.collect::<Result<Vec<_>, _>>() {
            Ok(v) => v,
            Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
        },
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    drop(task_stmt);

    let carry_tasks: Vec<CarryTask> = task_rows
        .iter()
        .map(|(id, _, status)| CarryTask {
            id: id.clone(),
            status: status.clone(),
        })
        .collect();
    let carried_ids: HashSet<&str> = select_carried_tasks(&strategy, &carry_tasks)
        .into_iter()
        .map(|t| t.id.as_str())
        .collect();

    let sort_order = match next_sort_order(conn, target.year, target.quarter) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e, None),
    };
    let ts = now_ts();
    let continuation_date = patch.continuation_date.format("%Y-%m-%d").to_string();
    let new_quest_id = Uuid::new_v4().to_string();

    let tx = match conn.unchecked_transaction() {
        Ok(t) => t,
        Err(e) => return err(&req.id, "db_tx_failed", e.to_string(), None),
    };

    if let Err(e) = tx.execute(
        "INSERT INTO quests(
            id, year, quarter, title, detail, status, sort_order, archived,
            source_id, is_continuation, strategy, continuation_date, created_at, updated_at
         ) VALUES(?, ?, ?, ?, ?, ?, ?, 0, ?, 1, ?, ?, ?, ?)",
        params![
            new_quest_id,
            target.year,
            i64::from(target.quarter),
            source.2,
            source.3,
            STATUS_ACTIVE,
            sort_order,
            patch.source_id,
            patch.strategy,
            continuation_date,
            ts,
            ts
        ],
    ) {
        let _ = tx.rollback();
        return err(&req.id, "db_insert_failed", e.to_string(), None);
    }

    let mut carried_count = 0usize;
    for (task_id, title, status) in task_rows
        .iter()
        .filter(|(id, _, _)| carried_ids.contains(id.as_str()))
    {
        let new_task_id = Uuid::new_v4().to_string();
        if let Err(e) = tx.execute(
            "INSERT INTO tasks(
                id, quest_id, title, status, sort_order,
                source_id, is_continuation, continuation_date, created_at, updated_at
             ) VALUES(?, ?, ?, ?, ?, ?, 1, ?, ?, ?)",
            params![
                new_task_id,
                new_quest_id,
                title,
                status,
                carried_count as i64,
                task_id,
                continuation_date,
                ts,
                ts
            ],
        ) {
            let _ = tx.rollback();
            return err(&req.id, "db_insert_failed", e.to_string(), None);
        }
        carried_count += 1;
    }

    if let Err(e) = tx.commit() {
        return err(&req.id, "db_commit_failed", e.to_string(), None);
    }

    let target_token = format_period_token(target);
    state.cache.invalidate_scope(STATS_RESOURCE, &target_token);
    ok(
        &req.id,
        json!({
            "questId": new_quest_id,
            "token": target_token,
            "carriedTaskCount": carried_count,
        }),
    )
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "quests.create" => Some(handle_create(state, req)),
        "quests.list" => Some(handle_list(state, req)),
        "quests.open" => Some(handle_open(state, req)),
        "quests.update" => Some(handle_update(state, req)),
        "quests.archive" => Some(handle_archive(state, req)),
        "quests.continue" => Some(handle_continue(state, req)),
        _ => None,
    }
}
