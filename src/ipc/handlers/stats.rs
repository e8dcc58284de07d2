use crate::cache::CacheKey;
use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{parse_bool, today};
use crate::ipc::types::{AppState, Request};
use crate::period::{format_period_token, parse_period_token};
use rusqlite::{params, Connection};
use serde_json::json;
use std::collections::HashMap;

pub const STATS_RESOURCE: &str = "stats.periodSummary";

fn status_counts(
    conn: &Connection,
    sql: &str,
    year: i32,
    quarter: i64,
) -> Result<HashMap<String, i64>, String> {
    let mut stmt = conn.prepare(sql).map_err(|e| e.to_string())?;
    let rows = stmt
        .query_map(params![year, quarter], |r| {
            Ok((r.get::<_, String>(0)?, r.get::<_, i64>(1)?))
        })
        .map_err(|e| e.to_string())?;
    let mut out = HashMap::new();
    for row in rows {
        let (status, count) = row.map_err(|e| e.to_string())?;
        out.insert(status, count);
    }
    Ok(out)
}

fn scalar_count(conn: &Connection, sql: &str, year: i32, quarter: i64) -> Result<i64, String> {
    conn.query_row(sql, params![year, quarter], |r| r.get(0))
        .map_err(|e| e.to_string())
}

fn handle_period_summary(state: &mut AppState, req: &Request) -> serde_json::Value {
    let include_archived = match parse_bool(req.params.get("includeArchived"), false) {
        Ok(v) => v,
        Err(m) => return err(&req.id, "bad_params", format!("includeArchived {}", m), None),
    };
    let now = today();
    let raw_token = req.params.get("token").and_then(|v| v.as_str());
    let period = parse_period_token(raw_token, now);
    let token = format_period_token(period);
    let cache_key = CacheKey::new(
        STATS_RESOURCE,
        token.clone(),
        format!("includeArchived={}", include_archived),
    );

    if let Some(cached) = state.cache.get(&cache_key) {
        return ok(&req.id, cached.clone());
    }

    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let year = period.year;
    let quarter = i64::from(period.quarter);
    let archived_clause = if include_archived { "" } else { " AND archived = 0" };
    let quest_join_clause = if include_archived {
        ""
    } else {
        " AND q.archived = 0"
    };

    let quest_counts = match status_counts(
        conn,
        &format!(
            "SELECT status, COUNT(*) FROM quests WHERE year = ? AND quarter = ?{} GROUP BY status",
            archived_clause
        ),
        year,
        quarter,
    ) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e, None),
    };
    let quest_continuations = match scalar_count(
        conn,
        &format!(
            "SELECT COUNT(*) FROM quests WHERE year = ? AND quarter = ? AND is_continuation = 1{}",
            archived_clause
        ),
        year,
        quarter,
    ) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e, None),
    };

    let task_counts = match status_counts(
        conn,
        &format!(
            "SELECT t.status, COUNT(*) FROM tasks t JOIN quests q ON q.id = t.quest_id
             WHERE q.year = ? AND q.quarter = ?{} GROUP BY t.status",
            quest_join_clause
        ),
        year,
        quarter,
    ) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e, None),
    };
    let carried_tasks = match scalar_count(
        conn,
        &format!(
            "SELECT COUNT(*) FROM tasks t JOIN quests q ON q.id = t.quest_id
             WHERE q.year = ? AND q.quarter = ? AND t.is_continuation = 1{}",
            quest_join_clause
        ),
        year,
        quarter,
    ) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e, None),
    };

    let milestone_counts = match status_counts(
        conn,
        "SELECT status, COUNT(*) FROM milestones WHERE year = ? AND quarter = ? GROUP BY status",
        year,
        quarter,
    ) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e, None),
    };
    let carried_milestones = match scalar_count(
        conn,
        "SELECT COUNT(*) FROM milestones WHERE year = ? AND quarter = ? AND is_continuation = 1",
        year,
        quarter,
    ) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e, None),
    };

    let count = |map: &HashMap<String, i64>, key: &str| map.get(key).copied().unwrap_or(0);
    let quest_total: i64 = quest_counts.values().sum();
    let task_total: i64 = task_counts.values().sum();
    let milestone_total: i64 = milestone_counts.values().sum();

    let summary = json!({
        "token": token,
        "quests": {
            "total": quest_total,
            "active": count(&quest_counts, "active"),
            "completed": count(&quest_counts, "completed"),
            "abandoned": count(&quest_counts, "abandoned"),
            "continuations": quest_continuations,
        },
        "tasks": {
            "total": task_total,
            "todo": count(&task_counts, "todo"),
            "doing": count(&task_counts, "doing"),
            "done": count(&task_counts, "done"),
            "carried": carried_tasks,
        },
        "milestones": {
            "total": milestone_total,
            "open": count(&milestone_counts, "open"),
            "reached": count(&milestone_counts, "reached"),
            "dropped": count(&milestone_counts, "dropped"),
            "carried": carried_milestones,
        },
    });

    state.cache.put(cache_key, summary.clone());
    ok(&req.id, summary)
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "stats.periodSummary" => Some(handle_period_summary(state, req)),
        _ => None,
    }
}
