use crate::continuity::create_continuation;
use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{now_ts, parse_opt_string, required_str, strict_period_param, today};
use crate::ipc::types::{AppState, Request};
use crate::period::{
    date_from_week, format_period_token, next_period, parse_period_token, quarter_week_band,
    resolve_quarter, PeriodRef,
};
use chrono::{Duration as ChronoDuration, NaiveDate};
use rusqlite::{params, Connection, OptionalExtension};
use serde_json::{json, Value as JsonValue};
use uuid::Uuid;

use super::stats::STATS_RESOURCE;

pub const STATUS_OPEN: &str = "open";
pub const STATUS_REACHED: &str = "reached";
pub const STATUS_DROPPED: &str = "dropped";

pub fn validate_milestone_status(status: &str) -> bool {
    matches!(status, STATUS_OPEN | STATUS_REACHED | STATUS_DROPPED)
}

fn period_start(p: PeriodRef) -> NaiveDate {
    let (start_week, _) = quarter_week_band(p.quarter);
    date_from_week(p.year, i64::from(start_week), 1)
}

fn shift_iso_date(value: Option<String>, day_offset: i64) -> Option<String> {
    let Some(raw) = value else {
        return None;
    };
    let trimmed = raw.trim();
    if trimmed.is_empty() || day_offset == 0 {
        return if trimmed.is_empty() { None } else { Some(trimmed.to_string()) };
    }
    match NaiveDate::parse_from_str(trimmed, "%Y-%m-%d") {
        Ok(date) => Some(
            (date + ChronoDuration::days(day_offset))
                .format("%Y-%m-%d")
                .to_string(),
        ),
        Err(_) => Some(trimmed.to_string()),
    }
}

fn parse_opt_iso_date(v: Option<&JsonValue>) -> Result<Option<String>, String> {
    match parse_opt_string(v) {
        Err(m) => Err(m.to_string()),
        Ok(None) => Ok(None),
        Ok(Some(s)) => match NaiveDate::parse_from_str(&s, "%Y-%m-%d") {
            Ok(_) => Ok(Some(s)),
            Err(_) => Err("must be an ISO date (YYYY-MM-DD)".to_string()),
        },
    }
}

fn next_sort_order(conn: &Connection, year: i32, quarter: u8) -> Result<i64, String> {
    conn.query_row(
        "SELECT COALESCE(MAX(sort_order), -1) + 1 FROM milestones WHERE year = ? AND quarter = ?",
        params![year, i64::from(quarter)],
        |r| r.get::<_, i64>(0),
    )
    .map(|v| v.max(0))
    .map_err(|e| e.to_string())
}

fn milestone_row_to_json(r: &rusqlite::Row<'_>) -> rusqlite::Result<JsonValue> {
    let year: i32 = r.get(1)?;
    let quarter: i64 = r.get(2)?;
    Ok(json!({
        "id": r.get::<_, String>(0)?,
        "year": year,
        "quarter": quarter,
        "token": format_period_token(PeriodRef { year, quarter: quarter as u8 }),
        "questId": r.get::<_, Option<String>>(3)?,
        "title": r.get::<_, String>(4)?,
        "targetDate": r.get::<_, Option<String>>(5)?,
        "status": r.get::<_, String>(6)?,
        "sortOrder": r.get::<_, i64>(7)?,
        "sourceId": r.get::<_, Option<String>>(8)?,
        "isContinuation": r.get::<_, i64>(9)? != 0,
        "continuationDate": r.get::<_, Option<String>>(10)?,
    }))
}

const MILESTONE_COLUMNS: &str = "id, year, quarter, quest_id, title, target_date, status, \
     sort_order, source_id, is_continuation, continuation_date";

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
    let target_date = match parse_opt_iso_date(input.get("targetDate")) {
        Ok(v) => v,
        Err(m) => return err(&req.id, "bad_params", format!("targetDate {}", m), None),
    };
    let quest_id = match parse_opt_string(input.get("questId")) {
        Ok(v) => v,
        Err(m) => return err(&req.id, "bad_params", format!("questId {}", m), None),
    };
    if let Some(qid) = &quest_id {
        let exists = conn
            .query_row("SELECT 1 FROM quests WHERE id = ? LIMIT 1", [qid], |_r| {
                Ok(())
            })
            .optional();
        match exists {
            Ok(Some(())) => {}
            Ok(None) => return err(&req.id, "not_found", "quest not found", None),
            Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
        }
    }

    let sort_order = match next_sort_order(conn, period.year, period.quarter) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e, None),
    };
    let milestone_id = Uuid::new_v4().to_string();
    let ts = now_ts();
    if let Err(e) = conn.execute(
        "INSERT INTO milestones(
            id, year, quarter, quest_id, title, target_date, status, sort_order,
            source_id, is_continuation, continuation_date, created_at, updated_at
         ) VALUES(?, ?, ?, ?, ?, ?, ?, ?, NULL, 0, NULL, ?, ?)",
        params![
            milestone_id,
            period.year,
            i64::from(period.quarter),
            quest_id,
            title,
            target_date,
            STATUS_OPEN,
            sort_order,
            ts,
            ts
        ],
    ) {
        return err(&req.id, "db_insert_failed", e.to_string(), None);
    }

    let token = format_period_token(period);
    state.cache.invalidate_scope(STATS_RESOURCE, &token);
    ok(&req.id, json!({ "milestoneId": milestone_id, "token": token }))
}

fn handle_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    // Read side: malformed tokens mean "show me the current quarter".
    let period = parse_period_token(req.params.get("token").and_then(|v| v.as_str()), today());

    let mut stmt = match conn.prepare(&format!(
        "SELECT {} FROM milestones WHERE year = ? AND quarter = ? ORDER BY sort_order, id",
        MILESTONE_COLUMNS
    )) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let milestones = match stmt.query_map(
        params![period.year, i64::from(period.quarter)],
        milestone_row_to_json,
    ) {
        Ok(rows) => match rows.collect::<Result<Vec<_>, _>>() {
            Ok(v) => v,
            Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
        },
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    ok(
        &req.id,
        json!({ "token": format_period_token(period), "milestones": milestones }),
    )
}

fn handle_update(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let milestone_id = match required_str(req, "milestoneId") {
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
    let target_date = match parse_opt_iso_date(patch.get("targetDate")) {
        Ok(v) => v,
        Err(m) => return err(&req.id, "bad_params", format!("targetDate {}", m), None),
    };
    let status = match parse_opt_string(patch.get("status")) {
        Ok(v) => v.map(|s| s.to_ascii_lowercase()),
        Err(m) => return err(&req.id, "bad_params", format!("status {}", m), None),
    };
    if let Some(s) = &status {
        if !validate_milestone_status(s) {
            return err(
                &req.id,
                "bad_params",
                "status must be one of: open, reached, dropped",
                None,
            );
        }
    }

    let period = match conn
        .query_row(
            "SELECT year, quarter FROM milestones WHERE id = ?",
            [&milestone_id],
            |r| {
                Ok(PeriodRef {
                    year: r.get(0)?,
                    quarter: r.get::<_, i64>(1)? as u8,
                })
            },
        )
        .optional()
    {
        Ok(Some(p)) => p,
        Ok(None) => return err(&req.id, "not_found", "milestone not found", None),
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    match conn.execute(
        "UPDATE milestones SET
            title = COALESCE(?, title),
            target_date = COALESCE(?, target_date),
            status = COALESCE(?, status),
            updated_at = ?
         WHERE id = ?",
        params![title, target_date, status, now_ts(), milestone_id],
    ) {
        Ok(0) => err(&req.id, "not_found", "milestone not found", None),
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
    let milestone_id = match required_str(req, "milestoneId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let explicit_target = match strict_period_param(req, "targetToken") {
        Ok(v) => v,
        Err(e) => return e,
    };

    let source = match conn
        .query_row(
            "SELECT year, quarter, quest_id, title, target_date FROM milestones WHERE id = ?",
            [&milestone_id],
            |r| {
                Ok((
                    r.get::<_, i32>(0)?,
                    r.get::<_, i64>(1)?,
                    r.get::<_, Option<String>>(2)?,
                    r.get::<_, String>(3)?,
                    r.get::<_, Option<String>>(4)?,
                ))
            },
        )
        .optional()
    {
        Ok(Some(row)) => row,
        Ok(None) => return err(&req.id, "not_found", "milestone not found", None),
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

    let patch = match create_continuation(Some(&milestone_id), None, today()) {
        Ok(p) => p,
        Err(e) => return err(&req.id, &e.code, e.message, None),
    };

    // Keep the milestone at the same point within its quarter.
    let day_offset = (period_start(target) - period_start(source_period)).num_days();
    let shifted_target_date = shift_iso_date(source.4.clone(), day_offset);

    let sort_order = match next_sort_order(conn, target.year, target.quarter) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e, None),
    };
    let new_milestone_id = Uuid::new_v4().to_string();
    let ts = now_ts();
    if let Err(e) = conn.execute(
        "INSERT INTO milestones(
            id, year, quarter, quest_id, title, target_date, status, sort_order,
            source_id, is_continuation, continuation_date, created_at, updated_at
         ) VALUES(?, ?, ?, ?, ?, ?, ?, ?, ?, 1, ?, ?, ?)",
        params![
            new_milestone_id,
            target.year,
            i64::from(target.quarter),
            source.2,
            source.3,
            shifted_target_date,
            STATUS_OPEN,
            sort_order,
            patch.source_id,
            patch.continuation_date.format("%Y-%m-%d").to_string(),
            ts,
            ts
        ],
    ) {
        return err(&req.id, "db_insert_failed", e.to_string(), None);
    }

    let target_token = format_period_token(target);
    state.cache.invalidate_scope(STATS_RESOURCE, &target_token);
    ok(
        &req.id,
        json!({
            "milestoneId": new_milestone_id,
            "token": target_token,
            "targetDate": shifted_target_date,
        }),
    )
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "milestones.create" => Some(handle_create(state, req)),
        "milestones.list" => Some(handle_list(state, req)),
        "milestones.update" => Some(handle_update(state, req)),
        "milestones.continue" => Some(handle_continue(state, req)),
        _ => None,
    }
}
