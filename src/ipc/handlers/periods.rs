use crate::db;
use crate::ipc::error::{err, ok};
use crate::ipc::helpers::today;
use crate::ipc::types::{AppState, Request};
use crate::period::{
    build_resolved_period, enumerate_periods, format_period_token, next_period,
    parse_period_token, previous_period, PeriodRef, ResolvedPeriod,
};
use serde_json::{json, Value as JsonValue};

const DEFAULT_RADIUS: i64 = 4;
const MAX_RADIUS: i64 = 12;

fn token_param(req: &Request) -> Option<String> {
    req.params
        .get("token")
        .and_then(|v| v.as_str())
        .map(|s| s.to_string())
}

pub fn period_json(p: &ResolvedPeriod) -> JsonValue {
    json!({
        "year": p.year,
        "quarter": p.quarter,
        "startWeek": p.start_week,
        "endWeek": p.end_week,
        "startDate": p.start_date.format("%Y-%m-%d").to_string(),
        "endDate": p.end_date.format("%Y-%m-%d").to_string(),
        "label": p.label,
        "isCurrent": p.is_current,
        "token": format_period_token(PeriodRef { year: p.year, quarter: p.quarter }),
    })
}

fn handle_resolve(_state: &mut AppState, req: &Request) -> serde_json::Value {
    let now = today();
    let token = token_param(req);
    let p = parse_period_token(token.as_deref(), now);
    let resolved = build_resolved_period(p.year, p.quarter, now);
    ok(
        &req.id,
        json!({
            "token": format_period_token(p),
            "period": period_json(&resolved),
        }),
    )
}

fn handle_navigate(_state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(direction) = req.params.get("direction").and_then(|v| v.as_str()) else {
        return err(&req.id, "bad_params", "missing direction", None);
    };
    let now = today();
    let token = token_param(req);
    let from = parse_period_token(token.as_deref(), now);
    let to = match direction {
        "previous" => previous_period(from),
        "next" => next_period(from),
        _ => {
            return err(
                &req.id,
                "bad_params",
                "direction must be one of: previous, next",
                None,
            )
        }
    };
    let resolved = build_resolved_period(to.year, to.quarter, now);
    ok(
        &req.id,
        json!({
            "token": format_period_token(to),
            "period": period_json(&resolved),
        }),
    )
}

fn saved_default_radius(state: &AppState) -> Option<i64> {
    let conn = state.db.as_ref()?;
    db::settings_get_json(conn, "setup.planner")
        .ok()
        .flatten()
        .and_then(|v| v.get("defaultRadius").and_then(|r| r.as_i64()))
        .filter(|r| (1..=MAX_RADIUS).contains(r))
}

fn handle_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let radius = match req.params.get("radius") {
        None => None,
        Some(v) if v.is_null() => None,
        Some(v) => match v.as_i64().filter(|r| (1..=MAX_RADIUS).contains(r)) {
            Some(r) => Some(r),
            None => {
                return err(
                    &req.id,
                    "bad_params",
                    format!("radius must be an integer in 1..={}", MAX_RADIUS),
                    None,
                )
            }
        },
    };
    let radius = radius
        .or_else(|| saved_default_radius(state))
        .unwrap_or(DEFAULT_RADIUS);

    let now = today();
    let token = token_param(req);
    let center = parse_period_token(token.as_deref(), now);
    let periods: Vec<JsonValue> = enumerate_periods(center, radius as usize)
        .into_iter()
        .map(|p| period_json(&build_resolved_period(p.year, p.quarter, now)))
        .collect();

    ok(
        &req.id,
        json!({
            "centerToken": format_period_token(center),
            "periods": periods,
        }),
    )
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "periods.resolve" => Some(handle_resolve(state, req)),
        "periods.navigate" => Some(handle_navigate(state, req)),
        "periods.list" => Some(handle_list(state, req)),
        _ => None,
    }
}
