use crate::db;
use crate::ipc::error::{err, ok};
use crate::ipc::types::{AppState, Request};
use serde_json::{json, Map, Value};

#[derive(Clone, Copy)]
enum SetupSection {
    View,
    Pomodoro,
    Planner,
}

impl SetupSection {
    fn parse(s: &str) -> Option<Self> {
        match s {
            "view" => Some(Self::View),
            "pomodoro" => Some(Self::Pomodoro),
            "planner" => Some(Self::Planner),
            _ => None,
        }
    }

    fn key(self) -> &'static str {
        match self {
            Self::View => "setup.view",
            Self::Pomodoro => "setup.pomodoro",
            Self::Planner => "setup.planner",
        }
    }
}

fn default_section(section: SetupSection) -> Value {
    match section {
        SetupSection::View => json!({
            "viewMode": "board",
            "theme": "system",
            "language": "en",
            "sidebarCollapsed": false
        }),
        SetupSection::Pomodoro => json!({
            "focusMinutes": 25,
            "shortBreakMinutes": 5,
            "longBreakMinutes": 15,
            "cyclesPerLongBreak": 4,
            "autoStartNext": false
        }),
        SetupSection::Planner => json!({
            "defaultRadius": 4,
            "showArchivedByDefault": false,
            "defaultCarryStrategy": "incomplete_tasks_only"
        }),
    }
}

fn as_object_mut(value: &mut Value) -> Result<&mut Map<String, Value>, String> {
    value
        .as_object_mut()
        .ok_or_else(|| "internal setup object must be a JSON object".to_string())
}

fn parse_bool(v: &Value, key: &str) -> Result<bool, String> {
    v.as_bool()
        .ok_or_else(|| format!("{} must be boolean", key))
}

fn parse_i64_range(v: &Value, key: &str, min: i64, max: i64) -> Result<i64, String> {
    let n = v
        .as_i64()
        .ok_or_else(|| format!("{} must be integer", key))?;
    if !(min..=max).contains(&n) {
        return Err(format!("{} must be in {}..={}", key, min, max));
    }
    Ok(n)
}

fn parse_string_max(v: &Value, key: &str, max_len: usize) -> Result<String, String> {
    let s = v.as_str().ok_or_else(|| format!("{} must be string", key))?;
    let s = s.trim();
    if s.len() > max_len {
        return Err(format!("{} length must be <= {}", key, max_len));
    }
    Ok(s.to_string())
}

fn merge_section_patch(
    section: SetupSection,
    current: &mut Value,
    patch: &Map<String, Value>,
) -> Result<(), String> {
    let obj = as_object_mut(current)?;
    for (k, v) in patch {
        match section {
            SetupSection::View => match k.as_str() {
                "viewMode" => {
                    let s = parse_string_max(v, k, 16)?.to_ascii_lowercase();
                    if s != "board" && s != "list" && s != "timeline" {
                        return Err("viewMode must be one of: board, list, timeline".into());
                    }
                    obj.insert(k.clone(), Value::String(s));
                }
                "theme" => {
                    let s = parse_string_max(v, k, 16)?.to_ascii_lowercase();
                    if s != "light" && s != "dark" && s != "system" {
                        return Err("theme must be one of: light, dark, system".into());
                    }
                    obj.insert(k.clone(), Value::String(s));
                }
                "language" => {
                    let s = parse_string_max(v, k, 8)?.to_ascii_lowercase();
                    if s.is_empty() {
                        return Err("language must not be empty".into());
                    }
                    obj.insert(k.clone(), Value::String(s));
                }
                "sidebarCollapsed" => {
                    obj.insert(k.clone(), Value::Bool(parse_bool(v, k)?));
                }
                _ => return Err(format!("unknown view field: {}", k)),
            },
            SetupSection::Pomodoro => match k.as_str() {
                "focusMinutes" => {
                    obj.insert(k.clone(), Value::from(parse_i64_range(v, k, 5, 120)?));
                }
                "shortBreakMinutes" => {
                    obj.insert(k.clone(), Value::from(parse_i64_range(v, k, 1, 60)?));
                }
                "longBreakMinutes" => {
                    obj.insert(k.clone(), Value::from(parse_i64_range(v, k, 5, 120)?));
                }
                "cyclesPerLongBreak" => {
                    obj.insert(k.clone(), Value::from(parse_i64_range(v, k, 1, 12)?));
                }
                "autoStartNext" => {
                    obj.insert(k.clone(), Value::Bool(parse_bool(v, k)?));
                }
                _ => return Err(format!("unknown pomodoro field: {}", k)),
            },
            SetupSection::Planner => match k.as_str() {
                "defaultRadius" => {
                    obj.insert(k.clone(), Value::from(parse_i64_range(v, k, 1, 12)?));
                }
                "showArchivedByDefault" => {
                    obj.insert(k.clone(), Value::Bool(parse_bool(v, k)?));
                }
                "defaultCarryStrategy" => {
                    let s = parse_string_max(v, k, 32)?.to_ascii_lowercase();
                    if s != "incomplete_tasks_only" && s != "all_tasks" && s != "custom" {
                        return Err(
                            "defaultCarryStrategy must be one of: incomplete_tasks_only, all_tasks, custom"
                                .into(),
                        );
                    }
                    obj.insert(k.clone(), Value::String(s));
                }
                _ => return Err(format!("unknown planner field: {}", k)),
            },
        }
    }
    Ok(())
}

fn load_section(conn: &rusqlite::Connection, section: SetupSection) -> anyhow::Result<Value> {
    let mut current = default_section(section);
    if let Some(saved) = db::settings_get_json(conn, section.key())? {
        if let Some(saved_obj) = saved.as_object() {
            // Best-effort apply: malformed historical values should not block setup UI.
            let _ = merge_section_patch(section, &mut current, saved_obj);
        }
    }
    Ok(current)
}

fn handle_setup_get(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let view = match load_section(conn, SetupSection::View) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let pomodoro = match load_section(conn, SetupSection::Pomodoro) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let planner = match load_section(conn, SetupSection::Planner) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    ok(
        &req.id,
        json!({
            "view": view,
            "pomodoro": pomodoro,
            "planner": planner
        }),
    )
}

fn handle_setup_update(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let Some(section_raw) = req.params.get("section").and_then(|v| v.as_str()) else {
        return err(&req.id, "bad_params", "missing section", None);
    };
    let Some(section) = SetupSection::parse(section_raw) else {
        return err(&req.id, "bad_params", "unknown section", None);
    };
    let Some(patch_obj) = req.params.get("patch").and_then(|v| v.as_object()) else {
        return err(&req.id, "bad_params", "patch must be an object", None);
    };

    let mut current = match load_section(conn, section) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    if let Err(msg) = merge_section_patch(section, &mut current, patch_obj) {
        return err(&req.id, "bad_params", msg, None);
    }
    if let Err(e) = db::settings_set_json(conn, section.key(), &current) {
        return err(&req.id, "db_update_failed", e.to_string(), None);
    }
    ok(&req.id, json!({ "ok": true }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "setup.get" => Some(handle_setup_get(state, req)),
        "setup.update" => Some(handle_setup_update(state, req)),
        _ => None,
    }
}
