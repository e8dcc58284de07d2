use crate::ipc::error::err;
use crate::ipc::types::Request;
use crate::period::{try_parse_period_token, PeriodRef};
use chrono::{Local, NaiveDate};
use serde_json::Value as JsonValue;
use std::time::{SystemTime, UNIX_EPOCH};

/// One clock read per request; every period computation in a handler
/// shares the date it captured here.
pub fn today() -> NaiveDate {
    Local::now().date_naive()
}

pub fn now_ts() -> String {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs().to_string())
        .unwrap_or_else(|_| "0".to_string())
}

pub fn required_str(req: &Request, key: &str) -> Result<String, serde_json::Value> {
    req.params
        .get(key)
        .and_then(|v| v.as_str())
        .map(|v| v.trim().to_string())
        .filter(|s| !s.is_empty())
        .ok_or_else(|| err(&req.id, "bad_params", format!("missing {}", key), None))
}

pub fn parse_bool(v: Option<&JsonValue>, default: bool) -> Result<bool, &'static str> {
    match v {
        None => Ok(default),
        Some(v) if v.is_null() => Ok(default),
        Some(v) => v.as_bool().ok_or("must be boolean"),
    }
}

pub fn parse_opt_string(v: Option<&JsonValue>) -> Result<Option<String>, &'static str> {
    match v {
        None => Ok(None),
        Some(v) if v.is_null() => Ok(None),
        Some(v) => {
            let s = v.as_str().ok_or("must be string or null")?.trim().to_string();
            if s.is_empty() {
                Ok(None)
            } else {
                Ok(Some(s))
            }
        }
    }
}

pub fn parse_opt_string_array(v: Option<&JsonValue>) -> Result<Option<Vec<String>>, &'static str> {
    match v {
        None => Ok(None),
        Some(v) if v.is_null() => Ok(None),
        Some(v) => {
            let arr = v.as_array().ok_or("must be array of strings")?;
            let mut out = Vec::with_capacity(arr.len());
            for item in arr {
                let s = item
                    .as_str()
                    .ok_or("must be array of strings")?
                    .trim()
                    .to_string();
                if !s.is_empty() && !out.contains(&s) {
                    out.push(s);
                }
            }
            Ok(Some(out))
        }
    }
}

/// Period token on a mutation: validated strictly. The silent
/// fall-back-to-current behavior is for the read-side selector only.
pub fn strict_period_param(
    req: &Request,
    key: &str,
) -> Result<Option<PeriodRef>, serde_json::Value> {
    match req.params.get(key).and_then(|v| v.as_str()) {
        None => Ok(None),
        Some(raw) => match try_parse_period_token(raw) {
            Some(p) => Ok(Some(p)),
            None => Err(err(
                &req.id,
                "bad_params",
                format!("{} must look like 2025-Q2", key),
                None,
            )),
        },
    }
}
