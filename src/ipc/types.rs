use std::path::PathBuf;

use rusqlite::Connection;
use serde::Deserialize;

use crate::cache::QueryCache;

#[derive(Debug, Deserialize, Clone)]
pub struct Request {
    pub id: String,
    pub method: String,
    #[serde(default)]
    pub params: serde_json::Value,
}

pub struct AppState {
    pub workspace: Option<PathBuf>,
    pub db: Option<Connection>,
    pub cache: QueryCache,
}

impl AppState {
    pub fn new() -> Self {
        Self {
            workspace: None,
            db: None,
            cache: QueryCache::default(),
        }
    }
}
