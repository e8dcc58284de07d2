use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;

pub const DB_FILE_NAME: &str = "planbook.sqlite3";

pub fn open_db(workspace: &Path) -> anyhow::Result<Connection> {
    std::fs::create_dir_all(workspace)?;
    let db_path = workspace.join(DB_FILE_NAME);
    let conn = Connection::open(db_path)?;
    conn.execute("PRAGMA foreign_keys = ON", [])?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS quests(
            id TEXT PRIMARY KEY,
            year INTEGER NOT NULL,
            quarter INTEGER NOT NULL,
            title TEXT NOT NULL,
            detail TEXT NOT NULL DEFAULT '',
            status TEXT NOT NULL,
            sort_order INTEGER NOT NULL,
            archived INTEGER NOT NULL DEFAULT 0,
            source_id TEXT,
            is_continuation INTEGER NOT NULL DEFAULT 0,
            strategy TEXT,
            continuation_date TEXT,
            created_at TEXT,
            updated_at TEXT
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_quests_period ON quests(year, quarter, sort_order)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_quests_source ON quests(source_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS tasks(
            id TEXT PRIMARY KEY,
            quest_id TEXT NOT NULL,
            title TEXT NOT NULL,
            status TEXT NOT NULL,
            sort_order INTEGER NOT NULL,
            source_id TEXT,
            is_continuation INTEGER NOT NULL DEFAULT 0,
            continuation_date TEXT,
            created_at TEXT,
            updated_at TEXT,
            FOREIGN KEY(quest_id) REFERENCES quests(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_tasks_quest ON tasks(quest_id, sort_order)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS milestones(
            id TEXT PRIMARY KEY,
            year INTEGER NOT NULL,
            quarter INTEGER NOT NULL,
            quest_id TEXT,
            title TEXT NOT NULL,
            target_date TEXT,
            status TEXT NOT NULL,
            sort_order INTEGER NOT NULL,
            source_id TEXT,
            is_continuation INTEGER NOT NULL DEFAULT 0,
            continuation_date TEXT,
            created_at TEXT,
            updated_at TEXT,
            FOREIGN KEY(quest_id) REFERENCES quests(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_milestones_period ON milestones(year, quarter, sort_order)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_milestones_quest ON milestones(quest_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS settings(
            key TEXT PRIMARY KEY,
            value_json TEXT NOT NULL
        )",
        [],
    )?;

    Ok(conn)
}

pub fn settings_get_json(conn: &Connection, key: &str) -> anyhow::Result<Option<serde_json::Value>> {
    let raw: Option<String> = conn
        .query_row("SELECT value_json FROM settings WHERE key = ?", [key], |r| {
            r.get(0)
        })
        .optional()?;
    // Malformed historical values read as absent rather than erroring.
    Ok(raw.and_then(|s| serde_json::from_str(&s).ok()))
}

pub fn settings_set_json(
    conn: &Connection,
    key: &str,
    value: &serde_json::Value,
) -> anyhow::Result<()> {
    conn.execute(
        "INSERT INTO settings(key, value_json) VALUES(?, ?)
         ON CONFLICT(key) DO UPDATE SET value_json = excluded.value_json",
        params![key, value.to_string()],
    )?;
    Ok(())
}
