use chrono::NaiveDate;
use serde::Serialize;

pub const STATUS_TODO: &str = "todo";
pub const STATUS_DOING: &str = "doing";
pub const STATUS_DONE: &str = "done";

const STRATEGY_INCOMPLETE: &str = "incomplete_tasks_only";
const STRATEGY_ALL: &str = "all_tasks";
const STRATEGY_CUSTOM: &str = "custom";

#[derive(Debug, Clone, Serialize)]
pub struct ContinuityError {
    pub code: String,
    pub message: String,
}

impl ContinuityError {
    pub fn new(code: &str, message: impl Into<String>) -> Self {
        Self {
            code: code.to_string(),
            message: message.into(),
        }
    }
}

/// Carry-over policy for a quest continued into a new period. `Custom`
/// owns its allowlist; there is no out-of-band channel for it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CarryStrategy {
    IncompleteTasksOnly,
    AllTasks,
    Custom { task_ids: Vec<String> },
}

impl CarryStrategy {
    pub fn parse(raw: &str, task_ids: Option<Vec<String>>) -> Result<Self, ContinuityError> {
        match raw.trim() {
            STRATEGY_INCOMPLETE => Ok(Self::IncompleteTasksOnly),
            STRATEGY_ALL => Ok(Self::AllTasks),
            STRATEGY_CUSTOM => {
                let Some(task_ids) = task_ids else {
                    return Err(ContinuityError::new(
                        "bad_params",
                        "custom strategy requires taskIds",
                    ));
                };
                Ok(Self::Custom { task_ids })
            }
            other => Err(ContinuityError::new(
                "bad_params",
                format!(
                    "strategy must be one of: {}, {}, {} (got {:?})",
                    STRATEGY_INCOMPLETE, STRATEGY_ALL, STRATEGY_CUSTOM, other
                ),
            )),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::IncompleteTasksOnly => STRATEGY_INCOMPLETE,
            Self::AllTasks => STRATEGY_ALL,
            Self::Custom { .. } => STRATEGY_CUSTOM,
        }
    }
}

/// The continuity metadata written onto a newly created entity. The
/// source entity itself is never touched.
#[derive(Debug, Clone, PartialEq)]
pub struct ContinuationPatch {
    pub source_id: String,
    pub is_continuation: bool,
    pub strategy: Option<&'static str>,
    pub continuation_date: NaiveDate,
}

/// Build the continuity patch for an entity continuing `source_id`.
/// `today` comes from the caller so a single logical operation stamps
/// one consistent date. A missing or blank source id is an error; a
/// continuation without a source must not exist.
pub fn create_continuation(
    source_id: Option<&str>,
    strategy: Option<&CarryStrategy>,
    today: NaiveDate,
) -> Result<ContinuationPatch, ContinuityError> {
    let source_id = source_id.map(str::trim).unwrap_or_default();
    if source_id.is_empty() {
        return Err(ContinuityError::new(
            "bad_params",
            "continuation source has no id",
        ));
    }
    Ok(ContinuationPatch {
        source_id: source_id.to_string(),
        is_continuation: true,
        strategy: strategy.map(CarryStrategy::as_str),
        continuation_date: today,
    })
}

#[derive(Debug, Clone)]
pub struct CarryTask {
    pub id: String,
    pub status: String,
}

/// Which child tasks follow a continued quest. Order of `tasks` is
/// preserved; allowlist entries that match no task are ignored.
pub fn select_carried_tasks<'a>(
    strategy: &CarryStrategy,
    tasks: &'a [CarryTask],
) -> Vec<&'a CarryTask> {
    match strategy {
        CarryStrategy::IncompleteTasksOnly => {
            tasks.iter().filter(|t| t.status != STATUS_DONE).collect()
        }
        CarryStrategy::AllTasks => tasks.iter().collect(),
        CarryStrategy::Custom { task_ids } => tasks
            .iter()
            .filter(|t| task_ids.iter().any(|id| *id == t.id))
            .collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn today() -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 4, 7).expect("valid date")
    }

    fn task(id: &str, status: &str) -> CarryTask {
        CarryTask {
            id: id.to_string(),
            status: status.to_string(),
        }
    }

    #[test]
    fn continuation_patch_links_source_and_stamps_date() {
        let patch = create_continuation(Some("q1"), Some(&CarryStrategy::AllTasks), today())
            .expect("patch");
        assert_eq!(patch.source_id, "q1");
        assert!(patch.is_continuation);
        assert_eq!(patch.strategy, Some("all_tasks"));
        assert_eq!(patch.continuation_date, today());
    }

    #[test]
    fn continuation_without_source_id_is_rejected() {
        for bad in [None, Some(""), Some("   ")] {
            let err = create_continuation(bad, None, today()).expect_err("must fail");
            assert_eq!(err.code, "bad_params");
        }
    }

    #[test]
    fn strategy_strings_round_trip() {
        for raw in ["incomplete_tasks_only", "all_tasks"] {
            let s = CarryStrategy::parse(raw, None).expect("parse");
            assert_eq!(s.as_str(), raw);
        }
        let custom =
            CarryStrategy::parse("custom", Some(vec!["t1".to_string()])).expect("parse custom");
        assert_eq!(custom.as_str(), "custom");
        assert!(CarryStrategy::parse("custom", None).is_err());
        assert!(CarryStrategy::parse("everything", None).is_err());
    }

    #[test]
    fn incomplete_only_drops_done_tasks() {
        let tasks = vec![task("a", STATUS_TODO), task("b", STATUS_DONE), task("c", STATUS_DOING)];
        let picked = select_carried_tasks(&CarryStrategy::IncompleteTasksOnly, &tasks);
        let ids: Vec<&str> = picked.iter().map(|t| t.id.as_str()).collect();
        assert_eq!(ids, vec!["a", "c"]);
    }

    #[test]
    fn all_tasks_keeps_everything_in_order() {
        let tasks = vec![task("a", STATUS_DONE), task("b", STATUS_TODO)];
        let picked = select_carried_tasks(&CarryStrategy::AllTasks, &tasks);
        assert_eq!(picked.len(), 2);
        assert_eq!(picked[0].id, "a");
    }

    #[test]
    fn custom_respects_allowlist_and_ignores_unknown_ids() {
        let tasks = vec![task("a", STATUS_TODO), task("b", STATUS_DONE), task("c", STATUS_TODO)];
        let strategy = CarryStrategy::Custom {
            task_ids: vec!["c".to_string(), "a".to_string(), "ghost".to_string()],
        };
        let picked = select_carried_tasks(&strategy, &tasks);
        let ids: Vec<&str> = picked.iter().map(|t| t.id.as_str()).collect();
        // Source order wins, not allowlist order.
        assert_eq!(ids, vec!["a", "c"]);
    }
}
