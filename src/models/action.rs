//! Queued write actions and user preferences.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// Retention window for queued actions, in minutes.
pub const QUEUE_RETENTION_MINUTES: i64 = 1440;

/// Kind of write action the client issued.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActionKind {
    Confirm,
    Correct,
}

impl std::fmt::Display for ActionKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ActionKind::Confirm => write!(f, "confirm"),
            ActionKind::Correct => write!(f, "correct"),
        }
    }
}

/// A write request that could not reach the network, parked for replay.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueuedAction {
    pub id: String,
    pub kind: ActionKind,
    pub payload: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

impl QueuedAction {
    pub fn new(id: String, kind: ActionKind, payload: serde_json::Value) -> Self {
        Self {
            id,
            kind,
            payload,
            created_at: Utc::now(),
        }
    }

    /// Whether this action has aged past the retention window.
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now - self.created_at > Duration::minutes(QUEUE_RETENTION_MINUTES)
    }
}

/// Singleton accessibility/display preferences.
///
/// Always present from the caller's point of view: reads apply defaults when
/// nothing has been stored yet.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserPreferences {
    #[serde(default)]
    pub require_accessible: bool,
    #[serde(default)]
    pub high_contrast: bool,
    #[serde(default)]
    pub large_buttons: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_action_expiry() {
        let action = QueuedAction::new(
            "a1".into(),
            ActionKind::Correct,
            serde_json::json!({"entrance": "e1"}),
        );
        let now = Utc::now();
        assert!(!action.is_expired(now));
        assert!(action.is_expired(now + Duration::minutes(QUEUE_RETENTION_MINUTES + 1)));
    }

    #[test]
    fn test_preferences_defaults() {
        let prefs: UserPreferences = serde_json::from_str("{}").unwrap();
        assert_eq!(prefs, UserPreferences::default());
    }
}
