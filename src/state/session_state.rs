/// Session state definitions
///
/// A session starts `Running` and ends in exactly one terminal state.
use serde::{Deserialize, Serialize};
use std::fmt;

/// Represents the current state of a crawl session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    /// The orchestration loop is still pulling links
    Running,

    /// The frontier drained or the page budget was reached
    Completed,

    /// A fatal error aborted the session
    Failed,

    /// An operator stopped the session
    Stopped,
}

impl SessionStatus {
    /// Returns true if this is a terminal state
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Running)
    }

    /// Converts the status to a database string representation
    pub fn to_db_string(&self) -> &'static str {
        match self {
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Stopped => "stopped",
        }
    }

    /// Parses a status from a database string representation
    ///
    /// Returns None if the string doesn't match any known state.
    pub fn from_db_string(s: &str) -> Option<Self> {
        match s {
            "running" => Some(Self::Running),
            "completed" => Some(Self::Completed),
            "failed" => Some(Self::Failed),
            "stopped" => Some(Self::Stopped),
            _ => None,
        }
    }
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_db_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_terminal() {
        assert!(!SessionStatus::Running.is_terminal());
        assert!(SessionStatus::Completed.is_terminal());
        assert!(SessionStatus::Failed.is_terminal());
        assert!(SessionStatus::Stopped.is_terminal());
    }

    #[test]
    fn test_db_strings() {
        for status in [
            SessionStatus::Running,
            SessionStatus::Completed,
            SessionStatus::Failed,
            SessionStatus::Stopped,
        ] {
            assert_eq!(SessionStatus::from_db_string(status.to_db_string()), Some(status));
        }
        assert_eq!(SessionStatus::from_db_string("paused"), None);
    }

    #[test]
    fn test_json_is_lowercase() {
        let json = serde_json::to_string(&SessionStatus::Stopped).unwrap();
        assert_eq!(json, "\"stopped\"");
    }
}
