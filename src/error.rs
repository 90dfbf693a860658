//! Error types for profile parsing and resolution.

use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::schedule::ScheduleKind;

/// Result type alias for the resolution core.
pub type Result<T> = std::result::Result<T, ProfileError>;

/// Data-integrity and query errors raised by the resolution engine.
///
/// None of these are transient. They surface either malformed upstream data
/// (caught at construction time) or a query the data cannot answer.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ProfileError {
    #[error("schedule has no entries")]
    EmptySchedule,

    #[error("profile has no {0} schedule")]
    NoSuchSchedule(ScheduleKind),

    #[error("no profile named '{0}' in definition")]
    UnknownProfileName(String),

    #[error("default profile '{0}' is missing from the profile store")]
    MissingDefaultProfile(String),

    #[error("unknown time zone '{0}'")]
    UnknownTimeZone(String),

    #[error("no profile definition active at {0}")]
    NoActiveProfile(DateTime<Utc>),

    #[error("profile definition set is empty")]
    EmptyDefinitionSet,

    #[error("{record} is missing required field '{field}'")]
    MissingField {
        record: &'static str,
        field: &'static str,
    },

    #[error("invalid value '{value}' for '{field}': {reason}")]
    InvalidField {
        field: &'static str,
        value: String,
        reason: String,
    },
}

impl ProfileError {
    pub(crate) fn invalid(
        field: &'static str,
        value: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        Self::InvalidField {
            field,
            value: value.into(),
            reason: reason.into(),
        }
    }
}
