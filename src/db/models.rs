//! Enumerated column types shared by repositories and the API
//!
//! Stored as TEXT, serialized as snake_case strings on the wire.

use rusqlite::types::{FromSql, FromSqlError, FromSqlResult, ToSql, ToSqlOutput, ValueRef};
use serde::{Deserialize, Serialize};

use crate::error::StorageError;

macro_rules! text_enum {
    ($(#[$meta:meta])* $name:ident, $field:literal { $($variant:ident => $text:literal),+ $(,)? }) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        #[serde(rename_all = "snake_case")]
        pub enum $name {
            $($variant),+
        }

        impl $name {
            pub const ALL: &'static [$name] = &[$($name::$variant),+];

            pub fn as_str(&self) -> &'static str {
                match self {
                    $($name::$variant => $text),+
                }
            }

            pub fn parse(value: &str) -> Result<Self, StorageError> {
                match value {
                    $($text => Ok($name::$variant),)+
                    other => Err(StorageError::Validation(format!(
                        "{} '{}' is not valid. Valid values: {:?}",
                        $field,
                        other,
                        [$($text),+]
                    ))),
                }
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl ToSql for $name {
            fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
                Ok(ToSqlOutput::from(self.as_str()))
            }
        }

        impl FromSql for $name {
            fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
                let text = value.as_str()?;
                $name::parse(text).map_err(|e| FromSqlError::Other(e.to_string().into()))
            }
        }
    };
}

text_enum!(
    /// Board column of a story
    StoryStatus, "status" {
        Waiting => "waiting",
        InProgress => "in_progress",
        Completed => "completed",
    }
);

text_enum!(
    Priority, "priority" {
        Low => "low",
        Medium => "medium",
        High => "high",
        Critical => "critical",
    }
);

text_enum!(
    /// Sprint lifecycle: planned -> active -> closed
    SprintStatus, "status" {
        Planned => "planned",
        Active => "active",
        Closed => "closed",
    }
);

text_enum!(
    /// Scheduling relation of a dependency edge. Every kind gates the
    /// dependent story until the target is completed.
    DependencyType, "type" {
        FinishToStart => "finish_to_start",
        StartToStart => "start_to_start",
    }
);

impl Default for StoryStatus {
    fn default() -> Self {
        StoryStatus::Waiting
    }
}

impl Default for Priority {
    fn default() -> Self {
        Priority::Medium
    }
}

impl Default for DependencyType {
    fn default() -> Self {
        DependencyType::FinishToStart
    }
}

/// Distinguish an absent field (`None`) from an explicit `null` (`Some(None)`)
/// in patch payloads. Use with `#[serde(default, deserialize_with = "double_option")]`.
pub fn double_option<'de, D, T>(deserializer: D) -> Result<Option<Option<T>>, D::Error>
where
    D: serde::Deserializer<'de>,
    T: Deserialize<'de>,
{
    Option::<T>::deserialize(deserializer).map(Some)
}

impl SprintStatus {
    /// Allowed lifecycle moves. Closed is terminal.
    pub fn can_transition_to(&self, next: SprintStatus) -> bool {
        matches!(
            (self, next),
            (SprintStatus::Planned, SprintStatus::Active)
                | (SprintStatus::Planned, SprintStatus::Closed)
                | (SprintStatus::Active, SprintStatus::Closed)
        ) || *self == next
    }
}
