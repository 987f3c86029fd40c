/// Task wire types and local placeholder identities.
use chrono::Utc;
use serde::{Deserialize, Deserializer, Serialize};

use crate::error::SyncError;

/// Reserved id namespace for tasks the server has not confirmed yet.
/// Server ids never start with this; the gateway rejects any that do.
pub const PLACEHOLDER_PREFIX: &str = "optimistic-";

pub fn is_placeholder_id(id: &str) -> bool {
    id.starts_with(PLACEHOLDER_PREFIX)
}

// ── Task ──────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Task {
    #[serde(deserialize_with = "id_from_string_or_number")]
    pub id: String,
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default)]
    pub completed: bool,
}

impl Task {
    pub fn is_placeholder(&self) -> bool {
        is_placeholder_id(&self.id)
    }

    /// Copy of this task with `completed` flipped.
    pub fn toggled(&self) -> Task {
        Task {
            completed: !self.completed,
            ..self.clone()
        }
    }
}

/// Backends disagree on whether ids are strings or integers; both become
/// strings here.
pub fn id_from_string_or_number<'de, D: Deserializer<'de>>(d: D) -> Result<String, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum RawId {
        Text(String),
        Number(i64),
    }
    Ok(match RawId::deserialize(d)? {
        RawId::Text(s) => s,
        RawId::Number(n) => n.to_string(),
    })
}

// ── Draft (create payload) ────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskDraft {
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub completed: bool,
}

impl TaskDraft {
    /// New, not-completed draft. The title is kept as typed; a blank
    /// description is dropped.
    pub fn new(title: &str, description: Option<&str>) -> Self {
        Self {
            title: title.to_string(),
            description: description
                .map(str::trim)
                .filter(|d| !d.is_empty())
                .map(str::to_string),
            completed: false,
        }
    }

    pub fn validate(&self) -> Result<(), SyncError> {
        if self.title.trim().is_empty() {
            return Err(SyncError::EmptyTitle);
        }
        Ok(())
    }

    pub fn into_task(self, id: String) -> Task {
        Task {
            id,
            title: self.title,
            description: self.description,
            completed: self.completed,
        }
    }
}

// ── Patch (update payload) ────────────────────────────────────────────────────

/// `description` is two-level: `None` leaves it alone, `Some(None)` sends
/// `null` and clears it on the server.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct TaskPatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        deserialize_with = "present_or_null"
    )]
    pub description: Option<Option<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed: Option<bool>,
}

impl TaskPatch {
    /// Full patch carrying every field of `task`.
    pub fn from_task(task: &Task) -> Self {
        Self {
            title: Some(task.title.clone()),
            description: Some(task.description.clone()),
            completed: Some(task.completed),
        }
    }
}

/// A key that is present (even as `null`) deserializes to `Some`.
fn present_or_null<'de, D: Deserializer<'de>>(d: D) -> Result<Option<Option<String>>, D::Error> {
    Option::<String>::deserialize(d).map(Some)
}

// ── Placeholder ids ───────────────────────────────────────────────────────────

/// Generator for placeholder ids: `optimistic-{millis}-{seq}`.
///
/// The millisecond clock alone is not enough (two creates in the same
/// millisecond), so a per-generator sequence is appended.
#[derive(Debug, Default)]
pub struct PlaceholderIds {
    seq: u64,
}

impl PlaceholderIds {
    pub fn next(&mut self) -> String {
        self.seq += 1;
        format!(
            "{PLACEHOLDER_PREFIX}{}-{}",
            Utc::now().timestamp_millis(),
            self.seq
        )
    }
}
