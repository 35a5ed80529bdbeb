use serde::{Deserialize, Serialize};

/// What happens to an exchange marker once the protected work has run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RetentionPolicy {
    /// Keep the marker after success so late duplicates are still rejected.
    /// The marker is removed if the work fails, letting a retry claim it.
    #[default]
    Retain,

    /// Remove the marker as soon as the work finishes, whatever the outcome.
    ReleaseOnCompletion,
}

impl RetentionPolicy {
    /// Whether the marker should be deleted after work that finished with
    /// the given outcome.
    pub fn releases_after(&self, succeeded: bool) -> bool {
        match self {
            RetentionPolicy::Retain => !succeeded,
            RetentionPolicy::ReleaseOnCompletion => true,
        }
    }
}
