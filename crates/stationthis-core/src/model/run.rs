//! Run - parent record for one spell or cook execution

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

/// Kind of multi-step execution
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunKind {
    /// A spell cast triggered by a user
    Cast,
    /// A collection cook (batch generation)
    Cook,
}

impl RunKind {
    /// Returns the string representation
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Cast => "cast",
            Self::Cook => "cook",
        }
    }
}

impl std::fmt::Display for RunKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for RunKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "cast" => Ok(Self::Cast),
            "cook" => Ok(Self::Cook),
            _ => Err(format!("unknown run kind: {s}")),
        }
    }
}

/// Run status
///
/// Transitions are forward-only: `running` may move to any terminal status,
/// and a terminal status never changes again.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    /// Run is executing steps (or suspended waiting on a webhook)
    Running,
    /// All steps completed successfully
    Completed,
    /// A step failed or the definition was malformed
    Failed,
    /// Cancelled by an external actor
    Cancelled,
}

impl RunStatus {
    /// Returns the string representation
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }

    /// Check if the run reached a terminal status
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }
}

impl std::fmt::Display for RunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for RunStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "running" => Ok(Self::Running),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            "cancelled" => Ok(Self::Cancelled),
            _ => Err(format!("unknown run status: {s}")),
        }
    }
}

/// A run record: one end-to-end execution of a multi-step definition
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Run {
    /// Unique identifier
    pub id: Uuid,

    /// Definition (spell/collection) this run executes
    pub definition_id: String,

    /// User who initiated the run
    pub initiator_id: String,

    /// Cast or cook
    pub kind: RunKind,

    /// Current status
    pub status: RunStatus,

    /// Accumulated cost in points (monotonically non-decreasing)
    pub total_cost: f64,

    /// Step-result ids in completion order (append-only)
    pub step_result_ids: Vec<Uuid>,

    /// Context keys provided by the initiator at start time
    ///
    /// Persisted so the per-run pipeline context can be rebuilt by whichever
    /// process handles a completion callback.
    pub initial_context: Map<String, Value>,

    /// Why the run failed, if it did
    pub failure_reason: Option<String>,

    /// When the run started
    pub started_at: DateTime<Utc>,

    /// When the run reached a terminal status
    pub completed_at: Option<DateTime<Utc>>,

    /// When the record was last updated
    pub updated_at: DateTime<Utc>,

    /// Counter for conditional writes; bumped on every update
    pub version: i64,
}

impl Run {
    /// Create a new running record
    #[must_use]
    pub fn new(
        definition_id: impl Into<String>,
        initiator_id: impl Into<String>,
        kind: RunKind,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            definition_id: definition_id.into(),
            initiator_id: initiator_id.into(),
            kind,
            status: RunStatus::Running,
            total_cost: 0.0,
            step_result_ids: Vec::new(),
            initial_context: Map::new(),
            failure_reason: None,
            started_at: now,
            completed_at: None,
            updated_at: now,
            version: 0,
        }
    }

    /// Set the initiator-provided context keys
    #[must_use]
    pub fn with_initial_context(mut self, context: Map<String, Value>) -> Self {
        self.initial_context = context;
        self
    }
}
