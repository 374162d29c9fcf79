//! StepResult - execution record for one tool invocation
//!
//! One record is created per dispatched step, including immediate tools, so
//! every step is auditable uniformly. A record is created `pending` and
//! makes exactly one transition to `success` or `failed`.

use crate::model::Run;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

/// Tool id used for the synthetic final record emitted when a run completes
///
/// The final record represents the run's aggregate output so notification
/// consumers can treat single- and multi-step runs uniformly. It carries a
/// zero cost delta and is never appended to the run's step list.
pub const SYNTHETIC_FINAL_TOOL: &str = "run_summary";

/// How a tool delivers its result
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryMode {
    /// Result available synchronously at dispatch time
    Immediate,
    /// Result arrives later via an out-of-band completion signal
    Webhook,
}

impl DeliveryMode {
    /// Returns the string representation
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Immediate => "immediate",
            Self::Webhook => "webhook",
        }
    }
}

impl std::fmt::Display for DeliveryMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for DeliveryMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "immediate" => Ok(Self::Immediate),
            "webhook" => Ok(Self::Webhook),
            _ => Err(format!("unknown delivery mode: {s}")),
        }
    }
}

/// Step result status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    /// Dispatched, awaiting a result
    Pending,
    /// Completed successfully
    Success,
    /// Invocation or execution failed
    Failed,
}

impl StepStatus {
    /// Returns the string representation
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Success => "success",
            Self::Failed => "failed",
        }
    }

    /// Check if the step reached a terminal status
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Success | Self::Failed)
    }
}

impl std::fmt::Display for StepStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for StepStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "success" => Ok(Self::Success),
            "failed" => Ok(Self::Failed),
            _ => Err(format!("unknown step status: {s}")),
        }
    }
}

/// Execution record for one dispatched step
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepResult {
    /// Unique identifier
    pub id: Uuid,

    /// Run this step belongs to
    pub run_id: Uuid,

    /// Position in the definition's step list
    pub step_index: u32,

    /// Tool that was invoked
    pub tool_id: String,

    /// How the result is delivered
    pub delivery: DeliveryMode,

    /// Reference assigned by the execution engine (webhook tools only)
    pub external_ref: Option<String>,

    /// Resolved inputs the tool was invoked with
    pub inputs: Map<String, Value>,

    /// Raw response payload from the engine
    pub raw_response: Option<Value>,

    /// Normalized output payload — the only output shape exposed to the
    /// next step
    pub output: Option<Map<String, Value>>,

    /// Current status
    pub status: StepStatus,

    /// Cost delta in points
    pub cost: f64,

    /// Execution duration in milliseconds (if reported)
    pub duration_ms: Option<i64>,

    /// Error message if the step failed
    pub error: Option<String>,

    /// When the record was created (dispatch time)
    pub created_at: DateTime<Utc>,

    /// When the step reached a terminal status
    pub completed_at: Option<DateTime<Utc>>,
}

impl StepResult {
    /// Create a pending record at dispatch time
    #[must_use]
    pub fn new(run_id: Uuid, step_index: u32, tool_id: impl Into<String>, delivery: DeliveryMode) -> Self {
        Self {
            id: Uuid::new_v4(),
            run_id,
            step_index,
            tool_id: tool_id.into(),
            delivery,
            external_ref: None,
            inputs: Map::new(),
            raw_response: None,
            output: None,
            status: StepStatus::Pending,
            cost: 0.0,
            duration_ms: None,
            error: None,
            created_at: Utc::now(),
            completed_at: None,
        }
    }

    /// Record the resolved inputs
    #[must_use]
    pub fn with_inputs(mut self, inputs: Map<String, Value>) -> Self {
        self.inputs = inputs;
        self
    }

    /// Build the synthetic final record for a completed run
    #[must_use]
    pub fn synthetic_final(run: &Run, aggregate_output: Map<String, Value>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            run_id: run.id,
            step_index: run.step_result_ids.len() as u32,
            tool_id: SYNTHETIC_FINAL_TOOL.to_string(),
            delivery: DeliveryMode::Immediate,
            external_ref: None,
            inputs: Map::new(),
            raw_response: None,
            output: Some(aggregate_output),
            status: StepStatus::Success,
            cost: 0.0,
            duration_ms: None,
            error: None,
            created_at: now,
            completed_at: Some(now),
        }
    }

    /// Check whether this is the synthetic final record
    #[must_use]
    pub fn is_synthetic_final(&self) -> bool {
        self.tool_id == SYNTHETIC_FINAL_TOOL
    }
}

/// Out-of-band completion delivered for a webhook-backed step
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompletionSignal {
    /// Engine reference identifying the step
    pub external_ref: String,

    /// Whether the execution succeeded
    pub success: bool,

    /// Raw output payload from the engine
    pub output: Value,

    /// Error message if the execution failed
    pub error: Option<String>,

    /// Cost delta in points
    pub cost: f64,

    /// Execution duration in milliseconds (if reported)
    pub duration_ms: Option<i64>,
}

impl CompletionSignal {
    /// Build a success signal
    #[must_use]
    pub fn success(external_ref: impl Into<String>, output: Value, cost: f64) -> Self {
        Self {
            external_ref: external_ref.into(),
            success: true,
            output,
            error: None,
            cost,
            duration_ms: None,
        }
    }

    /// Build a failure signal
    #[must_use]
    pub fn failure(external_ref: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            external_ref: external_ref.into(),
            success: false,
            output: Value::Null,
            error: Some(error.into()),
            cost: 0.0,
            duration_ms: None,
        }
    }

    /// Set the duration
    #[must_use]
    pub fn with_duration(mut self, duration_ms: i64) -> Self {
        self.duration_ms = Some(duration_ms);
        self
    }
}
