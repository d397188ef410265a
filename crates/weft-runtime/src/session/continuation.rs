//! Loop continuation decisions and execution results.

use serde::{Deserialize, Serialize};

/// Whether an execution runs another tick.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "decision", rename_all = "snake_case")]
pub enum Continuation {
    /// Run another tick.
    Continue {
        /// Why.
        reason: String,
    },
    /// Stop after this tick.
    Stop {
        /// Why.
        reason: String,
    },
}

impl Continuation {
    /// Whether this is a stop.
    pub fn is_stop(&self) -> bool {
        matches!(self, Self::Stop { .. })
    }

    /// The reason text.
    pub fn reason(&self) -> &str {
        match self {
            Self::Continue { reason } | Self::Stop { reason } => reason,
        }
    }

    /// Decision used when no callback intervenes.
    pub(crate) fn default_for(tools_ran: bool, queued_inputs: usize) -> Self {
        if tools_ran {
            Self::Continue {
                reason: "tool calls ran".to_owned(),
            }
        } else if queued_inputs > 0 {
            Self::Continue {
                reason: format!("{queued_inputs} queued input(s)"),
            }
        } else {
            Self::Stop {
                reason: "model replied without tool calls".to_owned(),
            }
        }
    }
}

/// How an execution ended.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    /// A stop decision was reached.
    Completed,
    /// The per-execution tick cap was hit.
    MaxTicks,
    /// Cancelled or closed mid-execution.
    Cancelled,
}

/// Result of [`Session::send`](crate::Session::send).
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendOutcome {
    /// How the execution ended.
    pub status: ExecutionStatus,
    /// Last assistant text, if any.
    pub result: Option<String>,
    /// Ticks run by this execution.
    pub ticks: u32,
    /// Reason of the final decision.
    pub reason: String,
}
