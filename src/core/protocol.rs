//! Messages exchanged between the host and an isolated worker.
//!
//! Both directions are newline-delimited JSON objects tagged by `type`.

use serde::{Deserialize, Serialize};

use crate::core::domain::{ExecutionConfig, OutputLine};

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum HostMessage {
    Run {
        code: String,
        config: ExecutionConfig,
    },
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum WorkerMessage {
    Ready,
    Output {
        data: OutputLine,
    },
    Error {
        error: String,
    },
    Complete {
        #[serde(rename = "executionTimeMs")]
        execution_time_ms: u64,
    },
}

/// What a worker transport reports to its executor.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum WorkerEvent {
    Message(WorkerMessage),
    /// The isolation boundary itself failed: crash, early exit, or a line
    /// that is not a protocol message.
    Fault(String),
}

impl HostMessage {
    pub fn encode(&self) -> Result<String, serde_json::Error> {
        let mut line = serde_json::to_string(self)?;
        line.push('\n');
        Ok(line)
    }
}

impl WorkerMessage {
    pub fn decode(line: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(line.trim_end())
    }
}
