//! Shared runtime contracts for the winery simulation.
//!
//! This crate holds the stable enums that key the task engine (categories,
//! kinds, activities) together with the command surface used by the headless
//! server, without depending on the Bevy runtime in `winery_core`.

mod activity;
mod command_text;

pub use activity::{TaskActivity, TaskCategory, TaskKind, UnknownKeyword};
pub use command_text::{parse_command_line, CommandParseError};

use serde::{Deserialize, Serialize};

/// Commands accepted by the headless driver.
///
/// Text commands are parsed by [`parse_command_line`]; JSON payloads use the
/// `command` tag, e.g. `{"command":"week","steps":2}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "command", rename_all = "snake_case")]
pub enum CommandPayload {
    Week {
        steps: u32,
    },
    Schedule {
        activity: TaskActivity,
        #[serde(default)]
        target: Option<String>,
        #[serde(default)]
        amount: Option<f64>,
    },
    Hire {
        candidate: String,
    },
    AssignStaff {
        task_id: u64,
        staff: Vec<u32>,
    },
    SelectTool {
        task_id: u64,
        tool: String,
    },
    DeselectTool {
        task_id: u64,
        tool: String,
    },
    BuyTool {
        building: String,
        tool_type: String,
    },
    SellTool {
        building: String,
        tool: String,
    },
    Cancel {
        task_id: u64,
    },
    ListTasks,
    Save,
}

impl CommandPayload {
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Parse either a JSON payload (leading `{`) or a text command line.
    pub fn parse(input: &str) -> Result<Self, CommandParseError> {
        let trimmed = input.trim();
        if trimmed.starts_with('{') {
            Self::from_json(trimmed).map_err(CommandParseError::Json)
        } else {
            parse_command_line(trimmed)
        }
    }

    /// Whether the command mutates game state.
    pub fn is_mutating(&self) -> bool {
        !matches!(self, CommandPayload::ListTasks)
    }
}
