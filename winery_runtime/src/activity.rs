use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Domain tag used to pick the relevant staff skill and default team.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskCategory {
    Field,
    Winery,
    Administration,
    Sales,
    Maintenance,
}

impl TaskCategory {
    pub const ALL: [TaskCategory; 5] = [
        TaskCategory::Field,
        TaskCategory::Winery,
        TaskCategory::Administration,
        TaskCategory::Sales,
        TaskCategory::Maintenance,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            TaskCategory::Field => "field",
            TaskCategory::Winery => "winery",
            TaskCategory::Administration => "administration",
            TaskCategory::Sales => "sales",
            TaskCategory::Maintenance => "maintenance",
        }
    }
}

impl fmt::Display for TaskCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown {kind} '{value}'")]
pub struct UnknownKeyword {
    pub kind: &'static str,
    pub value: String,
}

impl FromStr for TaskCategory {
    type Err = UnknownKeyword;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "field" | "vineyard" => Ok(TaskCategory::Field),
            "winery" | "cellar" => Ok(TaskCategory::Winery),
            "administration" | "admin" => Ok(TaskCategory::Administration),
            "sales" => Ok(TaskCategory::Sales),
            "maintenance" | "building" => Ok(TaskCategory::Maintenance),
            other => Err(UnknownKeyword {
                kind: "task category",
                value: other.to_string(),
            }),
        }
    }
}

/// How a task reports back to the domain.
///
/// `Progressive` tasks are called every tick with their progress fraction;
/// `Completion` tasks are called once, when all work has been applied.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskKind {
    Progressive,
    Completion,
}

/// Stable key selecting the domain handler of a task.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskActivity {
    Planting,
    Harvesting,
    Crushing,
    Fermentation,
    Maintenance,
    Hiring,
    Upgrade,
}

impl TaskActivity {
    pub const ALL: [TaskActivity; 7] = [
        TaskActivity::Planting,
        TaskActivity::Harvesting,
        TaskActivity::Crushing,
        TaskActivity::Fermentation,
        TaskActivity::Maintenance,
        TaskActivity::Hiring,
        TaskActivity::Upgrade,
    ];

    /// Default display label.
    pub fn label(self) -> &'static str {
        match self {
            TaskActivity::Planting => "Planting",
            TaskActivity::Harvesting => "Harvesting",
            TaskActivity::Crushing => "Crushing",
            TaskActivity::Fermentation => "Fermentation",
            TaskActivity::Maintenance => "Building maintenance",
            TaskActivity::Hiring => "Hiring",
            TaskActivity::Upgrade => "Building upgrade",
        }
    }

    pub fn category(self) -> TaskCategory {
        match self {
            TaskActivity::Planting | TaskActivity::Harvesting => TaskCategory::Field,
            TaskActivity::Crushing | TaskActivity::Fermentation => TaskCategory::Winery,
            TaskActivity::Hiring => TaskCategory::Administration,
            TaskActivity::Maintenance | TaskActivity::Upgrade => TaskCategory::Maintenance,
        }
    }

    pub fn kind(self) -> TaskKind {
        match self {
            TaskActivity::Harvesting | TaskActivity::Fermentation => TaskKind::Progressive,
            _ => TaskKind::Completion,
        }
    }

    pub fn keyword(self) -> &'static str {
        match self {
            TaskActivity::Planting => "plant",
            TaskActivity::Harvesting => "harvest",
            TaskActivity::Crushing => "crush",
            TaskActivity::Fermentation => "ferment",
            TaskActivity::Maintenance => "maintain",
            TaskActivity::Hiring => "hire",
            TaskActivity::Upgrade => "upgrade",
        }
    }
}

impl fmt::Display for TaskActivity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl FromStr for TaskActivity {
    type Err = UnknownKeyword;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let lower = s.to_ascii_lowercase();
        TaskActivity::ALL
            .into_iter()
            .find(|activity| {
                activity.keyword() == lower || activity.label().eq_ignore_ascii_case(&lower)
            })
            .or(match lower.as_str() {
                "planting" => Some(TaskActivity::Planting),
                "harvesting" => Some(TaskActivity::Harvesting),
                "crushing" => Some(TaskActivity::Crushing),
                "fermentation" => Some(TaskActivity::Fermentation),
                "maintenance" => Some(TaskActivity::Maintenance),
                "hiring" => Some(TaskActivity::Hiring),
                _ => None,
            })
            .ok_or(UnknownKeyword {
                kind: "activity",
                value: lower,
            })
    }
}
