use std::collections::BTreeSet;
use std::fmt;

use serde::de::Error as _;
use serde::ser::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{Map, Value};
use winery_runtime::{TaskActivity, TaskCategory, TaskKind};

use crate::staff::StaffId;
use crate::tools::ToolId;

pub const PARAM_ASSIGNED_STAFF: &str = "assignedStaff";
pub const PARAM_SELECTED_TOOLS: &str = "selectedTools";
pub const PARAM_LAST_PROGRESS: &str = "lastProgress";

/// Identifier handed out by the scheduler; monotonically increasing.
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct TaskId(pub u64);

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TargetKind {
    Field,
    Building,
}

/// Domain object a task works on. Two tasks should never share one.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TaskTarget {
    pub kind: TargetKind,
    pub id: String,
}

impl TaskTarget {
    pub fn field(id: impl Into<String>) -> Self {
        Self {
            kind: TargetKind::Field,
            id: id.into(),
        }
    }

    pub fn building(id: impl Into<String>) -> Self {
        Self {
            kind: TargetKind::Building,
            id: id.into(),
        }
    }
}

impl fmt::Display for TaskTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind {
            TargetKind::Field => write!(f, "field:{}", self.id),
            TargetKind::Building => write!(f, "building:{}", self.id),
        }
    }
}

/// Opaque task data handed to handlers.
///
/// Human-readable formats store the map as-is. Binary formats cannot carry
/// self-describing JSON values, so there the map travels as a JSON string.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct TaskParams(Map<String, Value>);

impl TaskParams {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    pub fn get_f64(&self, key: &str) -> Option<f64> {
        self.0.get(key).and_then(Value::as_f64)
    }

    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.0.get(key).and_then(Value::as_str)
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<Value>) -> Option<Value> {
        self.0.insert(key.into(), value.into())
    }

    pub fn remove(&mut self, key: &str) -> Option<Value> {
        self.0.remove(key)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.0.contains_key(key)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<Map<String, Value>> for TaskParams {
    fn from(map: Map<String, Value>) -> Self {
        Self(map)
    }
}

impl Serialize for TaskParams {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        if serializer.is_human_readable() {
            self.0.serialize(serializer)
        } else {
            let text = serde_json::to_string(&self.0).map_err(S::Error::custom)?;
            serializer.serialize_str(&text)
        }
    }
}

impl<'de> Deserialize<'de> for TaskParams {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        if deserializer.is_human_readable() {
            Map::deserialize(deserializer).map(TaskParams)
        } else {
            let text = String::deserialize(deserializer)?;
            serde_json::from_str(&text)
                .map(TaskParams)
                .map_err(D::Error::custom)
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum TaskState {
    Pending,
    InProgress,
    Complete,
}

/// One schedulable unit of work.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub id: TaskId,
    pub name: String,
    pub activity: TaskActivity,
    pub kind: TaskKind,
    pub category: TaskCategory,
    total_work: f64,
    applied_work: f64,
    #[serde(default)]
    pub target: Option<TaskTarget>,
    #[serde(default)]
    pub assigned_staff: BTreeSet<StaffId>,
    #[serde(default)]
    pub assigned_tools: BTreeSet<ToolId>,
    #[serde(default)]
    pub params: TaskParams,
}

impl Task {
    /// Build a pending task. A non-positive or non-finite `total_work` is
    /// stored as zero, which completes on the first tick.
    pub fn new(
        id: TaskId,
        name: impl Into<String>,
        activity: TaskActivity,
        kind: TaskKind,
        category: TaskCategory,
        total_work: f64,
    ) -> Self {
        Self {
            id,
            name: name.into(),
            activity,
            kind,
            category,
            total_work: clean_work(total_work),
            applied_work: 0.0,
            target: None,
            assigned_staff: BTreeSet::new(),
            assigned_tools: BTreeSet::new(),
            params: TaskParams::new(),
        }
    }

    pub fn total_work(&self) -> f64 {
        self.total_work
    }

    pub fn applied_work(&self) -> f64 {
        self.applied_work
    }

    pub fn remaining_work(&self) -> f64 {
        (self.total_work - self.applied_work).max(0.0)
    }

    /// Add work, clamped to the total. Returns the new progress fraction.
    pub fn apply_work(&mut self, amount: f64) -> f64 {
        let amount = clean_work(amount);
        self.applied_work = (self.applied_work + amount).min(self.total_work);
        self.progress()
    }

    pub fn is_complete(&self) -> bool {
        self.applied_work >= self.total_work
    }

    pub fn progress(&self) -> f64 {
        if self.total_work <= 0.0 {
            1.0
        } else {
            (self.applied_work / self.total_work).clamp(0.0, 1.0)
        }
    }

    pub fn state(&self) -> TaskState {
        if self.is_complete() {
            TaskState::Complete
        } else if self.applied_work > 0.0 {
            TaskState::InProgress
        } else {
            TaskState::Pending
        }
    }

    pub fn targets(&self, target: &TaskTarget) -> bool {
        self.target.as_ref() == Some(target)
    }

    /// Tools recorded in `params.selectedTools`, skipping unparsable entries.
    pub fn selected_tools(&self) -> Vec<ToolId> {
        self.params
            .get(PARAM_SELECTED_TOOLS)
            .and_then(Value::as_array)
            .map(|entries| {
                entries
                    .iter()
                    .filter_map(Value::as_str)
                    .filter_map(|entry| entry.parse().ok())
                    .collect()
            })
            .unwrap_or_default()
    }

    pub(crate) fn sync_selected_tools(&mut self) {
        let tools: Vec<Value> = self
            .assigned_tools
            .iter()
            .map(|tool| Value::String(tool.to_string()))
            .collect();
        self.params.insert(PARAM_SELECTED_TOOLS, Value::Array(tools));
    }

    pub(crate) fn sync_assigned_staff(&mut self) {
        let staff: Vec<Value> = self
            .assigned_staff
            .iter()
            .map(|id| Value::from(id.0))
            .collect();
        self.params.insert(PARAM_ASSIGNED_STAFF, Value::Array(staff));
    }

    /// Progress reported to the handler on the previous tick.
    pub fn last_progress(&self) -> f64 {
        self.params.get_f64(PARAM_LAST_PROGRESS).unwrap_or(0.0)
    }

    /// Restore invariants on data coming back from a store.
    pub(crate) fn normalize(&mut self) {
        self.total_work = clean_work(self.total_work);
        self.applied_work = clean_work(self.applied_work).min(self.total_work);
    }
}

fn clean_work(value: f64) -> f64 {
    if value.is_finite() && value > 0.0 {
        value
    } else {
        0.0
    }
}
