//! Tool instances, the buildings that hold them, and tool locking.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;

use bevy::prelude::Resource;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;
use winery_runtime::TaskCategory;

use crate::task::TaskId;

/// Composite identity: tool type name plus a per-type instance number.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ToolId {
    pub tool_type: String,
    pub instance: u32,
}

impl ToolId {
    pub fn new(tool_type: impl Into<String>, instance: u32) -> Self {
        Self {
            tool_type: tool_type.into(),
            instance,
        }
    }
}

impl fmt::Display for ToolId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.tool_type, self.instance)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid tool id '{0}', expected '<type>#<instance>'")]
pub struct ToolIdParseError(pub String);

impl FromStr for ToolId {
    type Err = ToolIdParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (tool_type, instance) = s
            .rsplit_once('#')
            .ok_or_else(|| ToolIdParseError(s.to_string()))?;
        let instance = instance
            .trim()
            .parse::<u32>()
            .map_err(|_| ToolIdParseError(s.to_string()))?;
        let tool_type = tool_type.trim();
        if tool_type.is_empty() {
            return Err(ToolIdParseError(s.to_string()));
        }
        Ok(ToolId::new(tool_type, instance))
    }
}

/// `Individual` tools back one staff member each; a task holds at most one
/// `Task` tool at a time.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolKind {
    Individual,
    Task,
}

/// Catalogue entry used when purchasing a new instance.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ToolSpec {
    pub tool_type: String,
    pub kind: ToolKind,
    pub speed_bonus: f64,
    pub category: TaskCategory,
    #[serde(default)]
    pub price: f64,
}

/// A purchased tool sitting in a building slot.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ToolInstance {
    pub id: ToolId,
    pub kind: ToolKind,
    pub speed_bonus: f64,
    pub category: TaskCategory,
    #[serde(default)]
    assigned_task: Option<TaskId>,
}

impl ToolInstance {
    pub fn new(id: ToolId, kind: ToolKind, speed_bonus: f64, category: TaskCategory) -> Self {
        Self {
            id,
            kind,
            speed_bonus,
            category,
            assigned_task: None,
        }
    }

    pub fn assigned_task(&self) -> Option<TaskId> {
        self.assigned_task
    }

    pub fn is_available_for(&self, task: TaskId) -> bool {
        match self.assigned_task {
            None => true,
            Some(holder) => holder == task,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Building {
    pub id: String,
    pub name: String,
    #[serde(default = "default_level")]
    pub level: u32,
    pub capacity: usize,
    #[serde(default)]
    pub tools: Vec<ToolInstance>,
}

fn default_level() -> u32 {
    1
}

impl Building {
    pub fn new(id: impl Into<String>, name: impl Into<String>, capacity: usize) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            level: 1,
            capacity,
            tools: Vec::new(),
        }
    }

    pub fn free_slots(&self) -> usize {
        self.capacity.saturating_sub(self.tools.len())
    }
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ToolLockError {
    #[error("tool {0} does not exist")]
    UnknownTool(ToolId),
    #[error("tool {tool} is locked to task {holder}")]
    Locked { tool: ToolId, holder: TaskId },
    #[error("task {task} has {staff} staff and cannot take another individual tool")]
    IndividualLimit { task: TaskId, staff: usize },
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum BuildingError {
    #[error("building '{0}' does not exist")]
    UnknownBuilding(String),
    #[error("building '{building}' has no free tool slot (capacity {capacity})")]
    NoFreeSlot { building: String, capacity: usize },
    #[error("tool {0} is not stored in building '{1}'")]
    ToolNotInBuilding(ToolId, String),
    #[error("tool {tool} is in use by task {holder}")]
    ToolInUse { tool: ToolId, holder: TaskId },
}

/// Lookup seam for tool instances by composite id.
pub trait ToolDirectory {
    fn tool(&self, id: &ToolId) -> Option<&ToolInstance>;
    fn tool_mut(&mut self, id: &ToolId) -> Option<&mut ToolInstance>;
}

/// All buildings and their tool slots.
#[derive(Resource, Debug, Clone, Default, Serialize, Deserialize)]
pub struct BuildingRegistry {
    buildings: Vec<Building>,
    #[serde(default)]
    next_instance: BTreeMap<String, u32>,
    #[serde(skip)]
    dirty: bool,
}

impl BuildingRegistry {
    pub fn new(buildings: Vec<Building>) -> Self {
        let mut registry = Self {
            buildings,
            next_instance: BTreeMap::new(),
            dirty: false,
        };
        registry.reseed_instance_counters();
        registry
    }

    /// Make sure future purchases never reuse an instance number already
    /// present in the buildings.
    fn reseed_instance_counters(&mut self) {
        for tool in self.buildings.iter().flat_map(|b| b.tools.iter()) {
            let next = self
                .next_instance
                .entry(tool.id.tool_type.clone())
                .or_insert(1);
            *next = (*next).max(tool.id.instance + 1);
        }
    }

    pub fn buildings(&self) -> &[Building] {
        &self.buildings
    }

    pub fn building(&self, id: &str) -> Option<&Building> {
        self.buildings.iter().find(|b| b.id == id)
    }

    pub fn building_mut(&mut self, id: &str) -> Option<&mut Building> {
        self.dirty = true;
        self.buildings.iter_mut().find(|b| b.id == id)
    }

    pub fn add_building(&mut self, building: Building) {
        self.buildings.push(building);
        self.reseed_instance_counters();
        self.dirty = true;
    }

    /// Replace the buildings with a stored copy. Instance counters only grow.
    pub fn replace_buildings(&mut self, buildings: Vec<Building>) {
        self.buildings = buildings;
        self.reseed_instance_counters();
        self.dirty = false;
    }

    pub fn tools(&self) -> impl Iterator<Item = &ToolInstance> {
        self.buildings.iter().flat_map(|b| b.tools.iter())
    }

    pub fn locked_tool_count(&self) -> usize {
        self.tools().filter(|t| t.assigned_task.is_some()).count()
    }

    /// Create a new instance of `spec` in the first free slot of `building`.
    pub fn purchase_tool(
        &mut self,
        building_id: &str,
        spec: &ToolSpec,
    ) -> Result<ToolId, BuildingError> {
        let index = self
            .buildings
            .iter()
            .position(|b| b.id == building_id)
            .ok_or_else(|| BuildingError::UnknownBuilding(building_id.to_string()))?;
        let building = &self.buildings[index];
        if building.free_slots() == 0 {
            return Err(BuildingError::NoFreeSlot {
                building: building.id.clone(),
                capacity: building.capacity,
            });
        }

        let counter = self
            .next_instance
            .entry(spec.tool_type.clone())
            .or_insert(1);
        let id = ToolId::new(spec.tool_type.clone(), *counter);
        *counter += 1;

        self.buildings[index].tools.push(ToolInstance::new(
            id.clone(),
            spec.kind,
            spec.speed_bonus,
            spec.category,
        ));
        self.dirty = true;
        Ok(id)
    }

    /// Remove a tool from its building. Locked tools cannot be sold.
    pub fn sell_tool(
        &mut self,
        building_id: &str,
        tool: &ToolId,
    ) -> Result<ToolInstance, BuildingError> {
        let building = self
            .buildings
            .iter_mut()
            .find(|b| b.id == building_id)
            .ok_or_else(|| BuildingError::UnknownBuilding(building_id.to_string()))?;
        let position = building
            .tools
            .iter()
            .position(|t| &t.id == tool)
            .ok_or_else(|| BuildingError::ToolNotInBuilding(tool.clone(), building_id.to_string()))?;
        if let Some(holder) = building.tools[position].assigned_task {
            return Err(BuildingError::ToolInUse {
                tool: tool.clone(),
                holder,
            });
        }
        self.dirty = true;
        Ok(building.tools.remove(position))
    }

    /// Clear locks whose holder is no longer a live task.
    pub fn release_orphaned_locks(&mut self, is_live: impl Fn(TaskId) -> bool) -> usize {
        let mut released = 0;
        for tool in self.buildings.iter_mut().flat_map(|b| b.tools.iter_mut()) {
            if tool.assigned_task.is_some_and(|holder| !is_live(holder)) {
                tool.assigned_task = None;
                released += 1;
            }
        }
        if released > 0 {
            self.dirty = true;
        }
        released
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    pub fn mark_clean(&mut self) {
        self.dirty = false;
    }
}

impl ToolDirectory for BuildingRegistry {
    fn tool(&self, id: &ToolId) -> Option<&ToolInstance> {
        self.tools().find(|t| &t.id == id)
    }

    fn tool_mut(&mut self, id: &ToolId) -> Option<&mut ToolInstance> {
        self.dirty = true;
        self.buildings
            .iter_mut()
            .flat_map(|b| b.tools.iter_mut())
            .find(|t| &t.id == id)
    }
}

/// Lock bookkeeping and speed bonuses for tools held by tasks.
pub struct ToolAllocator;

impl ToolAllocator {
    /// Product of the speed bonuses of `tools`; unknown ids and an empty set
    /// are neutral.
    pub fn speed_bonus<'a, D>(directory: &D, tools: impl IntoIterator<Item = &'a ToolId>) -> f64
    where
        D: ToolDirectory + ?Sized,
    {
        tools
            .into_iter()
            .filter_map(|id| directory.tool(id))
            .map(|tool| tool.speed_bonus)
            .filter(|bonus| bonus.is_finite() && *bonus > 0.0)
            .product()
    }

    /// Lock `tool` to `task`. Re-locking to the same task is a no-op.
    pub fn assign<D>(directory: &mut D, tool: &ToolId, task: TaskId) -> Result<(), ToolLockError>
    where
        D: ToolDirectory + ?Sized,
    {
        let instance = directory
            .tool_mut(tool)
            .ok_or_else(|| ToolLockError::UnknownTool(tool.clone()))?;
        match instance.assigned_task {
            Some(holder) if holder != task => Err(ToolLockError::Locked {
                tool: tool.clone(),
                holder,
            }),
            _ => {
                instance.assigned_task = Some(task);
                Ok(())
            }
        }
    }

    /// Clear the lock `task` holds on `tool`. Returns whether a lock was
    /// actually cleared; releasing an unlocked tool, a tool held by another
    /// task, or a tool that no longer exists does nothing.
    pub fn release<D>(directory: &mut D, tool: &ToolId, task: TaskId) -> bool
    where
        D: ToolDirectory + ?Sized,
    {
        match directory.tool_mut(tool) {
            Some(instance) if instance.assigned_task == Some(task) => {
                instance.assigned_task = None;
                true
            }
            Some(instance) => {
                if let Some(holder) = instance.assigned_task {
                    debug!(
                        target: "winery::tools",
                        tool = %tool,
                        task = %task,
                        holder = %holder,
                        "tool.release_skipped=foreign_lock"
                    );
                }
                false
            }
            None => false,
        }
    }

    pub fn release_all<'a, D>(
        directory: &mut D,
        tools: impl IntoIterator<Item = &'a ToolId>,
        task: TaskId,
    ) -> usize
    where
        D: ToolDirectory + ?Sized,
    {
        tools
            .into_iter()
            .filter(|tool| Self::release(directory, tool, task))
            .count()
    }

    /// Check a new selection against the tools a task already holds.
    ///
    /// Returns the `Task`-kind tools that must be released to make room;
    /// an `Individual` tool is refused once their count reaches the staff
    /// count.
    pub fn plan_selection<D>(
        directory: &D,
        task: TaskId,
        held: &BTreeSet<ToolId>,
        staff_count: usize,
        candidate: &ToolId,
    ) -> Result<Vec<ToolId>, ToolLockError>
    where
        D: ToolDirectory + ?Sized,
    {
        let instance = directory
            .tool(candidate)
            .ok_or_else(|| ToolLockError::UnknownTool(candidate.clone()))?;
        if let Some(holder) = instance.assigned_task.filter(|holder| *holder != task) {
            return Err(ToolLockError::Locked {
                tool: candidate.clone(),
                holder,
            });
        }

        match instance.kind {
            ToolKind::Individual => {
                let in_use =
                    held_of_kind(directory, held, candidate, ToolKind::Individual).count();
                if in_use >= staff_count {
                    return Err(ToolLockError::IndividualLimit {
                        task,
                        staff: staff_count,
                    });
                }
                Ok(Vec::new())
            }
            ToolKind::Task => Ok(held_of_kind(directory, held, candidate, ToolKind::Task)
                .cloned()
                .collect()),
        }
    }
}

fn held_of_kind<'a, D>(
    directory: &'a D,
    held: &'a BTreeSet<ToolId>,
    skip: &'a ToolId,
    kind: ToolKind,
) -> impl Iterator<Item = &'a ToolId> + 'a
where
    D: ToolDirectory + ?Sized,
{
    held.iter()
        .filter(move |id| *id != skip && directory.tool(id).map(|t| t.kind) == Some(kind))
}
