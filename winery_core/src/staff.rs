//! Staff roster, default teams, and fair-share workforce division.

use std::collections::HashMap;
use std::fmt;

use bevy::prelude::Resource;
use rand::{rngs::SmallRng, Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use tracing::debug;
use winery_runtime::TaskCategory;

use crate::task::Task;
use crate::work::WorkUnit;

#[derive(
    Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct StaffId(pub u32);

impl fmt::Display for StaffId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// What the scheduler needs to know about an assignee.
pub trait Worker {
    fn id(&self) -> StaffId;
    fn workforce(&self) -> f64;
    /// Skill in `[0, 1]` for work of `category`.
    fn skill_for(&self, category: TaskCategory) -> f64;
}

/// Staff and team lookups consumed by the scheduler.
pub trait StaffDirectory {
    fn worker(&self, id: StaffId) -> Option<&dyn Worker>;
    /// Members of every team whose default assignment covers `category`.
    fn default_team_members(&self, category: TaskCategory) -> Vec<StaffId>;
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Skills {
    pub field: f64,
    pub winery: f64,
    pub administration: f64,
    pub sales: f64,
    pub maintenance: f64,
}

impl Skills {
    pub fn uniform(value: f64) -> Self {
        Self {
            field: value,
            winery: value,
            administration: value,
            sales: value,
            maintenance: value,
        }
    }

    pub fn get(&self, category: TaskCategory) -> f64 {
        match category {
            TaskCategory::Field => self.field,
            TaskCategory::Winery => self.winery,
            TaskCategory::Administration => self.administration,
            TaskCategory::Sales => self.sales,
            TaskCategory::Maintenance => self.maintenance,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct StaffMember {
    pub id: StaffId,
    pub name: String,
    pub workforce: f64,
    pub skills: Skills,
    #[serde(default)]
    pub wage: f64,
}

impl Worker for StaffMember {
    fn id(&self) -> StaffId {
        self.id
    }

    fn workforce(&self) -> f64 {
        self.workforce
    }

    fn skill_for(&self, category: TaskCategory) -> f64 {
        self.skills.get(category)
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Team {
    pub name: String,
    pub members: Vec<StaffId>,
    /// Categories whose new tasks receive this team automatically.
    #[serde(default)]
    pub default_categories: Vec<TaskCategory>,
}

#[derive(Resource, Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct StaffRoster {
    staff: Vec<StaffMember>,
    #[serde(default)]
    teams: Vec<Team>,
    #[serde(default)]
    next_id: u32,
}

impl StaffRoster {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seeded starting roster; identical seeds yield identical staff.
    pub fn with_seed(seed: u64, count: usize) -> Self {
        let mut rng = SmallRng::seed_from_u64(seed);
        let first_names = [
            "Ana", "Bruno", "Clara", "Dario", "Elena", "Fabio", "Giulia", "Hugo", "Ines",
            "Joao", "Lucia", "Marco",
        ];
        let last_names = [
            "Rossi", "Costa", "Moreau", "Silva", "Bianchi", "Lefevre", "Santos", "Ricci",
        ];

        let mut roster = Self::new();
        for _ in 0..count {
            let name = format!(
                "{} {}",
                first_names[rng.gen_range(0..first_names.len())],
                last_names[rng.gen_range(0..last_names.len())]
            );
            let skills = Skills {
                field: random_skill(&mut rng),
                winery: random_skill(&mut rng),
                administration: random_skill(&mut rng),
                sales: random_skill(&mut rng),
                maintenance: random_skill(&mut rng),
            };
            let workforce = rng.gen_range(30.0..=60.0_f64).round();
            roster.hire(name, workforce, skills);
        }
        roster
    }

    pub fn hire(&mut self, name: impl Into<String>, workforce: f64, skills: Skills) -> StaffId {
        self.next_id = self
            .next_id
            .max(self.staff.iter().map(|s| s.id.0 + 1).max().unwrap_or(0));
        let id = StaffId(self.next_id);
        self.next_id += 1;
        self.staff.push(StaffMember {
            id,
            name: name.into(),
            workforce,
            skills,
            wage: 0.0,
        });
        id
    }

    pub fn member(&self, id: StaffId) -> Option<&StaffMember> {
        self.staff.iter().find(|s| s.id == id)
    }

    pub fn members(&self) -> &[StaffMember] {
        &self.staff
    }

    pub fn len(&self) -> usize {
        self.staff.len()
    }

    pub fn is_empty(&self) -> bool {
        self.staff.is_empty()
    }

    pub fn add_team(&mut self, team: Team) {
        self.teams.push(team);
    }

    pub fn teams(&self) -> &[Team] {
        &self.teams
    }

    pub fn team_mut(&mut self, name: &str) -> Option<&mut Team> {
        self.teams.iter_mut().find(|t| t.name == name)
    }
}

fn random_skill(rng: &mut SmallRng) -> f64 {
    let value: f64 = rng.gen_range(0.2..=1.0);
    (value * 100.0).round() / 100.0
}

impl StaffDirectory for StaffRoster {
    fn worker(&self, id: StaffId) -> Option<&dyn Worker> {
        self.member(id).map(|member| member as &dyn Worker)
    }

    fn default_team_members(&self, category: TaskCategory) -> Vec<StaffId> {
        let mut members: Vec<StaffId> = self
            .teams
            .iter()
            .filter(|team| team.default_categories.contains(&category))
            .flat_map(|team| team.members.iter().copied())
            .filter(|id| self.member(*id).is_some())
            .collect();
        members.sort_unstable();
        members.dedup();
        members
    }
}

/// Per-tick assignment counts used to split each worker's workforce.
#[derive(Debug, Default, Clone)]
pub struct StaffAllocator {
    counts: HashMap<StaffId, u32>,
}

impl StaffAllocator {
    /// Count, for every staff member, how many of `tasks` assign them.
    pub fn from_tasks<'a>(tasks: impl IntoIterator<Item = &'a Task>) -> Self {
        let mut counts = HashMap::new();
        for task in tasks {
            for staff in &task.assigned_staff {
                *counts.entry(*staff).or_insert(0) += 1;
            }
        }
        Self { counts }
    }

    /// Number of tasks sharing `staff`; at least one.
    pub fn assignment_count(&self, staff: StaffId) -> u32 {
        self.counts.get(&staff).copied().unwrap_or(1).max(1)
    }

    pub fn work_unit(&self, worker: &dyn Worker, category: TaskCategory) -> WorkUnit {
        WorkUnit::new(
            worker.workforce(),
            worker.skill_for(category),
            self.assignment_count(worker.id()),
        )
    }

    /// Raw work the task's staff put in this tick, before tool bonuses.
    pub fn raw_work<D>(&self, task: &Task, directory: &D) -> f64
    where
        D: StaffDirectory + ?Sized,
    {
        task.assigned_staff
            .iter()
            .map(|id| match directory.worker(*id) {
                Some(worker) => self.work_unit(worker, task.category).raw(),
                None => {
                    debug!(
                        target: "winery::staff",
                        task = %task.id,
                        staff = %id,
                        "staff.missing_from_directory"
                    );
                    0.0
                }
            })
            .sum()
    }
}
