use std::{
    env, fs, io,
    net::SocketAddr,
    path::{Path, PathBuf},
    sync::Arc,
};

use bevy::prelude::Resource;
use serde::Deserialize;
use thiserror::Error;
use tracing::{info, warn};
use winery_runtime::{TaskActivity, TaskCategory};

use crate::persistence::SaveFormat;
use crate::tools::ToolSpec;

pub const BUILTIN_SCHEDULER_CONFIG: &str = include_str!("data/scheduler_config.json");
pub const SCHEDULER_CONFIG_ENV: &str = "WINERY_CONFIG_PATH";

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    weeks_per_season: u32,
    starting_money: f64,
    starting_staff: usize,
    roster_seed: u64,
    command_bind: String,
    log_filter: String,
    save: SaveConfig,
    hire: HireConfig,
    fields: Vec<FieldConfig>,
    buildings: Vec<BuildingConfig>,
    teams: Vec<TeamConfig>,
    tool_catalog: Vec<ToolSpec>,
    starting_tools: Vec<StartingTool>,
    activities: ActivityTuning,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            weeks_per_season: 12,
            starting_money: 25_000.0,
            starting_staff: 4,
            roster_seed: 1337,
            command_bind: "127.0.0.1:41002".to_string(),
            log_filter: "info".to_string(),
            save: SaveConfig::default(),
            hire: HireConfig::default(),
            fields: Vec::new(),
            buildings: Vec::new(),
            teams: Vec::new(),
            tool_catalog: Vec::new(),
            starting_tools: Vec::new(),
            activities: ActivityTuning::default(),
        }
    }
}

impl SchedulerConfig {
    /// The embedded configuration. A broken builtin file falls back to the
    /// compiled defaults.
    pub fn builtin() -> Arc<Self> {
        match Self::from_json_str(BUILTIN_SCHEDULER_CONFIG) {
            Ok(config) => Arc::new(config),
            Err(err) => {
                warn!(
                    target: "winery::config",
                    error = %err,
                    "scheduler_config.builtin_invalid"
                );
                Arc::new(Self::default())
            }
        }
    }

    pub fn from_json_str(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    pub fn from_file(path: &Path) -> Result<Self, SchedulerConfigError> {
        let contents =
            fs::read_to_string(path).map_err(|source| SchedulerConfigError::ReadFailed {
                path: path.to_path_buf(),
                source,
            })?;
        let config = SchedulerConfig::from_json_str(&contents)?;
        Ok(config)
    }

    pub fn weeks_per_season(&self) -> u32 {
        self.weeks_per_season.max(1)
    }

    pub fn starting_money(&self) -> f64 {
        self.starting_money
    }

    pub fn starting_staff(&self) -> usize {
        self.starting_staff
    }

    pub fn roster_seed(&self) -> u64 {
        self.roster_seed
    }

    pub fn command_bind(&self) -> Result<SocketAddr, SchedulerConfigError> {
        self.command_bind
            .parse()
            .map_err(|_| SchedulerConfigError::InvalidBind(self.command_bind.clone()))
    }

    pub fn log_filter(&self) -> &str {
        &self.log_filter
    }

    pub fn save(&self) -> &SaveConfig {
        &self.save
    }

    pub fn hire(&self) -> &HireConfig {
        &self.hire
    }

    pub fn fields(&self) -> &[FieldConfig] {
        &self.fields
    }

    pub fn buildings(&self) -> &[BuildingConfig] {
        &self.buildings
    }

    pub fn teams(&self) -> &[TeamConfig] {
        &self.teams
    }

    pub fn tool_catalog(&self) -> &[ToolSpec] {
        &self.tool_catalog
    }

    /// Catalogue lookup by tool type, ignoring case.
    pub fn tool_spec(&self, tool_type: &str) -> Option<&ToolSpec> {
        self.tool_catalog
            .iter()
            .find(|spec| spec.tool_type.eq_ignore_ascii_case(tool_type))
    }

    pub fn starting_tools(&self) -> &[StartingTool] {
        &self.starting_tools
    }

    pub fn activities(&self) -> &ActivityTuning {
        &self.activities
    }
}

#[derive(Debug, Error)]
pub enum SchedulerConfigError {
    #[error("failed to parse scheduler config: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("failed to read scheduler config from {path:?}: {source}")]
    ReadFailed {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("invalid command bind address '{0}'")]
    InvalidBind(String),
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SaveConfig {
    pub enabled: bool,
    pub dir: PathBuf,
    pub format: SaveFormat,
}

impl Default for SaveConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            dir: PathBuf::from("saves"),
            format: SaveFormat::Json,
        }
    }
}

/// Stats given to staff hired through a hiring task.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct HireConfig {
    pub workforce: f64,
    pub skill: f64,
}

impl Default for HireConfig {
    fn default() -> Self {
        Self {
            workforce: 40.0,
            skill: 0.5,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct FieldConfig {
    pub id: String,
    pub name: String,
    pub acres: f64,
    pub expected_yield_kg: f64,
    #[serde(default)]
    pub planted: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BuildingConfig {
    pub id: String,
    pub name: String,
    pub capacity: usize,
}

/// A default team; `members` index into the seeded starting roster.
#[derive(Debug, Clone, Deserialize)]
pub struct TeamConfig {
    pub name: String,
    #[serde(default)]
    pub members: Vec<u32>,
    #[serde(default)]
    pub default_categories: Vec<TaskCategory>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StartingTool {
    pub building: String,
    pub tool_type: String,
}

/// Work and cost of one activity: `base + per_unit * units`.
///
/// Units are acres for field work, kilograms for crushing, litres for
/// fermentation and the current building level for upgrades.
#[derive(Debug, Clone, Copy, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct ActivityProfile {
    pub base_work: f64,
    pub work_per_unit: f64,
    pub base_cost: f64,
    pub cost_per_unit: f64,
}

impl ActivityProfile {
    pub fn work(&self, units: f64) -> f64 {
        self.base_work + self.work_per_unit * units.max(0.0)
    }

    pub fn cost(&self, units: f64) -> f64 {
        self.base_cost + self.cost_per_unit * units.max(0.0)
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ActivityTuning {
    planting: ActivityProfile,
    harvesting: ActivityProfile,
    crushing: ActivityProfile,
    fermentation: ActivityProfile,
    maintenance: ActivityProfile,
    hiring: ActivityProfile,
    upgrade: ActivityProfile,
}

impl ActivityTuning {
    pub fn profile(&self, activity: TaskActivity) -> &ActivityProfile {
        match activity {
            TaskActivity::Planting => &self.planting,
            TaskActivity::Harvesting => &self.harvesting,
            TaskActivity::Crushing => &self.crushing,
            TaskActivity::Fermentation => &self.fermentation,
            TaskActivity::Maintenance => &self.maintenance,
            TaskActivity::Hiring => &self.hiring,
            TaskActivity::Upgrade => &self.upgrade,
        }
    }
}

#[derive(Resource, Debug, Clone)]
pub struct SchedulerConfigHandle(pub Arc<SchedulerConfig>);

impl SchedulerConfigHandle {
    pub fn new(config: Arc<SchedulerConfig>) -> Self {
        Self(config)
    }

    pub fn get(&self) -> Arc<SchedulerConfig> {
        Arc::clone(&self.0)
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.0
    }
}

#[derive(Resource, Debug, Clone, Default)]
pub struct SchedulerConfigMetadata {
    path: Option<PathBuf>,
}

impl SchedulerConfigMetadata {
    pub fn new(path: Option<PathBuf>) -> Self {
        Self { path }
    }

    pub fn path(&self) -> Option<&PathBuf> {
        self.path.as_ref()
    }
}

/// Load the config named by `WINERY_CONFIG_PATH`, falling back to the
/// builtin copy when the variable is unset or the file is unusable.
pub fn load_scheduler_config_from_env() -> (Arc<SchedulerConfig>, SchedulerConfigMetadata) {
    let override_path = env::var(SCHEDULER_CONFIG_ENV).ok().map(PathBuf::from);

    if let Some(path) = override_path {
        match SchedulerConfig::from_file(&path) {
            Ok(config) => {
                info!(
                    target: "winery::config",
                    path = %path.display(),
                    "scheduler_config.loaded=file"
                );
                return (Arc::new(config), SchedulerConfigMetadata::new(Some(path)));
            }
            Err(err) => {
                warn!(
                    target: "winery::config",
                    path = %path.display(),
                    error = %err,
                    "scheduler_config.load_failed"
                );
            }
        }
    }

    let config = SchedulerConfig::builtin();
    info!(
        target: "winery::config",
        "scheduler_config.loaded=builtin"
    );
    (config, SchedulerConfigMetadata::new(None))
}
