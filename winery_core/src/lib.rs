//! Task scheduling engine for the winery management game.
//!
//! Staff, tools and weekly ticks drive long-running tasks to completion;
//! [`run_week`] resolves one week through the chained systems configured in
//! [`build_headless_app`].

pub mod activities;
pub mod calendar;
pub mod commands;
pub mod config;
pub mod handlers;
pub mod metrics;
pub mod notifications;
pub mod persistence;
pub mod scheduler;
pub mod staff;
mod systems;
pub mod task;
pub mod tools;
pub mod work;

use std::sync::Arc;

use bevy::prelude::*;
use tracing::{info, warn};
use winery_runtime::CommandPayload;

pub use activities::{winery_handlers, ActivityRequest, ScheduleError, WineryState};
pub use calendar::{GameCalendar, Season};
pub use commands::{list_tasks, CommandContext, CommandError};
pub use config::{
    load_scheduler_config_from_env, SchedulerConfig, SchedulerConfigError, SchedulerConfigHandle,
};
pub use handlers::{FnHandler, TaskEvent, TaskHandler, TaskHandlerError, TaskHandlers};
pub use metrics::{LastTickReport, SchedulerMetrics};
pub use notifications::{ChannelObserver, DisplayObserver, LogObserver, SchedulerNotice};
pub use persistence::{
    BuildingStore, FileStore, GamePersistence, GameStateStore, MemoryStore, PersistenceError,
    SaveFormat, SavedGame, TaskSnapshot, TaskStore, WorldStore,
};
pub use scheduler::{SchedulerError, TaskScheduler, TaskSpec, TickReport};
pub use staff::{Skills, StaffAllocator, StaffDirectory, StaffId, StaffMember, StaffRoster, Team};
pub use task::{TargetKind, Task, TaskId, TaskParams, TaskState, TaskTarget};
pub use tools::{
    Building, BuildingRegistry, ToolAllocator, ToolDirectory, ToolId, ToolKind, ToolLockError,
    ToolSpec,
};

/// Construct a Bevy [`App`] from the builtin configuration.
pub fn build_headless_app() -> App {
    build_headless_app_with_config(SchedulerConfig::builtin())
}

pub fn build_headless_app_with_config(config: Arc<SchedulerConfig>) -> App {
    let mut app = App::new();

    let roster = starting_roster(&config);
    let buildings = starting_buildings(&config);
    let mut scheduler = TaskScheduler::new();
    scheduler.add_observer(LogObserver);

    app.insert_resource(GameCalendar::new(config.weeks_per_season()))
        .insert_resource(WineryState::from_config(&config))
        .insert_resource(roster)
        .insert_resource(buildings)
        .insert_resource(scheduler)
        .insert_resource(winery_handlers())
        .insert_resource(GamePersistence::default())
        .insert_resource(LastTickReport::default())
        .insert_resource(SchedulerMetrics::default())
        .insert_resource(SchedulerConfigHandle::new(config))
        .add_plugins(MinimalPlugins)
        .add_systems(
            Update,
            (
                systems::process_tasks,
                systems::apply_pending_hires,
                systems::apply_building_upgrades,
                systems::wear_buildings,
                systems::persist_buildings,
                systems::advance_calendar,
                systems::persist_game,
                metrics::collect_metrics,
            )
                .chain(),
        );

    app
}

/// Seeded starting staff plus the configured default teams.
pub fn starting_roster(config: &SchedulerConfig) -> StaffRoster {
    let mut roster = StaffRoster::with_seed(config.roster_seed(), config.starting_staff());
    for team in config.teams() {
        let members: Vec<StaffId> = team
            .members
            .iter()
            .map(|id| StaffId(*id))
            .filter(|id| roster.member(*id).is_some())
            .collect();
        if members.len() < team.members.len() {
            warn!(
                target: "winery::config",
                team = %team.name,
                "team.members_missing"
            );
        }
        roster.add_team(Team {
            name: team.name.clone(),
            members,
            default_categories: team.default_categories.clone(),
        });
    }
    roster
}

/// Configured buildings stocked with the starting tools.
pub fn starting_buildings(config: &SchedulerConfig) -> BuildingRegistry {
    let mut registry = BuildingRegistry::new(
        config
            .buildings()
            .iter()
            .map(|b| Building::new(b.id.clone(), b.name.clone(), b.capacity))
            .collect(),
    );
    for starting in config.starting_tools() {
        let Some(spec) = config.tool_spec(&starting.tool_type) else {
            warn!(
                target: "winery::config",
                tool_type = %starting.tool_type,
                "starting_tool.skipped=unknown_type"
            );
            continue;
        };
        if let Err(err) = registry.purchase_tool(&starting.building, spec) {
            warn!(
                target: "winery::config",
                tool_type = %starting.tool_type,
                error = %err,
                "starting_tool.skipped"
            );
        }
    }
    registry.mark_clean();
    registry
}

/// Execute a single weekly tick.
///
/// Each call processes the chained systems configured in [`build_headless_app`]
/// (tasks → hires → upgrades → wear → building save → calendar → game save →
/// metrics).
pub fn run_week(app: &mut App) {
    app.update();
}

pub fn run_weeks(app: &mut App, weeks: u32) {
    for _ in 0..weeks {
        run_week(app);
    }
}

/// Attach `store` for tasks, buildings and game state and load whatever it
/// holds.
///
/// Stored buildings, winery state, roster and calendar replace the configured
/// ones; tool locks whose task did not survive are cleared. Returns the
/// number of tasks loaded.
pub fn enable_persistence<S>(app: &mut App, store: S) -> Result<usize, PersistenceError>
where
    S: TaskStore + WorldStore + Clone + 'static,
{
    let world = &mut app.world;
    if let Some(stored) = store.load_buildings()? {
        world.resource_mut::<BuildingRegistry>().replace_buildings(stored);
    }
    if let Some(game) = store.load_game()? {
        info!(
            target: "winery::persistence",
            tick = game.calendar.tick,
            staff = game.roster.len(),
            money = game.state.money,
            "game.loaded"
        );
        world.insert_resource(game.state);
        world.insert_resource(game.roster);
        world.insert_resource(game.calendar);
    }
    world.insert_resource(GamePersistence::new(store.clone()));

    world.resource_scope(|world, mut scheduler: Mut<TaskScheduler>| {
        scheduler.set_store(store);
        let loaded = scheduler.load()?;
        let mut buildings = world.resource_mut::<BuildingRegistry>();
        let orphaned = buildings.release_orphaned_locks(|task| scheduler.task(task).is_some());
        let dropped = scheduler.restore_tool_locks(&mut *buildings);
        info!(
            target: "winery::persistence",
            tasks = loaded,
            orphaned_locks = orphaned,
            dropped_locks = dropped.len(),
            "persistence.enabled"
        );
        Ok(loaded)
    })
}

/// Write buildings and game state to the attached store, if any.
fn save_world(world: &mut World) -> Result<(), PersistenceError> {
    let game = SavedGame {
        state: world.resource::<WineryState>().clone(),
        roster: world.resource::<StaffRoster>().clone(),
        calendar: *world.resource::<GameCalendar>(),
    };
    world.resource_scope(|world, mut persistence: Mut<GamePersistence>| {
        let Some(store) = persistence.store_mut() else {
            return Ok(());
        };
        let mut buildings = world.resource_mut::<BuildingRegistry>();
        store.store_buildings(buildings.buildings())?;
        buildings.mark_clean();
        store.store_game(&game)
    })
}

/// Apply a command, advancing the game for `week` and flushing stores for
/// `save`. Other commands save the game state once they succeed.
pub fn apply_command(app: &mut App, payload: &CommandPayload) -> Result<Vec<String>, CommandError> {
    match payload {
        CommandPayload::Week { steps } => {
            run_weeks(app, (*steps).max(1));
            let calendar = *app.world.resource::<GameCalendar>();
            let metrics = app.world.resource::<SchedulerMetrics>();
            Ok(vec![format!(
                "{calendar}: {} active, {} completed",
                metrics.active_tasks, metrics.completed_last_tick
            )])
        }
        CommandPayload::Save => {
            app.world.resource_mut::<TaskScheduler>().save()?;
            save_world(&mut app.world)?;
            Ok(vec!["Saved".to_string()])
        }
        _ => {
            let config = app.world.resource::<SchedulerConfigHandle>().get();
            let lines = app
                .world
                .resource_scope(|world, mut scheduler: Mut<TaskScheduler>| {
                    world.resource_scope(|world, mut buildings: Mut<BuildingRegistry>| {
                        world.resource_scope(|world, mut state: Mut<WineryState>| {
                            let roster = world.resource::<StaffRoster>();
                            CommandContext {
                                scheduler: &mut scheduler,
                                roster,
                                buildings: &mut buildings,
                                state: &mut state,
                                config: &config,
                            }
                            .execute(payload)
                        })
                    })
                })?;
            if let Err(err) = save_world(&mut app.world) {
                warn!(
                    target: "winery::persistence",
                    error = %err,
                    "game.save_failed"
                );
            }
            Ok(lines)
        }
    }
}
