use bevy::prelude::*;
use tracing::{debug, info, warn};

use crate::activities::WineryState;
use crate::calendar::GameCalendar;
use crate::config::SchedulerConfigHandle;
use crate::handlers::TaskHandlers;
use crate::metrics::LastTickReport;
use crate::persistence::{BuildingStore, GamePersistence, GameStateStore, SavedGame};
use crate::scheduler::TaskScheduler;
use crate::staff::{Skills, StaffRoster};
use crate::tools::BuildingRegistry;

/// Condition lost by every building each week.
pub const BUILDING_WEAR_PER_WEEK: f64 = 0.005;

pub fn process_tasks(
    mut scheduler: ResMut<TaskScheduler>,
    roster: Res<StaffRoster>,
    mut buildings: ResMut<BuildingRegistry>,
    mut handlers: ResMut<TaskHandlers<WineryState>>,
    mut state: ResMut<WineryState>,
    mut last_report: ResMut<LastTickReport>,
) {
    let report = scheduler.process_tick(&*roster, &mut *buildings, &mut *handlers, &mut *state);
    debug!(
        target: "winery::systems",
        processed = report.processed,
        completed = report.completed.len(),
        failures = report.handler_failures.len(),
        "tick.processed"
    );
    last_report.0 = report;
}

/// Move staff recruited by finished hiring tasks onto the roster.
pub fn apply_pending_hires(
    config: Res<SchedulerConfigHandle>,
    mut state: ResMut<WineryState>,
    mut roster: ResMut<StaffRoster>,
) {
    if state.pending_hires.is_empty() {
        return;
    }
    let hire_defaults = config.config().hire();
    for hire in std::mem::take(&mut state.pending_hires) {
        let workforce = if hire.workforce > 0.0 {
            hire.workforce
        } else {
            hire_defaults.workforce
        };
        let id = roster.hire(hire.name.clone(), workforce, Skills::uniform(hire.skill.clamp(0.0, 1.0)));
        info!(
            target: "winery::staff",
            staff = %id,
            name = %hire.name,
            "staff.hired"
        );
    }
}

/// Raise the level and tool capacity of buildings whose upgrade finished.
pub fn apply_building_upgrades(mut state: ResMut<WineryState>, mut buildings: ResMut<BuildingRegistry>) {
    if state.pending_upgrades.is_empty() {
        return;
    }
    for id in std::mem::take(&mut state.pending_upgrades) {
        match buildings.building_mut(&id) {
            Some(building) => {
                building.level += 1;
                building.capacity += 1;
                info!(
                    target: "winery::buildings",
                    building = %id,
                    level = building.level,
                    capacity = building.capacity,
                    "building.upgraded"
                );
            }
            None => warn!(
                target: "winery::buildings",
                building = %id,
                "building.upgrade_skipped=unknown"
            ),
        }
    }
}

pub fn wear_buildings(mut state: ResMut<WineryState>) {
    state.wear_buildings(BUILDING_WEAR_PER_WEEK);
}

/// Write buildings to the store when tools or locks changed this week.
pub fn persist_buildings(
    mut buildings: ResMut<BuildingRegistry>,
    mut persistence: ResMut<GamePersistence>,
) {
    if !buildings.is_dirty() {
        return;
    }
    let Some(store) = persistence.store_mut() else {
        return;
    };
    let result = store.store_buildings(buildings.buildings());
    match result {
        Ok(()) => buildings.mark_clean(),
        Err(err) => warn!(
            target: "winery::persistence",
            error = %err,
            "buildings.save_failed"
        ),
    }
}

/// Write money, stock, staff and the calendar to the store once the week is
/// over.
pub fn persist_game(
    state: Res<WineryState>,
    roster: Res<StaffRoster>,
    calendar: Res<GameCalendar>,
    mut persistence: ResMut<GamePersistence>,
) {
    let Some(store) = persistence.store_mut() else {
        return;
    };
    let game = SavedGame {
        state: state.clone(),
        roster: roster.clone(),
        calendar: *calendar,
    };
    if let Err(err) = store.store_game(&game) {
        warn!(
            target: "winery::persistence",
            error = %err,
            tick = calendar.tick,
            "game.save_failed"
        );
    }
}

pub fn advance_calendar(mut calendar: ResMut<GameCalendar>) {
    if calendar.advance() {
        info!(
            target: "winery::calendar",
            season = %calendar.season,
            year = calendar.year,
            "calendar.season_started"
        );
    }
    debug!(
        target: "winery::calendar",
        tick = calendar.tick,
        week = calendar.week,
        "calendar.advanced"
    );
}
