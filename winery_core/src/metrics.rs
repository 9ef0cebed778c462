use bevy::prelude::*;
use tracing::debug;

use crate::calendar::GameCalendar;
use crate::scheduler::{TaskScheduler, TickReport};
use crate::tools::BuildingRegistry;

/// Outcome of the most recent `process_tick`, kept for metrics and clients.
#[derive(Resource, Default, Debug, Clone)]
pub struct LastTickReport(pub TickReport);

#[derive(Resource, Default, Debug, Clone, PartialEq)]
pub struct SchedulerMetrics {
    pub tick: u64,
    pub active_tasks: usize,
    pub completed_last_tick: usize,
    pub completed_total: u64,
    pub work_applied_last_tick: f64,
    pub handler_failures_total: u64,
    pub locked_tools: usize,
}

pub fn collect_metrics(
    calendar: Res<GameCalendar>,
    scheduler: Res<TaskScheduler>,
    buildings: Res<BuildingRegistry>,
    report: Res<LastTickReport>,
    mut metrics: ResMut<SchedulerMetrics>,
) {
    let report = &report.0;
    metrics.tick = calendar.tick;
    metrics.active_tasks = scheduler.len();
    metrics.completed_last_tick = report.completed.len();
    metrics.completed_total += report.completed.len() as u64;
    metrics.work_applied_last_tick = report.work_applied;
    metrics.handler_failures_total += report.handler_failures.len() as u64;
    metrics.locked_tools = buildings.locked_tool_count();

    debug!(
        target: "winery::metrics",
        tick = metrics.tick,
        active = metrics.active_tasks,
        completed = metrics.completed_last_tick,
        work = metrics.work_applied_last_tick,
        locked_tools = metrics.locked_tools,
        "metrics.collected"
    );
}
