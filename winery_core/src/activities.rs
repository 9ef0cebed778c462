//! Winery domain state and the handlers that turn finished work into it.

use std::collections::BTreeMap;

use bevy::prelude::Resource;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::info;
use winery_runtime::TaskActivity;

use crate::config::SchedulerConfig;
use crate::handlers::{TaskEvent, TaskHandler, TaskHandlerError, TaskHandlers};
use crate::scheduler::{SchedulerError, TaskScheduler, TaskSpec};
use crate::staff::StaffDirectory;
use crate::task::{TaskId, TaskParams, TaskTarget};
use crate::tools::BuildingRegistry;

pub const MUST_LITRES_PER_KG: f64 = 0.7;
pub const WINE_LITRES_PER_MUST_LITRE: f64 = 0.95;
const LOG_LIMIT: usize = 64;

const PARAM_COST: &str = "cost";
const PARAM_YIELD_KG: &str = "yieldKg";
const PARAM_KG: &str = "kg";
const PARAM_LITRES: &str = "litres";
const PARAM_CANDIDATE: &str = "candidate";
const PARAM_WORKFORCE: &str = "workforce";
const PARAM_SKILL: &str = "skill";
const PARAM_LEVEL: &str = "level";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Field {
    pub id: String,
    pub name: String,
    pub acres: f64,
    pub planted: bool,
    pub expected_yield_kg: f64,
    /// Grapes still on the vines this season.
    pub remaining_yield_kg: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PendingHire {
    pub name: String,
    pub workforce: f64,
    pub skill: f64,
}

#[derive(Resource, Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WineryState {
    pub money: f64,
    pub fields: Vec<Field>,
    pub grapes_kg: f64,
    pub must_litres: f64,
    pub wine_litres: f64,
    /// Per building, in `[0, 1]`.
    pub building_condition: BTreeMap<String, f64>,
    pub pending_hires: Vec<PendingHire>,
    pub pending_upgrades: Vec<String>,
    pub log: Vec<String>,
}

impl WineryState {
    pub fn from_config(config: &SchedulerConfig) -> Self {
        let fields = config
            .fields()
            .iter()
            .map(|field| Field {
                id: field.id.clone(),
                name: field.name.clone(),
                acres: field.acres,
                planted: field.planted,
                expected_yield_kg: field.expected_yield_kg,
                remaining_yield_kg: if field.planted {
                    field.expected_yield_kg
                } else {
                    0.0
                },
            })
            .collect();
        let building_condition = config
            .buildings()
            .iter()
            .map(|building| (building.id.clone(), 1.0))
            .collect();
        Self {
            money: config.starting_money(),
            fields,
            building_condition,
            ..Self::default()
        }
    }

    pub fn field(&self, id: &str) -> Option<&Field> {
        self.fields.iter().find(|field| field.id == id)
    }

    pub fn field_mut(&mut self, id: &str) -> Option<&mut Field> {
        self.fields.iter_mut().find(|field| field.id == id)
    }

    fn target_field_mut(&mut self, target: Option<&TaskTarget>) -> Result<&mut Field, TaskHandlerError> {
        let target = target.ok_or(TaskHandlerError::MissingTarget)?;
        self.fields
            .iter_mut()
            .find(|field| field.id == target.id)
            .ok_or_else(|| TaskHandlerError::UnknownTarget(target.to_string()))
    }

    pub fn charge(&mut self, amount: f64) -> Result<(), TaskHandlerError> {
        if amount > self.money {
            return Err(TaskHandlerError::InsufficientFunds {
                needed: amount,
                available: self.money,
            });
        }
        self.money -= amount.max(0.0);
        Ok(())
    }

    /// Append to the activity log, keeping only the most recent entries.
    pub fn record(&mut self, line: impl Into<String>) {
        self.log.push(line.into());
        if self.log.len() > LOG_LIMIT {
            let excess = self.log.len() - LOG_LIMIT;
            self.log.drain(..excess);
        }
    }

    /// Weekly wear on every building.
    pub fn wear_buildings(&mut self, rate: f64) {
        for condition in self.building_condition.values_mut() {
            *condition = (*condition - rate).clamp(0.0, 1.0);
        }
    }
}

/// What the player asked for; turned into a task by [`schedule_activity`].
#[derive(Debug, Clone, PartialEq)]
pub struct ActivityRequest {
    pub activity: TaskActivity,
    pub target: Option<String>,
    pub amount: Option<f64>,
    pub candidate: Option<String>,
}

impl ActivityRequest {
    pub fn new(activity: TaskActivity) -> Self {
        Self {
            activity,
            target: None,
            amount: None,
            candidate: None,
        }
    }

    pub fn target(mut self, target: impl Into<String>) -> Self {
        self.target = Some(target.into());
        self
    }

    pub fn amount(mut self, amount: f64) -> Self {
        self.amount = Some(amount);
        self
    }

    pub fn candidate(mut self, name: impl Into<String>) -> Self {
        self.candidate = Some(name.into());
        self
    }
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ScheduleError {
    #[error("{target} is busy with task {task}")]
    TargetBusy { target: TaskTarget, task: TaskId },
    #[error("cannot plan {activity}: {source}")]
    Plan {
        activity: TaskActivity,
        #[source]
        source: TaskHandlerError,
    },
    #[error(transparent)]
    Scheduler(#[from] SchedulerError),
}

/// Work, cost and reservations of a request, checked against current state.
#[derive(Debug, Clone, PartialEq)]
pub struct ActivityPlan {
    pub activity: TaskActivity,
    pub target: Option<TaskTarget>,
    pub total_work: f64,
    pub cost: f64,
    pub params: TaskParams,
    reserve: Reservation,
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum Reservation {
    None,
    Grapes(f64),
    Must(f64),
}

pub fn plan_activity(
    config: &SchedulerConfig,
    state: &WineryState,
    buildings: &BuildingRegistry,
    request: &ActivityRequest,
) -> Result<ActivityPlan, TaskHandlerError> {
    let activity = request.activity;
    let profile = config.activities().profile(activity);
    let mut params = TaskParams::new();
    let mut reserve = Reservation::None;

    let (target, units) = match activity {
        TaskActivity::Planting | TaskActivity::Harvesting => {
            let id = request.target.as_deref().ok_or(TaskHandlerError::MissingTarget)?;
            let field = state
                .field(id)
                .ok_or_else(|| TaskHandlerError::UnknownTarget(TaskTarget::field(id).to_string()))?;
            if activity == TaskActivity::Planting && field.planted {
                return Err(TaskHandlerError::Domain(format!("{} is already planted", field.name)));
            }
            if activity == TaskActivity::Harvesting {
                if !field.planted || field.remaining_yield_kg <= 0.0 {
                    return Err(TaskHandlerError::Domain(format!(
                        "{} has nothing to harvest",
                        field.name
                    )));
                }
                params.insert(PARAM_YIELD_KG, field.remaining_yield_kg);
            }
            (Some(TaskTarget::field(id)), field.acres)
        }
        TaskActivity::Crushing => {
            let kg = request.amount.unwrap_or(state.grapes_kg);
            if kg <= 0.0 || kg > state.grapes_kg {
                return Err(TaskHandlerError::InsufficientStock {
                    resource: "grapes",
                    needed: kg,
                    available: state.grapes_kg,
                });
            }
            params.insert(PARAM_KG, kg);
            reserve = Reservation::Grapes(kg);
            (None, kg)
        }
        TaskActivity::Fermentation => {
            let litres = request.amount.unwrap_or(state.must_litres);
            if litres <= 0.0 || litres > state.must_litres {
                return Err(TaskHandlerError::InsufficientStock {
                    resource: "must",
                    needed: litres,
                    available: state.must_litres,
                });
            }
            params.insert(PARAM_LITRES, litres);
            reserve = Reservation::Must(litres);
            (None, litres)
        }
        TaskActivity::Maintenance | TaskActivity::Upgrade => {
            let id = request.target.as_deref().ok_or(TaskHandlerError::MissingTarget)?;
            let building = buildings
                .building(id)
                .ok_or_else(|| TaskHandlerError::UnknownTarget(TaskTarget::building(id).to_string()))?;
            let units = if activity == TaskActivity::Upgrade {
                params.insert(PARAM_LEVEL, building.level);
                f64::from(building.level)
            } else {
                0.0
            };
            (Some(TaskTarget::building(id)), units)
        }
        TaskActivity::Hiring => {
            let name = request
                .candidate
                .as_deref()
                .map(str::trim)
                .filter(|name| !name.is_empty())
                .ok_or(TaskHandlerError::MissingParam(PARAM_CANDIDATE))?;
            params.insert(PARAM_CANDIDATE, name);
            params.insert(PARAM_WORKFORCE, config.hire().workforce);
            params.insert(PARAM_SKILL, config.hire().skill);
            (None, 0.0)
        }
    };

    Ok(ActivityPlan {
        activity,
        target,
        total_work: profile.work(units),
        cost: profile.cost(units),
        params,
        reserve,
    })
}

/// Charge the plan's cost and take its stock out of inventory. Nothing is
/// changed unless everything can be paid for.
fn reserve(state: &mut WineryState, cost: f64, reservation: Reservation) -> Result<(), TaskHandlerError> {
    match reservation {
        Reservation::Grapes(kg) if kg > state.grapes_kg => {
            return Err(TaskHandlerError::InsufficientStock {
                resource: "grapes",
                needed: kg,
                available: state.grapes_kg,
            })
        }
        Reservation::Must(litres) if litres > state.must_litres => {
            return Err(TaskHandlerError::InsufficientStock {
                resource: "must",
                needed: litres,
                available: state.must_litres,
            })
        }
        _ => {}
    }
    state.charge(cost)?;
    match reservation {
        Reservation::Grapes(kg) => state.grapes_kg -= kg,
        Reservation::Must(litres) => state.must_litres -= litres,
        Reservation::None => {}
    }
    Ok(())
}

/// Plan a request and hand it to the scheduler.
///
/// Refuses targets that already have a task. The cost and any stock are
/// taken from `state` while the task is created.
pub fn schedule_activity<S>(
    scheduler: &mut TaskScheduler,
    staff: &S,
    state: &mut WineryState,
    buildings: &BuildingRegistry,
    config: &SchedulerConfig,
    request: &ActivityRequest,
) -> Result<TaskId, ScheduleError>
where
    S: StaffDirectory + ?Sized,
{
    let plan = plan_activity(config, state, buildings, request).map_err(|source| {
        ScheduleError::Plan {
            activity: request.activity,
            source,
        }
    })?;
    if let Some(target) = plan.target.as_ref() {
        if let Some(current) = scheduler.target_current_task(target) {
            return Err(ScheduleError::TargetBusy {
                target: target.clone(),
                task: current.id,
            });
        }
    }

    let ActivityPlan {
        activity,
        target,
        total_work,
        cost,
        params,
        reserve: reservation,
    } = plan;
    let mut spec = TaskSpec::new(activity, total_work)
        .params(params)
        .on_create(move |_, params| {
            reserve(state, cost, reservation)?;
            params.insert(PARAM_COST, cost);
            Ok(())
        });
    if let Some(target) = target {
        spec = spec.target(target);
    }
    Ok(scheduler.add_task(spec, staff)?)
}

pub struct PlantingHandler;

impl TaskHandler<WineryState> for PlantingHandler {
    fn on_complete(&mut self, state: &mut WineryState, event: &TaskEvent<'_>) -> Result<(), TaskHandlerError> {
        let field = state.target_field_mut(event.target)?;
        field.planted = true;
        field.remaining_yield_kg = field.expected_yield_kg;
        let line = format!("Planted {}", field.name);
        state.record(line);
        Ok(())
    }
}

/// Picks grapes in proportion to the progress made since the last tick.
pub struct HarvestHandler;

impl TaskHandler<WineryState> for HarvestHandler {
    fn on_progress(&mut self, state: &mut WineryState, event: &TaskEvent<'_>) -> Result<(), TaskHandlerError> {
        let planned = event
            .params
            .get_f64(PARAM_YIELD_KG)
            .ok_or(TaskHandlerError::MissingParam(PARAM_YIELD_KG))?;
        let field = state.target_field_mut(event.target)?;
        let picked = (event.progress_delta() * planned).min(field.remaining_yield_kg);
        field.remaining_yield_kg -= picked;
        let name = field.name.clone();
        state.grapes_kg += picked;
        if event.progress >= 1.0 {
            state.record(format!("Harvest of {name} finished"));
        }
        Ok(())
    }
}

pub struct CrushingHandler;

impl TaskHandler<WineryState> for CrushingHandler {
    fn on_complete(&mut self, state: &mut WineryState, event: &TaskEvent<'_>) -> Result<(), TaskHandlerError> {
        let kg = event
            .params
            .get_f64(PARAM_KG)
            .ok_or(TaskHandlerError::MissingParam(PARAM_KG))?;
        let litres = kg * MUST_LITRES_PER_KG;
        state.must_litres += litres;
        state.record(format!("Crushed {kg:.0} kg into {litres:.0} l of must"));
        Ok(())
    }
}

/// Converts reserved must into wine as fermentation progresses.
pub struct FermentationHandler;

impl TaskHandler<WineryState> for FermentationHandler {
    fn on_progress(&mut self, state: &mut WineryState, event: &TaskEvent<'_>) -> Result<(), TaskHandlerError> {
        let litres = event
            .params
            .get_f64(PARAM_LITRES)
            .ok_or(TaskHandlerError::MissingParam(PARAM_LITRES))?;
        state.wine_litres += event.progress_delta() * litres * WINE_LITRES_PER_MUST_LITRE;
        if event.progress >= 1.0 {
            state.record(format!("Fermented {litres:.0} l of must"));
        }
        Ok(())
    }
}

pub struct MaintenanceHandler;

impl TaskHandler<WineryState> for MaintenanceHandler {
    fn on_complete(&mut self, state: &mut WineryState, event: &TaskEvent<'_>) -> Result<(), TaskHandlerError> {
        let target = event.target.ok_or(TaskHandlerError::MissingTarget)?;
        let condition = state
            .building_condition
            .get_mut(&target.id)
            .ok_or_else(|| TaskHandlerError::UnknownTarget(target.to_string()))?;
        *condition = 1.0;
        state.record(format!("Maintained {}", target.id));
        Ok(())
    }
}

/// Queues the candidate; the roster picks them up after the tick.
pub struct HiringHandler;

impl TaskHandler<WineryState> for HiringHandler {
    fn on_complete(&mut self, state: &mut WineryState, event: &TaskEvent<'_>) -> Result<(), TaskHandlerError> {
        let name = event
            .params
            .get_str(PARAM_CANDIDATE)
            .ok_or(TaskHandlerError::MissingParam(PARAM_CANDIDATE))?
            .to_string();
        let workforce = event.params.get_f64(PARAM_WORKFORCE).unwrap_or(40.0);
        let skill = event.params.get_f64(PARAM_SKILL).unwrap_or(0.5);
        state.record(format!("Hired {name}"));
        state.pending_hires.push(PendingHire {
            name,
            workforce,
            skill,
        });
        Ok(())
    }
}

/// Queues the building; the registry applies the new level after the tick.
pub struct UpgradeHandler;

impl TaskHandler<WineryState> for UpgradeHandler {
    fn on_complete(&mut self, state: &mut WineryState, event: &TaskEvent<'_>) -> Result<(), TaskHandlerError> {
        let target = event.target.ok_or(TaskHandlerError::MissingTarget)?;
        state.pending_upgrades.push(target.id.clone());
        state.record(format!("Upgraded {}", target.id));
        Ok(())
    }
}

/// Handlers for every winery activity.
pub fn winery_handlers() -> TaskHandlers<WineryState> {
    let handlers = TaskHandlers::new()
        .with(TaskActivity::Planting, PlantingHandler)
        .with(TaskActivity::Harvesting, HarvestHandler)
        .with(TaskActivity::Crushing, CrushingHandler)
        .with(TaskActivity::Fermentation, FermentationHandler)
        .with(TaskActivity::Maintenance, MaintenanceHandler)
        .with(TaskActivity::Hiring, HiringHandler)
        .with(TaskActivity::Upgrade, UpgradeHandler);
    info!(
        target: "winery::activities",
        handlers = handlers.len(),
        "activities.registered"
    );
    handlers
}
