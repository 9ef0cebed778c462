//! Applies player commands to the scheduler and winery state.

use std::fmt::Write as _;

use thiserror::Error;
use tracing::info;
use winery_runtime::{CommandPayload, TaskActivity};

use crate::activities::{schedule_activity, ActivityRequest, ScheduleError, WineryState};
use crate::config::SchedulerConfig;
use crate::handlers::TaskHandlerError;
use crate::persistence::PersistenceError;
use crate::scheduler::{SchedulerError, TaskScheduler};
use crate::staff::{StaffId, StaffRoster};
use crate::task::{Task, TaskId};
use crate::tools::{BuildingError, BuildingRegistry, ToolId, ToolIdParseError};

/// Share of the catalogue price returned when a tool is sold.
pub const SELL_REFUND_RATE: f64 = 0.5;

#[derive(Debug, Error)]
pub enum CommandError {
    #[error(transparent)]
    Schedule(#[from] ScheduleError),
    #[error(transparent)]
    Scheduler(#[from] SchedulerError),
    #[error(transparent)]
    Building(#[from] BuildingError),
    #[error(transparent)]
    ToolId(#[from] ToolIdParseError),
    #[error(transparent)]
    Persistence(#[from] PersistenceError),
    #[error("unknown tool type '{0}'")]
    UnknownToolType(String),
    #[error(transparent)]
    Funds(TaskHandlerError),
    #[error("'{0}' must be handled by the week driver")]
    NeedsDriver(&'static str),
}

/// Borrowed view of everything a command may touch.
pub struct CommandContext<'w> {
    pub scheduler: &'w mut TaskScheduler,
    pub roster: &'w StaffRoster,
    pub buildings: &'w mut BuildingRegistry,
    pub state: &'w mut WineryState,
    pub config: &'w SchedulerConfig,
}

impl CommandContext<'_> {
    /// Run one command and return the lines to show the player.
    pub fn execute(&mut self, payload: &CommandPayload) -> Result<Vec<String>, CommandError> {
        match payload {
            CommandPayload::Week { .. } => Err(CommandError::NeedsDriver("week")),
            CommandPayload::Save => Err(CommandError::NeedsDriver("save")),
            CommandPayload::Schedule {
                activity,
                target,
                amount,
            } => {
                let mut request = ActivityRequest::new(*activity);
                request.target = target.clone();
                request.amount = *amount;
                self.schedule(request)
            }
            CommandPayload::Hire { candidate } => {
                self.schedule(ActivityRequest::new(TaskActivity::Hiring).candidate(candidate.clone()))
            }
            CommandPayload::AssignStaff { task_id, staff } => {
                let id = TaskId(*task_id);
                let change = self.scheduler.assign_staff(
                    id,
                    staff.iter().copied().map(StaffId),
                    &mut *self.buildings,
                )?;
                let mut lines = vec![format!("Task #{id} now has {} staff", staff.len())];
                for (tool, err) in change.skipped {
                    lines.push(format!("Dropped {tool}: {err}"));
                }
                Ok(lines)
            }
            CommandPayload::SelectTool { task_id, tool } => {
                let id = TaskId(*task_id);
                let tool: ToolId = tool.parse()?;
                let selection = self.scheduler.select_tool(id, &tool, &mut *self.buildings)?;
                let mut lines = vec![format!("Task #{id} uses {tool}")];
                for released in selection.released {
                    lines.push(format!("Released {released}"));
                }
                Ok(lines)
            }
            CommandPayload::DeselectTool { task_id, tool } => {
                let id = TaskId(*task_id);
                let tool: ToolId = tool.parse()?;
                let line = if self.scheduler.deselect_tool(id, &tool, &mut *self.buildings)? {
                    format!("Task #{id} released {tool}")
                } else {
                    format!("Task #{id} was not using {tool}")
                };
                Ok(vec![line])
            }
            CommandPayload::BuyTool {
                building,
                tool_type,
            } => self.buy_tool(building, tool_type),
            CommandPayload::SellTool { building, tool } => {
                let tool: ToolId = tool.parse()?;
                let sold = self.buildings.sell_tool(building, &tool)?;
                let refund = self
                    .config
                    .tool_spec(&sold.id.tool_type)
                    .map(|spec| spec.price * SELL_REFUND_RATE)
                    .unwrap_or(0.0);
                self.state.money += refund;
                Ok(vec![format!("Sold {} for {refund:.2}", sold.id)])
            }
            CommandPayload::Cancel { task_id } => {
                let task = self
                    .scheduler
                    .cancel_task(TaskId(*task_id), &mut *self.buildings)?;
                Ok(vec![format!("Cancelled #{} {}", task.id, task.name)])
            }
            CommandPayload::ListTasks => Ok(list_tasks(&*self.scheduler)),
        }
    }

    fn schedule(&mut self, request: ActivityRequest) -> Result<Vec<String>, CommandError> {
        let id = schedule_activity(
            &mut *self.scheduler,
            self.roster,
            &mut *self.state,
            &*self.buildings,
            self.config,
            &request,
        )?;
        let line = match self.scheduler.task(id) {
            Some(task) => format!("Scheduled {}", describe_task(task)),
            None => format!("Scheduled #{id}"),
        };
        Ok(vec![line])
    }

    fn buy_tool(&mut self, building: &str, tool_type: &str) -> Result<Vec<String>, CommandError> {
        let config = self.config;
        let spec = config
            .tool_spec(tool_type)
            .ok_or_else(|| CommandError::UnknownToolType(tool_type.to_string()))?;
        if spec.price > self.state.money {
            return Err(CommandError::Funds(TaskHandlerError::InsufficientFunds {
                needed: spec.price,
                available: self.state.money,
            }));
        }
        let id = self.buildings.purchase_tool(building, spec)?;
        self.state.money -= spec.price;
        info!(
            target: "winery::commands",
            tool = %id,
            building,
            price = spec.price,
            "tool.purchased"
        );
        Ok(vec![format!("Bought {id} for {:.2}", spec.price)])
    }
}

/// One line per active task, in scheduling order.
pub fn list_tasks(scheduler: &TaskScheduler) -> Vec<String> {
    if scheduler.is_empty() {
        return vec!["No active tasks".to_string()];
    }
    scheduler.tasks().map(describe_task).collect()
}

pub fn describe_task(task: &Task) -> String {
    let mut line = format!("#{} {}", task.id, task.name);
    if let Some(target) = &task.target {
        let _ = write!(line, " [{target}]");
    }
    let _ = write!(
        line,
        " {:.1}% ({:.1}/{:.1}) staff={}",
        task.progress() * 100.0,
        task.applied_work(),
        task.total_work(),
        task.assigned_staff.len()
    );
    if !task.assigned_tools.is_empty() {
        let tools: Vec<String> = task.assigned_tools.iter().map(ToString::to_string).collect();
        let _ = write!(line, " tools={}", tools.join(","));
    }
    line
}
