//! Domain callbacks keyed by [`TaskActivity`].
//!
//! Every task names its activity when it is created; the scheduler looks the
//! handler up here when the task reports progress or completes. The display
//! name of a task never takes part in dispatch.

use std::collections::HashMap;

use bevy::prelude::Resource;
use thiserror::Error;
use winery_runtime::TaskActivity;

use crate::task::{TaskId, TaskParams, TaskTarget};

/// What a handler sees of the task it is called for.
#[derive(Debug, Clone, Copy)]
pub struct TaskEvent<'a> {
    pub task_id: TaskId,
    pub name: &'a str,
    pub activity: TaskActivity,
    pub target: Option<&'a TaskTarget>,
    /// Current progress fraction.
    pub progress: f64,
    /// Progress reported on the previous tick (0 before the first).
    pub last_progress: f64,
    pub params: &'a TaskParams,
}

impl TaskEvent<'_> {
    /// Progress gained since the previous callback.
    pub fn progress_delta(&self) -> f64 {
        (self.progress - self.last_progress).max(0.0)
    }
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum TaskHandlerError {
    #[error("insufficient funds: need {needed:.2}, have {available:.2}")]
    InsufficientFunds { needed: f64, available: f64 },
    #[error("insufficient {resource}: need {needed:.2}, have {available:.2}")]
    InsufficientStock {
        resource: &'static str,
        needed: f64,
        available: f64,
    },
    #[error("target {0} not found")]
    UnknownTarget(String),
    #[error("task has no target")]
    MissingTarget,
    #[error("missing parameter '{0}'")]
    MissingParam(&'static str),
    #[error("{0}")]
    Domain(String),
}

/// Callback pair for one activity. `C` is the domain state the handler
/// mutates.
pub trait TaskHandler<C>: Send + Sync {
    /// Called every tick for progressive tasks, including the completing one.
    fn on_progress(&mut self, _ctx: &mut C, _event: &TaskEvent<'_>) -> Result<(), TaskHandlerError> {
        Ok(())
    }

    /// Called once when a completion task finishes.
    fn on_complete(&mut self, _ctx: &mut C, _event: &TaskEvent<'_>) -> Result<(), TaskHandlerError> {
        Ok(())
    }
}

type HandlerFn<C> =
    Box<dyn FnMut(&mut C, &TaskEvent<'_>) -> Result<(), TaskHandlerError> + Send + Sync>;

/// Closure-backed handler.
pub struct FnHandler<C> {
    progress: Option<HandlerFn<C>>,
    complete: Option<HandlerFn<C>>,
}

impl<C> FnHandler<C> {
    pub fn on_progress<F>(callback: F) -> Self
    where
        F: FnMut(&mut C, &TaskEvent<'_>) -> Result<(), TaskHandlerError> + Send + Sync + 'static,
    {
        Self {
            progress: Some(Box::new(callback)),
            complete: None,
        }
    }

    pub fn on_complete<F>(callback: F) -> Self
    where
        F: FnMut(&mut C, &TaskEvent<'_>) -> Result<(), TaskHandlerError> + Send + Sync + 'static,
    {
        Self {
            progress: None,
            complete: Some(Box::new(callback)),
        }
    }
}

impl<C> TaskHandler<C> for FnHandler<C> {
    fn on_progress(&mut self, ctx: &mut C, event: &TaskEvent<'_>) -> Result<(), TaskHandlerError> {
        match self.progress.as_mut() {
            Some(callback) => callback(ctx, event),
            None => Ok(()),
        }
    }

    fn on_complete(&mut self, ctx: &mut C, event: &TaskEvent<'_>) -> Result<(), TaskHandlerError> {
        match self.complete.as_mut() {
            Some(callback) => callback(ctx, event),
            None => Ok(()),
        }
    }
}

/// Registry of handlers, one per activity.
pub struct TaskHandlers<C> {
    handlers: HashMap<TaskActivity, Box<dyn TaskHandler<C>>>,
}

impl<C> Default for TaskHandlers<C> {
    fn default() -> Self {
        Self {
            handlers: HashMap::new(),
        }
    }
}

impl<C: Send + Sync + 'static> Resource for TaskHandlers<C> {}

impl<C> TaskHandlers<C> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `handler` for `activity`, returning any handler it replaces.
    pub fn register<H>(&mut self, activity: TaskActivity, handler: H) -> Option<Box<dyn TaskHandler<C>>>
    where
        H: TaskHandler<C> + 'static,
    {
        self.handlers.insert(activity, Box::new(handler))
    }

    pub fn with<H>(mut self, activity: TaskActivity, handler: H) -> Self
    where
        H: TaskHandler<C> + 'static,
    {
        self.register(activity, handler);
        self
    }

    pub fn contains(&self, activity: TaskActivity) -> bool {
        self.handlers.contains_key(&activity)
    }

    pub fn get_mut(&mut self, activity: TaskActivity) -> Option<&mut (dyn TaskHandler<C> + 'static)> {
        self.handlers.get_mut(&activity).map(|handler| handler.as_mut())
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(params: &TaskParams, progress: f64, last_progress: f64) -> TaskEvent<'_> {
        TaskEvent {
            task_id: TaskId(1),
            name: "Harvesting",
            activity: TaskActivity::Harvesting,
            target: None,
            progress,
            last_progress,
            params,
        }
    }

    #[test]
    fn fn_handler_routes_phases() {
        let mut handlers: TaskHandlers<Vec<&'static str>> = TaskHandlers::new()
            .with(
                TaskActivity::Harvesting,
                FnHandler::on_progress(|log: &mut Vec<&'static str>, _| {
                    log.push("progress");
                    Ok(())
                }),
            )
            .with(
                TaskActivity::Crushing,
                FnHandler::on_complete(|log: &mut Vec<&'static str>, _| {
                    log.push("complete");
                    Ok(())
                }),
            );

        let params = TaskParams::new();
        let mut log = Vec::new();
        let harvest = handlers.get_mut(TaskActivity::Harvesting).unwrap();
        harvest.on_progress(&mut log, &event(&params, 0.5, 0.0)).unwrap();
        harvest.on_complete(&mut log, &event(&params, 1.0, 0.5)).unwrap();
        let crush = handlers.get_mut(TaskActivity::Crushing).unwrap();
        crush.on_complete(&mut log, &event(&params, 1.0, 0.0)).unwrap();

        assert_eq!(log, vec!["progress", "complete"]);
        assert!(!handlers.contains(TaskActivity::Hiring));
        assert_eq!(handlers.len(), 2);
    }

    #[test]
    fn register_replaces_existing_handler() {
        let mut handlers: TaskHandlers<()> = TaskHandlers::new();
        assert!(handlers
            .register(TaskActivity::Hiring, FnHandler::on_complete(|_, _| Ok(())))
            .is_none());
        assert!(handlers
            .register(TaskActivity::Hiring, FnHandler::on_complete(|_, _| Ok(())))
            .is_some());
    }

    #[test]
    fn progress_delta_never_negative() {
        let params = TaskParams::new();
        assert!((event(&params, 0.75, 0.5).progress_delta() - 0.25).abs() < 1e-12);
        assert_eq!(event(&params, 0.5, 0.75).progress_delta(), 0.0);
    }
}
