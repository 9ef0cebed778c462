//! The task scheduler: owns active tasks and turns weekly ticks into work.

use std::collections::{BTreeMap, BTreeSet};

use bevy::prelude::Resource;
use thiserror::Error;
use tracing::{debug, info, warn};
use winery_runtime::{TaskActivity, TaskCategory, TaskKind};

use crate::handlers::{TaskEvent, TaskHandlerError, TaskHandlers};
use crate::notifications::{DisplayObserver, SchedulerNotice};
use crate::persistence::{PersistenceError, TaskSnapshot, TaskStore};
use crate::staff::{StaffAllocator, StaffDirectory, StaffId};
use crate::task::{Task, TaskId, TaskParams, TaskTarget, PARAM_LAST_PROGRESS};
use crate::tools::{ToolAllocator, ToolDirectory, ToolId, ToolLockError};
use crate::work::applied_work;

type CreateHook<'a> =
    Box<dyn FnOnce(Option<&TaskTarget>, &mut TaskParams) -> Result<(), TaskHandlerError> + 'a>;

/// Everything needed to create a task.
///
/// Name, kind and category default to the activity's own; the on-create
/// hook runs synchronously inside [`TaskScheduler::add_task`] and can veto
/// creation (e.g. when the winery cannot pay for the work up front).
pub struct TaskSpec<'a> {
    name: String,
    activity: TaskActivity,
    kind: TaskKind,
    category: TaskCategory,
    total_work: f64,
    target: Option<TaskTarget>,
    params: TaskParams,
    staff: Option<Vec<StaffId>>,
    on_create: Option<CreateHook<'a>>,
}

impl<'a> TaskSpec<'a> {
    pub fn new(activity: TaskActivity, total_work: f64) -> Self {
        Self {
            name: activity.label().to_string(),
            activity,
            kind: activity.kind(),
            category: activity.category(),
            total_work,
            target: None,
            params: TaskParams::new(),
            staff: None,
            on_create: None,
        }
    }

    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn kind(mut self, kind: TaskKind) -> Self {
        self.kind = kind;
        self
    }

    pub fn category(mut self, category: TaskCategory) -> Self {
        self.category = category;
        self
    }

    pub fn target(mut self, target: TaskTarget) -> Self {
        self.target = Some(target);
        self
    }

    pub fn params(mut self, params: TaskParams) -> Self {
        self.params = params;
        self
    }

    pub fn param(mut self, key: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.params.insert(key, value);
        self
    }

    /// Use these staff instead of the category's default teams.
    pub fn staff(mut self, staff: impl IntoIterator<Item = StaffId>) -> Self {
        self.staff = Some(staff.into_iter().collect());
        self
    }

    pub fn on_create<F>(mut self, hook: F) -> Self
    where
        F: FnOnce(Option<&TaskTarget>, &mut TaskParams) -> Result<(), TaskHandlerError> + 'a,
    {
        self.on_create = Some(Box::new(hook));
        self
    }
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum SchedulerError {
    #[error("task {0} does not exist")]
    UnknownTask(TaskId),
    #[error("task creation rejected: {0}")]
    CreationRejected(#[source] TaskHandlerError),
    #[error(transparent)]
    Tool(#[from] ToolLockError),
}

/// Outcome of [`TaskScheduler::assign_staff`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StaffChange {
    pub released: Vec<ToolId>,
    pub reacquired: Vec<ToolId>,
    pub skipped: Vec<(ToolId, ToolLockError)>,
}

/// Outcome of [`TaskScheduler::select_tool`].
#[derive(Debug, Clone, PartialEq)]
pub struct ToolSelection {
    pub selected: ToolId,
    /// `Task`-kind tools that were deselected to make room.
    pub released: Vec<ToolId>,
    pub already_held: bool,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct TickReport {
    pub processed: usize,
    pub work_applied: f64,
    pub completed: Vec<TaskId>,
    pub progress_callbacks: usize,
    pub completion_callbacks: usize,
    pub missing_handlers: usize,
    pub handler_failures: Vec<(TaskId, TaskHandlerError)>,
}

struct AcquiredTools {
    held: BTreeSet<ToolId>,
    reacquired: Vec<ToolId>,
    displaced: Vec<ToolId>,
    skipped: Vec<(ToolId, ToolLockError)>,
}

/// Lock `wanted` to task `id` one at a time, as if each were selected in
/// turn. A later `Task`-kind tool displaces an earlier one.
fn acquire_tools<T>(
    tools: &mut T,
    id: TaskId,
    staff_count: usize,
    wanted: Vec<ToolId>,
) -> AcquiredTools
where
    T: ToolDirectory + ?Sized,
{
    let mut acquired = AcquiredTools {
        held: BTreeSet::new(),
        reacquired: Vec::new(),
        displaced: Vec::new(),
        skipped: Vec::new(),
    };
    for tool in wanted {
        let plan = ToolAllocator::plan_selection(&*tools, id, &acquired.held, staff_count, &tool)
            .and_then(|displaced| ToolAllocator::assign(tools, &tool, id).map(|()| displaced));
        match plan {
            Ok(displaced) => {
                for old in displaced {
                    ToolAllocator::release(tools, &old, id);
                    acquired.held.remove(&old);
                    acquired.reacquired.retain(|t| t != &old);
                    acquired.displaced.push(old);
                }
                acquired.held.insert(tool.clone());
                acquired.reacquired.push(tool);
            }
            Err(err) => acquired.skipped.push((tool, err)),
        }
    }
    acquired
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Phase {
    Progress,
    Complete,
}

/// Single writer of the active task set.
#[derive(Resource, Default)]
pub struct TaskScheduler {
    tasks: BTreeMap<TaskId, Task>,
    next_id: u64,
    store: Option<Box<dyn TaskStore>>,
    observers: Vec<Box<dyn DisplayObserver>>,
}

impl TaskScheduler {
    pub fn new() -> Self {
        Self {
            next_id: 1,
            ..Self::default()
        }
    }

    pub fn with_store(store: impl TaskStore + 'static) -> Self {
        let mut scheduler = Self::new();
        scheduler.set_store(store);
        scheduler
    }

    pub fn set_store(&mut self, store: impl TaskStore + 'static) {
        self.store = Some(Box::new(store));
    }

    pub fn add_observer(&mut self, observer: impl DisplayObserver + 'static) {
        self.observers.push(Box::new(observer));
    }

    /// Replace the active tasks with the store's contents.
    pub fn load(&mut self) -> Result<usize, PersistenceError> {
        let Some(store) = self.store.as_ref() else {
            return Ok(0);
        };
        let snapshot = store.load_tasks()?;
        self.tasks.clear();
        for mut task in snapshot.tasks {
            task.normalize();
            self.tasks.insert(task.id, task);
        }
        let max_id = self.tasks.keys().map(|id| id.0).max().unwrap_or(0);
        self.next_id = self.next_id.max(snapshot.next_id).max(max_id + 1);
        info!(
            target: "winery::scheduler",
            tasks = self.tasks.len(),
            "tasks.loaded"
        );
        self.notify(SchedulerNotice::Loaded {
            tasks: self.tasks.len(),
        });
        Ok(self.tasks.len())
    }

    /// Re-take the tool locks recorded in loaded tasks under the selection
    /// rules. Tools that are gone, held elsewhere or over the task's
    /// `Individual` limit are dropped and reported; of several `Task`-kind
    /// tools only the last is kept.
    pub fn restore_tool_locks<T>(&mut self, tools: &mut T) -> Vec<(TaskId, ToolLockError)>
    where
        T: ToolDirectory + ?Sized,
    {
        let mut dropped = Vec::new();
        for task in self.tasks.values_mut() {
            let wanted: Vec<ToolId> =
                std::mem::take(&mut task.assigned_tools).into_iter().collect();
            ToolAllocator::release_all(tools, &wanted, task.id);
            let acquired = acquire_tools(tools, task.id, task.assigned_staff.len(), wanted);
            for tool in &acquired.displaced {
                warn!(
                    target: "winery::scheduler",
                    task = %task.id,
                    tool = %tool,
                    "task.tool_lock_dropped=displaced"
                );
            }
            for (tool, err) in acquired.skipped {
                warn!(
                    target: "winery::scheduler",
                    task = %task.id,
                    tool = %tool,
                    error = %err,
                    "task.tool_lock_dropped"
                );
                dropped.push((task.id, err));
            }
            task.assigned_tools = acquired.held;
            task.sync_selected_tools();
        }
        dropped
    }

    /// Write the active tasks to the store, surfacing any failure.
    pub fn save(&mut self) -> Result<(), PersistenceError> {
        let Some(store) = self.store.as_mut() else {
            return Ok(());
        };
        let snapshot = TaskSnapshot {
            next_id: self.next_id.max(1),
            tasks: self.tasks.values().cloned().collect(),
        };
        store.save_tasks(&snapshot)
    }

    fn persist(&mut self) {
        if let Err(err) = self.save() {
            warn!(
                target: "winery::scheduler",
                error = %err,
                "tasks.save_failed"
            );
        }
    }

    fn notify(&self, notice: SchedulerNotice) {
        for observer in &self.observers {
            observer.notify(&notice);
        }
    }

    pub fn add_task<S>(&mut self, spec: TaskSpec<'_>, staff: &S) -> Result<TaskId, SchedulerError>
    where
        S: StaffDirectory + ?Sized,
    {
        let TaskSpec {
            name,
            activity,
            kind,
            category,
            total_work,
            target,
            mut params,
            staff: explicit_staff,
            on_create,
        } = spec;

        if let Some(hook) = on_create {
            if let Err(err) = hook(target.as_ref(), &mut params) {
                warn!(
                    target: "winery::scheduler",
                    activity = %activity,
                    error = %err,
                    "task.create_rejected"
                );
                return Err(SchedulerError::CreationRejected(err));
            }
        }

        let id = TaskId(self.next_id.max(1));
        self.next_id = id.0 + 1;

        let mut task = Task::new(id, name, activity, kind, category, total_work);
        task.target = target;
        task.params = params;
        let members = explicit_staff.unwrap_or_else(|| staff.default_team_members(category));
        task.assigned_staff.extend(members);
        task.sync_assigned_staff();

        info!(
            target: "winery::scheduler",
            task = %id,
            name = %task.name,
            activity = %activity,
            total_work = task.total_work(),
            staff = task.assigned_staff.len(),
            "task.added"
        );
        let notice = SchedulerNotice::TaskAdded {
            task_id: id,
            name: task.name.clone(),
        };
        self.tasks.insert(id, task);
        self.persist();
        self.notify(notice);
        Ok(id)
    }

    fn detach<T>(&mut self, id: TaskId, tools: &mut T) -> Option<Task>
    where
        T: ToolDirectory + ?Sized,
    {
        let task = self.tasks.remove(&id)?;
        let released = ToolAllocator::release_all(tools, &task.assigned_tools, id);
        debug!(
            target: "winery::scheduler",
            task = %id,
            released,
            "task.tools_released"
        );
        Some(task)
    }

    /// Release the task's tools and drop it from the active set.
    pub fn remove_task<T>(&mut self, id: TaskId, tools: &mut T) -> Result<Task, SchedulerError>
    where
        T: ToolDirectory + ?Sized,
    {
        let task = self
            .detach(id, tools)
            .ok_or(SchedulerError::UnknownTask(id))?;
        self.persist();
        self.notify(SchedulerNotice::TaskRemoved {
            task_id: id,
            completed: task.is_complete(),
        });
        Ok(task)
    }

    /// Same as [`remove_task`](Self::remove_task); no callback fires and the
    /// accumulated work is discarded.
    pub fn cancel_task<T>(&mut self, id: TaskId, tools: &mut T) -> Result<Task, SchedulerError>
    where
        T: ToolDirectory + ?Sized,
    {
        let task = self.remove_task(id, tools)?;
        info!(
            target: "winery::scheduler",
            task = %id,
            discarded_work = task.applied_work(),
            "task.cancelled"
        );
        Ok(task)
    }

    /// Replace the task's staff.
    ///
    /// Every tool the task holds is released first; the tools listed in
    /// `params.selectedTools` are then re-acquired where still available and
    /// allowed by the new staff count.
    pub fn assign_staff<T>(
        &mut self,
        id: TaskId,
        staff: impl IntoIterator<Item = StaffId>,
        tools: &mut T,
    ) -> Result<StaffChange, SchedulerError>
    where
        T: ToolDirectory + ?Sized,
    {
        let task = self
            .tasks
            .get_mut(&id)
            .ok_or(SchedulerError::UnknownTask(id))?;

        let wanted = task.selected_tools();
        let released: Vec<ToolId> = std::mem::take(&mut task.assigned_tools)
            .into_iter()
            .inspect(|tool| {
                ToolAllocator::release(tools, tool, id);
            })
            .collect();

        task.assigned_staff = staff.into_iter().collect();
        task.sync_assigned_staff();

        let acquired = acquire_tools(tools, id, task.assigned_staff.len(), wanted);
        let change = StaffChange {
            released,
            reacquired: acquired.reacquired,
            skipped: acquired.skipped,
        };
        task.assigned_tools = acquired.held;
        task.sync_selected_tools();

        let staff_count = task.assigned_staff.len();
        info!(
            target: "winery::scheduler",
            task = %id,
            staff = staff_count,
            reacquired = change.reacquired.len(),
            skipped = change.skipped.len(),
            "task.staff_assigned"
        );
        self.persist();
        self.notify(SchedulerNotice::StaffAssigned {
            task_id: id,
            staff: staff_count,
        });
        Ok(change)
    }

    /// Lock `tool` to the task.
    ///
    /// Selecting a `Task`-kind tool deselects any other `Task`-kind tool of
    /// the task; `Individual` tools are capped at the task's staff count.
    pub fn select_tool<T>(
        &mut self,
        id: TaskId,
        tool: &ToolId,
        tools: &mut T,
    ) -> Result<ToolSelection, SchedulerError>
    where
        T: ToolDirectory + ?Sized,
    {
        let task = self
            .tasks
            .get_mut(&id)
            .ok_or(SchedulerError::UnknownTask(id))?;
        if task.assigned_tools.contains(tool) {
            return Ok(ToolSelection {
                selected: tool.clone(),
                released: Vec::new(),
                already_held: true,
            });
        }

        let displaced = ToolAllocator::plan_selection(
            &*tools,
            id,
            &task.assigned_tools,
            task.assigned_staff.len(),
            tool,
        )?;
        ToolAllocator::assign(tools, tool, id)?;
        for old in &displaced {
            ToolAllocator::release(tools, old, id);
            task.assigned_tools.remove(old);
        }
        task.assigned_tools.insert(tool.clone());
        task.sync_selected_tools();
        let count = task.assigned_tools.len();

        info!(
            target: "winery::scheduler",
            task = %id,
            tool = %tool,
            displaced = displaced.len(),
            "task.tool_selected"
        );
        self.persist();
        self.notify(SchedulerNotice::ToolsChanged {
            task_id: id,
            tools: count,
        });
        Ok(ToolSelection {
            selected: tool.clone(),
            released: displaced,
            already_held: false,
        })
    }

    /// Unlock `tool` from the task. Returns whether the task held it.
    pub fn deselect_tool<T>(
        &mut self,
        id: TaskId,
        tool: &ToolId,
        tools: &mut T,
    ) -> Result<bool, SchedulerError>
    where
        T: ToolDirectory + ?Sized,
    {
        let task = self
            .tasks
            .get_mut(&id)
            .ok_or(SchedulerError::UnknownTask(id))?;
        if !task.assigned_tools.remove(tool) {
            return Ok(false);
        }
        ToolAllocator::release(tools, tool, id);
        task.sync_selected_tools();
        let count = task.assigned_tools.len();
        self.persist();
        self.notify(SchedulerNotice::ToolsChanged {
            task_id: id,
            tools: count,
        });
        Ok(true)
    }

    /// Advance every active task by one weekly tick.
    ///
    /// Tasks are visited in insertion order. Progressive tasks report every
    /// tick, completion tasks once; finished tasks are removed and their
    /// tools released. A failing handler only affects its own task.
    pub fn process_tick<C, S, T>(
        &mut self,
        staff: &S,
        tools: &mut T,
        handlers: &mut TaskHandlers<C>,
        ctx: &mut C,
    ) -> TickReport
    where
        S: StaffDirectory + ?Sized,
        T: ToolDirectory + ?Sized,
    {
        let allocator = StaffAllocator::from_tasks(self.tasks.values());
        let mut report = TickReport::default();

        for task in self.tasks.values_mut() {
            report.processed += 1;
            let raw = allocator.raw_work(task, staff);
            let bonus = ToolAllocator::speed_bonus(&*tools, &task.assigned_tools);
            let before = task.applied_work();
            let progress = task.apply_work(applied_work(raw, bonus));
            report.work_applied += task.applied_work() - before;

            if task.kind == TaskKind::Progressive {
                let last_progress = task.last_progress();
                dispatch(handlers, ctx, task, Phase::Progress, last_progress, &mut report);
                task.params.insert(PARAM_LAST_PROGRESS, progress);
            }

            if task.is_complete() {
                if task.kind == TaskKind::Completion {
                    let last_progress = task.last_progress();
                    dispatch(handlers, ctx, task, Phase::Complete, last_progress, &mut report);
                }
                report.completed.push(task.id);
            }
        }

        for id in &report.completed {
            if let Some(task) = self.detach(*id, tools) {
                info!(
                    target: "winery::scheduler",
                    task = %id,
                    name = %task.name,
                    activity = %task.activity,
                    "task.completed"
                );
                self.notify(SchedulerNotice::TaskRemoved {
                    task_id: *id,
                    completed: true,
                });
            }
        }

        self.persist();
        self.notify(SchedulerNotice::TickProcessed {
            processed: report.processed,
            completed: report.completed.len(),
            active: self.tasks.len(),
        });
        report
    }

    pub fn is_target_busy(&self, target: &TaskTarget) -> bool {
        self.target_current_task(target).is_some()
    }

    pub fn target_current_task(&self, target: &TaskTarget) -> Option<&Task> {
        self.tasks.values().find(|task| task.targets(target))
    }

    pub fn task(&self, id: TaskId) -> Option<&Task> {
        self.tasks.get(&id)
    }

    /// Active tasks in insertion order.
    pub fn tasks(&self) -> impl Iterator<Item = &Task> {
        self.tasks.values()
    }

    pub fn snapshot(&self) -> Vec<Task> {
        self.tasks.values().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }
}

fn dispatch<C>(
    handlers: &mut TaskHandlers<C>,
    ctx: &mut C,
    task: &Task,
    phase: Phase,
    last_progress: f64,
    report: &mut TickReport,
) {
    let Some(handler) = handlers.get_mut(task.activity) else {
        warn!(
            target: "winery::scheduler",
            task = %task.id,
            activity = %task.activity,
            "task.handler_missing"
        );
        report.missing_handlers += 1;
        return;
    };

    let event = TaskEvent {
        task_id: task.id,
        name: &task.name,
        activity: task.activity,
        target: task.target.as_ref(),
        progress: task.progress(),
        last_progress,
        params: &task.params,
    };
    let result = match phase {
        Phase::Progress => {
            report.progress_callbacks += 1;
            handler.on_progress(ctx, &event)
        }
        Phase::Complete => {
            report.completion_callbacks += 1;
            handler.on_complete(ctx, &event)
        }
    };
    if let Err(err) = result {
        warn!(
            target: "winery::scheduler",
            task = %task.id,
            activity = %task.activity,
            error = %err,
            "task.handler_failed"
        );
        report.handler_failures.push((task.id, err));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handlers::FnHandler;
    use crate::notifications::ChannelObserver;
    use crate::persistence::MemoryStore;
    use crate::staff::{Skills, StaffRoster, Team};
    use crate::tools::{Building, BuildingRegistry, ToolKind, ToolSpec};

    #[derive(Default)]
    struct Journal {
        progress: Vec<(TaskId, f64)>,
        completed: Vec<TaskId>,
    }

    fn journal_handlers() -> TaskHandlers<Journal> {
        let mut handlers = TaskHandlers::new();
        for activity in TaskActivity::ALL {
            handlers.register(activity, RecordingHandler);
        }
        handlers
    }

    struct RecordingHandler;

    impl crate::handlers::TaskHandler<Journal> for RecordingHandler {
        fn on_progress(
            &mut self,
            ctx: &mut Journal,
            event: &TaskEvent<'_>,
        ) -> Result<(), TaskHandlerError> {
            ctx.progress.push((event.task_id, event.progress));
            Ok(())
        }

        fn on_complete(
            &mut self,
            ctx: &mut Journal,
            event: &TaskEvent<'_>,
        ) -> Result<(), TaskHandlerError> {
            ctx.completed.push(event.task_id);
            Ok(())
        }
    }

    struct Fixture {
        scheduler: TaskScheduler,
        roster: StaffRoster,
        buildings: BuildingRegistry,
        handlers: TaskHandlers<Journal>,
        journal: Journal,
        ana: StaffId,
    }

    impl Fixture {
        fn new() -> Self {
            let mut roster = StaffRoster::new();
            let ana = roster.hire("Ana Rossi", 50.0, Skills::uniform(1.0));
            Self {
                scheduler: TaskScheduler::new(),
                roster,
                buildings: BuildingRegistry::new(vec![Building::new("tool_shed", "Tool Shed", 6)]),
                handlers: journal_handlers(),
                journal: Journal::default(),
                ana,
            }
        }

        fn add(&mut self, activity: TaskActivity, work: f64) -> TaskId {
            let spec = TaskSpec::new(activity, work).staff([self.ana]);
            self.scheduler.add_task(spec, &self.roster).unwrap()
        }

        fn tick(&mut self) -> TickReport {
            self.scheduler.process_tick(
                &self.roster,
                &mut self.buildings,
                &mut self.handlers,
                &mut self.journal,
            )
        }

        fn buy(&mut self, tool_type: &str, kind: ToolKind, bonus: f64) -> ToolId {
            let spec = ToolSpec {
                tool_type: tool_type.to_string(),
                kind,
                speed_bonus: bonus,
                category: TaskCategory::Field,
                price: 0.0,
            };
            self.buildings.purchase_tool("tool_shed", &spec).unwrap()
        }

        fn holder(&self, tool: &ToolId) -> Option<TaskId> {
            self.buildings.tool(tool).and_then(|t| t.assigned_task())
        }
    }

    #[test]
    fn completion_task_finishes_after_two_ticks() {
        let mut fx = Fixture::new();
        let id = fx.add(TaskActivity::Crushing, 100.0);

        let first = fx.tick();
        assert_eq!(first.work_applied, 50.0);
        let task = fx.scheduler.task(id).unwrap();
        assert_eq!(task.applied_work(), 50.0);
        assert_eq!(task.progress(), 0.5);
        assert!(fx.journal.completed.is_empty());

        let second = fx.tick();
        assert_eq!(second.completed, vec![id]);
        assert_eq!(fx.journal.completed, vec![id]);
        assert!(fx.scheduler.task(id).is_none());

        fx.tick();
        assert_eq!(fx.journal.completed, vec![id], "completion fires exactly once");
    }

    #[test]
    fn shared_staff_split_workforce_between_tasks() {
        let mut fx = Fixture::new();
        let first = fx.add(TaskActivity::Crushing, 100.0);
        let second = fx.add(TaskActivity::Maintenance, 100.0);

        fx.tick();
        assert_eq!(fx.scheduler.task(first).unwrap().applied_work(), 25.0);
        assert_eq!(fx.scheduler.task(second).unwrap().applied_work(), 25.0);
    }

    #[test]
    fn individual_tool_boosts_applied_work() {
        let mut fx = Fixture::new();
        let id = fx.add(TaskActivity::Planting, 1000.0);
        let bins = fx.buy("Harvest Bins", ToolKind::Individual, 1.2);
        fx.scheduler
            .select_tool(id, &bins, &mut fx.buildings)
            .unwrap();

        let report = fx.tick();
        assert!((report.work_applied - 60.0).abs() < 1e-9);
        assert!((fx.scheduler.task(id).unwrap().applied_work() - 60.0).abs() < 1e-9);
    }

    #[test]
    fn second_task_tool_deselects_first() {
        let mut fx = Fixture::new();
        let id = fx.add(TaskActivity::Planting, 1000.0);
        let old_tractor = fx.buy("Tractor", ToolKind::Task, 1.5);
        let new_tractor = fx.buy("Tractor", ToolKind::Task, 1.8);

        fx.scheduler
            .select_tool(id, &old_tractor, &mut fx.buildings)
            .unwrap();
        let selection = fx
            .scheduler
            .select_tool(id, &new_tractor, &mut fx.buildings)
            .unwrap();

        assert_eq!(selection.released, vec![old_tractor.clone()]);
        assert_eq!(fx.holder(&old_tractor), None);
        assert_eq!(fx.holder(&new_tractor), Some(id));
        let task = fx.scheduler.task(id).unwrap();
        assert_eq!(task.assigned_tools.len(), 1);
        assert_eq!(task.selected_tools(), vec![new_tractor]);
    }

    #[test]
    fn cancel_releases_every_locked_tool() {
        let mut fx = Fixture::new();
        let id = fx.add(TaskActivity::Planting, 1000.0);
        let tractor = fx.buy("Tractor", ToolKind::Task, 1.5);
        let bins = fx.buy("Harvest Bins", ToolKind::Individual, 1.2);
        fx.scheduler.select_tool(id, &tractor, &mut fx.buildings).unwrap();
        fx.scheduler.select_tool(id, &bins, &mut fx.buildings).unwrap();
        fx.tick();

        let cancelled = fx.scheduler.cancel_task(id, &mut fx.buildings).unwrap();
        assert!(cancelled.applied_work() > 0.0);
        assert_eq!(fx.holder(&tractor), None);
        assert_eq!(fx.holder(&bins), None);
        assert!(fx.scheduler.tasks().all(|task| task.id != id));
        assert!(fx.journal.completed.is_empty(), "cancellation fires no callback");
        assert_eq!(
            fx.scheduler.cancel_task(id, &mut fx.buildings),
            Err(SchedulerError::UnknownTask(id))
        );
    }

    #[test]
    fn progressive_task_reports_every_tick_including_last() {
        let mut fx = Fixture::new();
        let id = fx.add(TaskActivity::Harvesting, 120.0);

        fx.tick();
        fx.tick();
        fx.tick();
        let progress: Vec<f64> = fx
            .journal
            .progress
            .iter()
            .filter(|(task, _)| *task == id)
            .map(|(_, p)| *p)
            .collect();
        assert_eq!(progress.len(), 3);
        assert!((progress[0] - 50.0 / 120.0).abs() < 1e-12);
        assert_eq!(progress[2], 1.0);
        assert!(fx.journal.completed.is_empty(), "progressive tasks never complete-callback");
        assert!(fx.scheduler.is_empty());

        fx.tick();
        assert_eq!(fx.journal.progress.len(), 3);
    }

    #[test]
    fn applied_work_never_exceeds_total() {
        let mut fx = Fixture::new();
        let id = fx.add(TaskActivity::Fermentation, 70.0);
        let report = fx.tick();
        assert_eq!(report.work_applied, 50.0);
        let report = fx.tick();
        assert_eq!(report.work_applied, 20.0);
        assert_eq!(report.completed, vec![id]);
    }

    #[test]
    fn zero_work_task_completes_on_first_tick() {
        let mut fx = Fixture::new();
        let spec = TaskSpec::new(TaskActivity::Hiring, 0.0);
        let id = fx.scheduler.add_task(spec, &fx.roster).unwrap();
        let report = fx.tick();
        assert_eq!(report.completed, vec![id]);
        assert_eq!(fx.journal.completed, vec![id]);
    }

    #[test]
    fn unstaffed_task_makes_no_progress() {
        let mut fx = Fixture::new();
        let spec = TaskSpec::new(TaskActivity::Crushing, 10.0).staff(Vec::new());
        let id = fx.scheduler.add_task(spec, &fx.roster).unwrap();
        fx.tick();
        assert_eq!(fx.scheduler.task(id).unwrap().applied_work(), 0.0);
    }

    #[test]
    fn failing_handler_does_not_block_other_tasks() {
        let mut fx = Fixture::new();
        fx.handlers.register(
            TaskActivity::Crushing,
            FnHandler::on_complete(|_: &mut Journal, _| {
                Err(TaskHandlerError::Domain("press jammed".to_string()))
            }),
        );
        let broken = fx.add(TaskActivity::Crushing, 10.0);
        let healthy = fx.add(TaskActivity::Maintenance, 10.0);

        let report = fx.tick();
        assert_eq!(report.handler_failures.len(), 1);
        assert_eq!(report.handler_failures[0].0, broken);
        assert_eq!(fx.journal.completed, vec![healthy]);
        assert!(fx.scheduler.is_empty(), "failed completion is still processed once");
    }

    #[test]
    fn missing_handler_skips_callback_but_keeps_progress() {
        let mut fx = Fixture::new();
        fx.handlers = TaskHandlers::new();
        let id = fx.add(TaskActivity::Upgrade, 100.0);
        let report = fx.tick();
        assert_eq!(report.missing_handlers, 0);
        assert_eq!(fx.scheduler.task(id).unwrap().applied_work(), 50.0);

        let report = fx.tick();
        assert_eq!(report.missing_handlers, 1);
        assert_eq!(report.completed, vec![id]);
        assert!(fx.scheduler.is_empty());
    }

    #[test]
    fn target_busy_tracks_active_tasks() {
        let mut fx = Fixture::new();
        let field = TaskTarget::field("north_slope");
        assert!(!fx.scheduler.is_target_busy(&field));

        let spec = TaskSpec::new(TaskActivity::Harvesting, 500.0).target(field.clone());
        let id = fx.scheduler.add_task(spec, &fx.roster).unwrap();
        assert!(fx.scheduler.is_target_busy(&field));
        assert_eq!(fx.scheduler.target_current_task(&field).map(|t| t.id), Some(id));
        assert!(!fx.scheduler.is_target_busy(&TaskTarget::building("north_slope")));

        fx.scheduler.remove_task(id, &mut fx.buildings).unwrap();
        assert!(!fx.scheduler.is_target_busy(&field));
    }

    #[test]
    fn on_create_hook_runs_before_storing_and_can_veto() {
        let mut fx = Fixture::new();
        let mut money = 100.0;

        let spec = TaskSpec::new(TaskActivity::Maintenance, 10.0).on_create(|_, params| {
            money -= 60.0;
            params.insert("paid", 60.0);
            Ok(())
        });
        let id = fx.scheduler.add_task(spec, &fx.roster).unwrap();
        assert_eq!(money, 40.0);
        assert_eq!(fx.scheduler.task(id).unwrap().params.get_f64("paid"), Some(60.0));

        let rejected = TaskSpec::new(TaskActivity::Maintenance, 10.0).on_create(|_, _| {
            Err(TaskHandlerError::InsufficientFunds {
                needed: 60.0,
                available: 40.0,
            })
        });
        let err = fx.scheduler.add_task(rejected, &fx.roster).unwrap_err();
        assert!(matches!(err, SchedulerError::CreationRejected(_)));
        assert_eq!(fx.scheduler.len(), 1);
    }

    #[test]
    fn default_team_members_join_new_tasks() {
        let mut fx = Fixture::new();
        let bruno = fx.roster.hire("Bruno Costa", 40.0, Skills::uniform(0.5));
        fx.roster.add_team(Team {
            name: "Cellar crew".to_string(),
            members: vec![bruno],
            default_categories: vec![TaskCategory::Winery],
        });

        let crush = fx
            .scheduler
            .add_task(TaskSpec::new(TaskActivity::Crushing, 100.0), &fx.roster)
            .unwrap();
        let plant = fx
            .scheduler
            .add_task(TaskSpec::new(TaskActivity::Planting, 100.0), &fx.roster)
            .unwrap();

        let crush_task = fx.scheduler.task(crush).unwrap();
        assert_eq!(crush_task.assigned_staff.iter().copied().collect::<Vec<_>>(), vec![bruno]);
        assert_eq!(
            crush_task.params.get("assignedStaff"),
            Some(&serde_json::json!([bruno.0]))
        );
        assert!(fx.scheduler.task(plant).unwrap().assigned_staff.is_empty());
    }

    #[test]
    fn assign_staff_releases_and_reacquires_selected_tools() {
        let mut fx = Fixture::new();
        let bruno = fx.roster.hire("Bruno Costa", 40.0, Skills::uniform(0.5));
        let id = fx.add(TaskActivity::Planting, 1000.0);
        let bins_a = fx.buy("Harvest Bins", ToolKind::Individual, 1.2);
        let bins_b = fx.buy("Harvest Bins", ToolKind::Individual, 1.2);

        fx.scheduler
            .assign_staff(id, [fx.ana, bruno], &mut fx.buildings)
            .unwrap();
        fx.scheduler.select_tool(id, &bins_a, &mut fx.buildings).unwrap();
        fx.scheduler.select_tool(id, &bins_b, &mut fx.buildings).unwrap();

        let change = fx
            .scheduler
            .assign_staff(id, [bruno], &mut fx.buildings)
            .unwrap();
        assert_eq!(change.released, vec![bins_a.clone(), bins_b.clone()]);
        assert_eq!(change.reacquired, vec![bins_a.clone()]);
        assert_eq!(change.skipped.len(), 1);
        assert!(matches!(
            change.skipped[0].1,
            ToolLockError::IndividualLimit { staff: 1, .. }
        ));
        assert_eq!(fx.holder(&bins_a), Some(id));
        assert_eq!(fx.holder(&bins_b), None);
    }

    #[test]
    fn tools_locked_elsewhere_are_refused() {
        let mut fx = Fixture::new();
        let first = fx.add(TaskActivity::Planting, 1000.0);
        let second = fx.add(TaskActivity::Maintenance, 1000.0);
        let bins = fx.buy("Harvest Bins", ToolKind::Individual, 1.2);

        fx.scheduler.select_tool(first, &bins, &mut fx.buildings).unwrap();
        assert_eq!(
            fx.scheduler.select_tool(second, &bins, &mut fx.buildings),
            Err(SchedulerError::Tool(ToolLockError::Locked {
                tool: bins.clone(),
                holder: first,
            }))
        );
        assert!(fx.scheduler.deselect_tool(first, &bins, &mut fx.buildings).unwrap());
        assert!(!fx.scheduler.deselect_tool(first, &bins, &mut fx.buildings).unwrap());
        fx.scheduler.select_tool(second, &bins, &mut fx.buildings).unwrap();
        assert_eq!(fx.holder(&bins), Some(second));
    }

    #[test]
    fn completion_releases_tools() {
        let mut fx = Fixture::new();
        let id = fx.add(TaskActivity::Crushing, 40.0);
        let press = fx.buy("Wine Press", ToolKind::Task, 1.1);
        fx.scheduler.select_tool(id, &press, &mut fx.buildings).unwrap();
        fx.tick();
        assert_eq!(fx.holder(&press), None);
        assert_eq!(fx.buildings.locked_tool_count(), 0);
    }

    #[test]
    fn mutations_are_saved_and_observed() {
        let store = MemoryStore::new();
        let (observer, notices) = ChannelObserver::channel();
        let mut fx = Fixture::new();
        fx.scheduler = TaskScheduler::with_store(store.clone());
        fx.scheduler.add_observer(observer);

        let id = fx.add(TaskActivity::Crushing, 100.0);
        assert_eq!(store.stored_tasks().len(), 1);
        fx.tick();
        assert_eq!(store.stored_tasks()[0].applied_work(), 50.0);
        fx.tick();
        assert!(store.stored_tasks().is_empty());
        assert_eq!(store.task_saves(), 3);

        let received: Vec<SchedulerNotice> = notices.try_iter().collect();
        assert_eq!(
            received.first(),
            Some(&SchedulerNotice::TaskAdded {
                task_id: id,
                name: "Crushing".to_string(),
            })
        );
        assert!(received.contains(&SchedulerNotice::TaskRemoved {
            task_id: id,
            completed: true,
        }));
    }

    #[test]
    fn save_failures_leave_memory_state_authoritative() {
        let store = MemoryStore::new();
        store.set_fail_writes(true);
        let mut fx = Fixture::new();
        fx.scheduler = TaskScheduler::with_store(store.clone());

        let id = fx.add(TaskActivity::Crushing, 100.0);
        assert!(fx.scheduler.task(id).is_some());
        assert!(store.stored_tasks().is_empty());
        assert!(fx.scheduler.save().is_err());
    }

    #[test]
    fn load_restores_tasks_and_continues_ids() {
        let store = MemoryStore::new();
        let mut fx = Fixture::new();
        fx.scheduler = TaskScheduler::with_store(store.clone());
        let bins = fx.buy("Harvest Bins", ToolKind::Individual, 1.2);
        let first = fx.add(TaskActivity::Planting, 1000.0);
        fx.scheduler.select_tool(first, &bins, &mut fx.buildings).unwrap();
        fx.tick();

        let mut buildings = BuildingRegistry::new(vec![Building::new("tool_shed", "Tool Shed", 6)]);
        buildings.purchase_tool(
            "tool_shed",
            &ToolSpec {
                tool_type: "Harvest Bins".to_string(),
                kind: ToolKind::Individual,
                speed_bonus: 1.2,
                category: TaskCategory::Field,
                price: 0.0,
            },
        )
        .unwrap();

        let mut restored = TaskScheduler::with_store(store.clone());
        assert_eq!(restored.load().unwrap(), 1);
        assert!(restored.restore_tool_locks(&mut buildings).is_empty());
        assert_eq!(buildings.tool(&bins).unwrap().assigned_task(), Some(first));
        assert!((restored.task(first).unwrap().applied_work() - 60.0).abs() < 1e-9);

        let next = restored
            .add_task(TaskSpec::new(TaskActivity::Hiring, 10.0), &fx.roster)
            .unwrap();
        assert!(next.0 > first.0);
    }

    #[test]
    fn ids_keep_growing_after_every_task_finished() {
        let store = MemoryStore::new();
        let mut fx = Fixture::new();
        fx.scheduler = TaskScheduler::with_store(store.clone());
        let first = fx.add(TaskActivity::Hiring, 0.0);
        fx.tick();
        assert!(store.stored_tasks().is_empty());
        assert_eq!(store.stored_next_id(), first.0 + 1);

        let mut restored = TaskScheduler::with_store(store.clone());
        assert_eq!(restored.load().unwrap(), 0);
        let next = restored
            .add_task(TaskSpec::new(TaskActivity::Hiring, 10.0), &fx.roster)
            .unwrap();
        assert!(next.0 > first.0);
    }

    #[test]
    fn restored_locks_follow_selection_rules() {
        let mut fx = Fixture::new();
        let bins_a = fx.buy("Harvest Bins", ToolKind::Individual, 1.2);
        let bins_b = fx.buy("Harvest Bins", ToolKind::Individual, 1.2);
        let tractor_a = fx.buy("Tractor", ToolKind::Task, 1.5);
        let tractor_b = fx.buy("Tractor", ToolKind::Task, 1.8);
        let id = fx.add(TaskActivity::Planting, 1000.0);

        // A hand-edited save claiming more tools than one worker may use.
        let mut task = fx.scheduler.task(id).unwrap().clone();
        for tool in [&bins_a, &bins_b, &tractor_a, &tractor_b] {
            task.assigned_tools.insert(tool.clone());
            ToolAllocator::assign(&mut fx.buildings, tool, id).unwrap();
        }
        let mut store = MemoryStore::new();
        store
            .save_tasks(&TaskSnapshot {
                next_id: id.0 + 1,
                tasks: vec![task],
            })
            .unwrap();

        let mut restored = TaskScheduler::with_store(store);
        assert_eq!(restored.load().unwrap(), 1);
        let dropped = restored.restore_tool_locks(&mut fx.buildings);
        assert_eq!(
            dropped,
            vec![(id, ToolLockError::IndividualLimit { task: id, staff: 1 })]
        );

        let task = restored.task(id).unwrap();
        let held: Vec<ToolId> = task.assigned_tools.iter().cloned().collect();
        assert_eq!(held, vec![bins_a.clone(), tractor_b.clone()]);
        assert_eq!(task.selected_tools(), held);
        assert_eq!(fx.holder(&bins_a), Some(id));
        assert_eq!(fx.holder(&bins_b), None);
        assert_eq!(fx.holder(&tractor_a), None);
        assert_eq!(fx.holder(&tractor_b), Some(id));
    }

    #[test]
    fn tasks_iterate_in_insertion_order() {
        let mut fx = Fixture::new();
        let ids: Vec<TaskId> = [
            TaskActivity::Upgrade,
            TaskActivity::Crushing,
            TaskActivity::Hiring,
        ]
        .into_iter()
        .map(|activity| fx.add(activity, 500.0))
        .collect();
        let listed: Vec<TaskId> = fx.scheduler.tasks().map(|task| task.id).collect();
        assert_eq!(listed, ids);
        assert_eq!(fx.scheduler.snapshot().len(), 3);
    }
}
