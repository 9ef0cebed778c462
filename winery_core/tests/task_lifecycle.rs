use std::time::{SystemTime, UNIX_EPOCH};

use winery_core::{
    Building, BuildingRegistry, ChannelObserver, FileStore, SaveFormat, SchedulerNotice, Skills,
    StaffId, StaffRoster, TaskEvent, TaskHandler, TaskHandlerError, TaskHandlers, TaskId,
    TaskScheduler, TaskSpec, TaskTarget, TaskStore, ToolId, ToolKind, ToolSpec,
};
use winery_runtime::{TaskActivity, TaskCategory, TaskKind};

#[derive(Default)]
struct Ledger {
    progress: Vec<(u64, f64)>,
    finished: Vec<String>,
}

struct LedgerHandler;

impl TaskHandler<Ledger> for LedgerHandler {
    fn on_progress(&mut self, ledger: &mut Ledger, event: &TaskEvent<'_>) -> Result<(), TaskHandlerError> {
        ledger.progress.push((event.task_id.0, event.progress_delta()));
        Ok(())
    }

    fn on_complete(&mut self, ledger: &mut Ledger, event: &TaskEvent<'_>) -> Result<(), TaskHandlerError> {
        ledger.finished.push(event.name.to_string());
        Ok(())
    }
}

fn crew() -> StaffRoster {
    let mut roster = StaffRoster::new();
    roster.hire("Ana Rossi", 50.0, Skills::uniform(1.0));
    roster.hire("Bruno Costa", 30.0, Skills::uniform(1.0));
    roster
}

fn shed() -> BuildingRegistry {
    let mut registry = BuildingRegistry::new(vec![Building::new("tool_shed", "Tool Shed", 4)]);
    registry
        .purchase_tool(
            "tool_shed",
            &ToolSpec {
                tool_type: "Tractor".to_string(),
                kind: ToolKind::Task,
                speed_bonus: 1.5,
                category: TaskCategory::Field,
                price: 0.0,
            },
        )
        .expect("shed has room");
    registry
}

fn handlers() -> TaskHandlers<Ledger> {
    TaskHandlers::new()
        .with(TaskActivity::Harvesting, LedgerHandler)
        .with(TaskActivity::Maintenance, LedgerHandler)
}

#[test]
fn progressive_and_completion_tasks_run_to_the_end() {
    let roster = crew();
    let mut tools = shed();
    let mut handlers = handlers();
    let mut ledger = Ledger::default();
    let mut scheduler = TaskScheduler::new();
    let (observer, notices) = ChannelObserver::channel();
    scheduler.add_observer(observer);

    let harvest = scheduler
        .add_task(
            TaskSpec::new(TaskActivity::Harvesting, 160.0)
                .target(TaskTarget::field("north_slope"))
                .staff([StaffId(0), StaffId(1)]),
            &roster,
        )
        .expect("created");
    let repair = scheduler
        .add_task(
            TaskSpec::new(TaskActivity::Maintenance, 40.0)
                .name("Fix the press")
                .target(TaskTarget::building("tool_shed"))
                .staff([StaffId(1)]),
            &roster,
        )
        .expect("created");
    assert_eq!(scheduler.task(harvest).map(|t| t.kind), Some(TaskKind::Progressive));
    assert_eq!(scheduler.task(repair).map(|t| t.kind), Some(TaskKind::Completion));

    scheduler
        .select_tool(harvest, &ToolId::new("Tractor", 1), &mut tools)
        .expect("tractor is free");

    let mut ticks = 0;
    while !scheduler.is_empty() {
        scheduler.process_tick(&roster, &mut tools, &mut handlers, &mut ledger);
        ticks += 1;
        assert!(ticks < 20, "tasks never finished");
    }

    let harvested: f64 = ledger
        .progress
        .iter()
        .filter(|(id, _)| *id == harvest.0)
        .map(|(_, delta)| delta)
        .sum();
    assert!((harvested - 1.0).abs() < 1e-9);
    assert_eq!(ledger.finished, vec!["Fix the press".to_string()]);
    assert_eq!(tools.locked_tool_count(), 0);

    let removed: Vec<TaskId> = notices
        .try_iter()
        .filter_map(|notice| match notice {
            SchedulerNotice::TaskRemoved { task_id, completed: true } => Some(task_id),
            _ => None,
        })
        .collect();
    assert_eq!(removed.len(), 2);
}

#[test]
fn bincode_store_round_trips_active_tasks() {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos())
        .unwrap_or(0);
    let dir = std::env::temp_dir().join(format!("winery-lifecycle-{}-{nanos}", std::process::id()));
    let roster = crew();
    let mut tools = shed();
    let mut handlers = handlers();
    let mut ledger = Ledger::default();

    let mut scheduler = TaskScheduler::with_store(FileStore::new(&dir, SaveFormat::Bincode));
    let id = scheduler
        .add_task(
            TaskSpec::new(TaskActivity::Harvesting, 500.0)
                .target(TaskTarget::field("north_slope"))
                .param("yieldKg", 1200.0)
                .staff([StaffId(0)]),
            &roster,
        )
        .expect("created");
    scheduler
        .select_tool(id, &ToolId::new("Tractor", 1), &mut tools)
        .expect("tractor is free");
    scheduler.process_tick(&roster, &mut tools, &mut handlers, &mut ledger);
    let before = scheduler.snapshot();

    let store = FileStore::new(&dir, SaveFormat::Bincode);
    let stored = store.load_tasks().expect("readable");
    assert_eq!(stored.tasks, before);
    assert_eq!(stored.next_id, id.0 + 1);

    let mut restored = TaskScheduler::with_store(store);
    assert_eq!(restored.load().expect("loads"), 1);
    assert_eq!(restored.snapshot(), before);
    let task = restored.task(id).expect("restored");
    assert_eq!(task.params.get_f64("yieldKg"), Some(1200.0));

    let next = restored
        .add_task(TaskSpec::new(TaskActivity::Maintenance, 10.0), &roster)
        .expect("created");
    assert_eq!(next, TaskId(id.0 + 1));

    let _ = std::fs::remove_dir_all(&dir);
}
