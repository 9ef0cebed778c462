//! Display hooks fired after every scheduler mutation.

use crossbeam_channel::{unbounded, Receiver, Sender};
use serde::Serialize;
use tracing::debug;

use crate::task::TaskId;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "notice", rename_all = "snake_case")]
pub enum SchedulerNotice {
    TaskAdded {
        task_id: TaskId,
        name: String,
    },
    TaskRemoved {
        task_id: TaskId,
        completed: bool,
    },
    StaffAssigned {
        task_id: TaskId,
        staff: usize,
    },
    ToolsChanged {
        task_id: TaskId,
        tools: usize,
    },
    TickProcessed {
        processed: usize,
        completed: usize,
        active: usize,
    },
    Loaded {
        tasks: usize,
    },
}

/// Side-effecting observer; not part of scheduling correctness.
pub trait DisplayObserver: Send + Sync {
    fn notify(&self, notice: &SchedulerNotice);
}

/// Forwards every notice into a channel for a UI or network front end.
#[derive(Clone)]
pub struct ChannelObserver {
    sender: Sender<SchedulerNotice>,
}

impl ChannelObserver {
    pub fn new(sender: Sender<SchedulerNotice>) -> Self {
        Self { sender }
    }

    pub fn channel() -> (Self, Receiver<SchedulerNotice>) {
        let (sender, receiver) = unbounded();
        (Self::new(sender), receiver)
    }
}

impl DisplayObserver for ChannelObserver {
    fn notify(&self, notice: &SchedulerNotice) {
        // A dropped receiver only means nobody is watching.
        let _ = self.sender.send(notice.clone());
    }
}

/// Emits notices as structured tracing events.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogObserver;

impl DisplayObserver for LogObserver {
    fn notify(&self, notice: &SchedulerNotice) {
        match serde_json::to_string(notice) {
            Ok(payload) => debug!(target: "winery::display", %payload, "display.refresh"),
            Err(err) => debug!(target: "winery::display", error = %err, "display.refresh"),
        }
    }
}
