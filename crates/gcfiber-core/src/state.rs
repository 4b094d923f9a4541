//! Task state

use core::fmt;

/// State of a task
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum TaskState {
    /// Ready to run, sitting in some worker's run-queue
    Runnable = 0,

    /// Currently executing on a worker
    Running = 1,

    /// Parked at a suspend point, waiting for an explicit resume
    Suspended = 2,

    /// Finished (or cancelled); entry and stack have been released
    Done = 3,
}

impl TaskState {
    /// Check if this state allows the task to be picked by a worker
    #[inline]
    pub const fn is_runnable(&self) -> bool {
        matches!(self, TaskState::Runnable)
    }

    /// Check if this task has terminated
    #[inline]
    pub const fn is_done(&self) -> bool {
        matches!(self, TaskState::Done)
    }
}

impl From<u8> for TaskState {
    fn from(v: u8) -> Self {
        match v {
            0 => TaskState::Runnable,
            1 => TaskState::Running,
            2 => TaskState::Suspended,
            _ => TaskState::Done,
        }
    }
}

impl From<TaskState> for u8 {
    fn from(state: TaskState) -> u8 {
        state as u8
    }
}

impl fmt::Display for TaskState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TaskState::Runnable => write!(f, "RUNNABLE"),
            TaskState::Running => write!(f, "RUNNING"),
            TaskState::Suspended => write!(f, "SUSPENDED"),
            TaskState::Done => write!(f, "DONE"),
        }
    }
}
