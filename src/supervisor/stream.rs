//! Per-lane bookkeeping: generation counter, phase and the single active task.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::ffmpeg::CancelHandle;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WorkStream {
    Preview,
    Export,
}

impl WorkStream {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Preview => "preview",
            Self::Export => "export",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum StreamPhase {
    Idle,
    /// A request is waiting out the debounce window.
    Debouncing,
    Running,
}

/// Terminal state of the most recent task on a lane.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum OutcomeKind {
    Completed,
    Failed,
    Cancelled,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamSnapshot {
    pub phase: StreamPhase,
    pub generation: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_outcome: Option<OutcomeKind>,
}

#[derive(Debug)]
pub(crate) struct ActiveTask {
    pub generation: u64,
    pub cancel: CancelHandle,
    /// Where the tool writes. Previews keep it; exports move it to `destination`.
    pub output: PathBuf,
    pub destination: Option<PathBuf>,
    pub label: Option<String>,
    /// The tool finished and the output is being moved to `destination`.
    pub committing: bool,
}

#[derive(Debug)]
pub(crate) struct Lane {
    stream: WorkStream,
    generation: u64,
    phase: StreamPhase,
    active: Option<ActiveTask>,
    last_outcome: Option<OutcomeKind>,
}

impl Lane {
    pub fn new(stream: WorkStream) -> Self {
        Self {
            stream,
            generation: 0,
            phase: StreamPhase::Idle,
            active: None,
            last_outcome: None,
        }
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Start a new generation. Everything older is stale from here on.
    pub fn advance(&mut self) -> u64 {
        self.generation += 1;
        self.generation
    }

    pub fn is_busy(&self) -> bool {
        self.active.is_some()
    }

    pub fn active(&self, generation: u64) -> Option<&ActiveTask> {
        self.active.as_ref().filter(|t| t.generation == generation)
    }

    pub fn debounce(&mut self) {
        self.phase = StreamPhase::Debouncing;
    }

    pub fn start(&mut self, task: ActiveTask) {
        debug_assert_eq!(task.generation, self.generation);
        self.active = Some(task);
        self.phase = StreamPhase::Running;
    }

    /// Remove the active task if it belongs to `generation`.
    pub fn take_active(&mut self, generation: u64) -> Option<ActiveTask> {
        if self.active.as_ref()?.generation != generation {
            return None;
        }
        self.active.take()
    }

    /// Mark a finished task as committing and hand back its destination.
    /// None for stale generations and for tasks without a destination.
    pub fn begin_commit(&mut self, generation: u64) -> Option<PathBuf> {
        let task = self.active.as_mut().filter(|t| t.generation == generation)?;
        let destination = task.destination.clone()?;
        task.committing = true;
        Some(destination)
    }

    /// Cancel and forget the active task. Its completion will find no owner.
    /// A committing task is past the point of cancelling and stays.
    pub fn interrupt(&mut self) -> Option<ActiveTask> {
        if let Some(task) = self.active.as_ref().filter(|t| t.committing) {
            log::debug!(
                target: "mediapress::supervisor",
                "{} generation {} is committing; cancel ignored",
                self.stream.as_str(),
                task.generation
            );
            return None;
        }
        let task = self.active.take()?;
        task.cancel.cancel();
        log::debug!(
            target: "mediapress::supervisor",
            "{} generation {} interrupted",
            self.stream.as_str(),
            task.generation
        );
        self.phase = StreamPhase::Idle;
        Some(task)
    }

    pub fn finish(&mut self, outcome: OutcomeKind) {
        self.phase = StreamPhase::Idle;
        self.last_outcome = Some(outcome);
    }

    pub fn snapshot(&self) -> StreamSnapshot {
        StreamSnapshot {
            phase: self.phase,
            generation: self.generation,
            last_outcome: self.last_outcome,
        }
    }
}
