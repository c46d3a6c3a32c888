//! FIFO of pending commands with single-in-flight bookkeeping.

use std::{collections::VecDeque, time::Duration};

use deltashell_core::CommandOutcome;
use tokio::{sync::oneshot, time::Instant};

/// Where a command's outcome is delivered.
pub enum ResultSink {
    /// Outcome is sent to a waiting `PendingResult`.
    Channel(oneshot::Sender<CommandOutcome>),
    /// Outcome is passed to a callback on the session task.
    Callback(Box<dyn FnOnce(CommandOutcome) + Send>),
}

impl ResultSink {
    /// Deliver the outcome. Consumes the sink, so delivery happens once.
    pub fn resolve(self, outcome: CommandOutcome) {
        match self {
            Self::Channel(tx) => {
                // The caller may have stopped waiting.
                let _ = tx.send(outcome);
            }
            Self::Callback(callback) => callback(outcome),
        }
    }
}

impl std::fmt::Debug for ResultSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Channel(_) => f.write_str("ResultSink::Channel"),
            Self::Callback(_) => f.write_str("ResultSink::Callback"),
        }
    }
}

/// A submitted command awaiting its outcome.
#[derive(Debug)]
pub struct PendingCommand {
    /// Sequence number within the session.
    pub seq: u64,
    /// Command text, without the sentinel suffix.
    pub text: String,
    /// Deadline applied once the command is written.
    pub timeout: Option<Duration>,
    sink: ResultSink,
}

impl PendingCommand {
    /// Create a pending command.
    #[must_use]
    pub const fn new(seq: u64, text: String, timeout: Option<Duration>, sink: ResultSink) -> Self {
        Self {
            seq,
            text,
            timeout,
            sink,
        }
    }

    /// Deliver an outcome without going through the queue.
    pub fn resolve(self, outcome: CommandOutcome) {
        self.sink.resolve(outcome);
    }
}

/// Ordered queue where only the head may be in flight.
#[derive(Debug, Default)]
pub struct CommandQueue {
    pending: VecDeque<PendingCommand>,
    in_flight: bool,
    deadline: Option<Instant>,
}

impl CommandQueue {
    /// Create an empty queue.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a command to the tail.
    pub fn push(&mut self, command: PendingCommand) {
        self.pending.push_back(command);
    }

    /// Whether the head has been written and is awaiting its sentinel.
    #[must_use]
    pub const fn is_in_flight(&self) -> bool {
        self.in_flight
    }

    /// The head, if it is waiting to be written.
    #[must_use]
    pub fn next_to_dispatch(&self) -> Option<&PendingCommand> {
        if self.in_flight {
            None
        } else {
            self.pending.front()
        }
    }

    /// Mark the head as written and start its deadline.
    ///
    /// Returns `false` if the queue is empty or already in flight.
    pub fn mark_in_flight(&mut self, now: Instant) -> bool {
        if self.in_flight {
            return false;
        }
        let Some(head) = self.pending.front() else {
            return false;
        };
        self.deadline = head.timeout.map(|timeout| now + timeout);
        self.in_flight = true;
        true
    }

    /// Deadline of the in-flight command, if it has one.
    #[must_use]
    pub const fn deadline(&self) -> Option<Instant> {
        if self.in_flight { self.deadline } else { None }
    }

    /// Resolve and pop the in-flight head.
    ///
    /// Returns the resolved command's sequence number, or `None` if nothing
    /// was in flight.
    pub fn complete_in_flight(&mut self, outcome: CommandOutcome) -> Option<u64> {
        if !self.in_flight {
            return None;
        }
        self.in_flight = false;
        self.deadline = None;
        let head = self.pending.pop_front()?;
        head.sink.resolve(outcome);
        Some(head.seq)
    }

    /// Resolve every remaining command, in order, with an outcome from `f`.
    ///
    /// Returns how many commands were resolved.
    pub fn drain_with(&mut self, mut f: impl FnMut(&PendingCommand) -> CommandOutcome) -> usize {
        self.in_flight = false;
        self.deadline = None;
        let count = self.pending.len();
        for command in self.pending.drain(..) {
            let outcome = f(&command);
            command.sink.resolve(outcome);
        }
        count
    }

    /// Number of queued commands, including the one in flight.
    #[must_use]
    pub fn len(&self) -> usize {
        self.pending.len()
    }

    /// Whether no commands are queued.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}
