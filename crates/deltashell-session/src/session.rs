//! Persistent interpreter session.
//!
//! A `Session` is a cheap, cloneable handle. All state (the interpreter, the
//! output framer and the command queue) lives in one actor task; handles
//! talk to it through a mailbox, so no lock guards the queue and at most one
//! command is ever written ahead of its sentinel.

use std::{
    future::Future,
    pin::Pin,
    sync::{
        Arc,
        atomic::{AtomicBool, AtomicU64, Ordering},
    },
    task::{Context, Poll},
    time::Duration,
};

use deltashell_core::{
    CommandOutcome, ConfigError, Interpreter, InterpreterCommand, SessionConfig, SessionError, SessionId,
    SessionStatus,
};
use deltashell_process::{ChildInterpreter, SpawnOptions};
use tokio::{
    sync::{mpsc, oneshot, watch},
    time::{Instant, sleep_until},
};
use tracing::Instrument;
use uuid::Uuid;

use crate::{
    framer::OutputFramer,
    queue::{CommandQueue, PendingCommand, ResultSink},
};

/// Build the line written for one command.
///
/// The interpreter runs the command, then echoes the sentinel; that echo is
/// what terminates the command's frame. Trailing `;` is dropped and a
/// trailing background `&` is used as the separator itself, since `;;` and
/// `&;` are syntax errors that end a non-interactive shell.
#[must_use]
pub fn wire_line(text: &str, sentinel: &str) -> String {
    let text = text.trim_end_matches(|c: char| c.is_whitespace() || c == ';');
    if text.trim().is_empty() {
        format!("echo {sentinel}\n")
    } else if text.ends_with('&') && !text.ends_with("&&") {
        format!("{text} echo {sentinel}\n")
    } else {
        format!("{text}; echo {sentinel}\n")
    }
}

enum SessionMsg {
    Submit(PendingCommand),
    Close(oneshot::Sender<()>),
}

/// Future resolving to a submitted command's outcome.
///
/// Resolves to `CommandOutcome::Cancelled` if the session goes away without
/// answering.
#[derive(Debug)]
#[must_use = "the outcome is only observable by awaiting the result"]
pub struct PendingResult {
    rx: oneshot::Receiver<CommandOutcome>,
}

impl Future for PendingResult {
    type Output = CommandOutcome;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.rx)
            .poll(cx)
            .map(|res| res.unwrap_or(CommandOutcome::Cancelled))
    }
}

/// Handle to a persistent interpreter session.
#[derive(Clone)]
pub struct Session {
    id: SessionId,
    mailbox: mpsc::UnboundedSender<SessionMsg>,
    status: watch::Receiver<SessionStatus>,
    closing: Arc<AtomicBool>,
    next_seq: Arc<AtomicU64>,
    default_timeout: Option<Duration>,
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("status", &self.status())
            .finish_non_exhaustive()
    }
}

impl Session {
    /// Spawn an interpreter process and start a session on it.
    ///
    /// # Errors
    /// Returns `SessionError::Config` for invalid settings and
    /// `SessionError::ProcessSpawn` if the interpreter cannot be started.
    pub async fn start(
        command: &InterpreterCommand,
        config: SessionConfig,
    ) -> Result<Self, SessionError> {
        config.validate()?;
        let options = SpawnOptions {
            read_chunk_size: config.read_chunk_size,
            shutdown_grace: config.shutdown_grace,
        };
        let interpreter = ChildInterpreter::spawn(command, options).await?;
        let session = Self::spawn(interpreter, config)?;

        // Swallow whatever the interpreter prints on startup (login banners,
        // motd) so it does not end up in the first command's output.
        session.submit_with("", |outcome| match outcome.output() {
            Some("") => {}
            Some(banner) => tracing::debug!(banner, "Discarded startup output"),
            None => tracing::warn!(?outcome, "Interpreter failed to start"),
        })?;
        Ok(session)
    }

    /// Start a session on an already running interpreter.
    ///
    /// Must be called from within a Tokio runtime.
    ///
    /// # Errors
    /// Returns `SessionError::Config` for invalid settings.
    pub fn spawn<I: Interpreter>(interpreter: I, config: SessionConfig) -> Result<Self, SessionError> {
        config.validate()?;
        let framer = OutputFramer::new(&config.sentinel, config.max_buffer_bytes)
            .map_err(|err| ConfigError::Invalid(err.to_string()))?;

        let id = Uuid::new_v4();
        let (mailbox, rx) = mpsc::unbounded_channel();
        let (status_tx, status) = watch::channel(SessionStatus::Idle);

        let actor = SessionActor {
            interpreter,
            framer,
            queue: CommandQueue::new(),
            mailbox: rx,
            status: status_tx,
            sentinel: config.sentinel.clone(),
        };
        tokio::spawn(actor.run().instrument(tracing::info_span!("session", %id)));

        Ok(Self {
            id,
            mailbox,
            status,
            closing: Arc::new(AtomicBool::new(false)),
            next_seq: Arc::new(AtomicU64::new(1)),
            default_timeout: config.command_timeout,
        })
    }

    /// Session identifier.
    #[must_use]
    pub const fn id(&self) -> SessionId {
        self.id
    }

    /// Current state.
    #[must_use]
    pub fn status(&self) -> SessionStatus {
        *self.status.borrow()
    }

    /// Submit a command using the session's default timeout.
    ///
    /// Returns immediately; the outcome arrives through the returned future.
    ///
    /// # Errors
    /// Returns `SessionError::Closed` once shutdown has been requested.
    pub fn submit(&self, text: impl Into<String>) -> Result<PendingResult, SessionError> {
        self.submit_with_timeout(text, self.default_timeout)
    }

    /// Submit a command with an explicit timeout (`None` waits forever).
    ///
    /// # Errors
    /// Returns `SessionError::Closed` once shutdown has been requested.
    pub fn submit_with_timeout(
        &self,
        text: impl Into<String>,
        timeout: Option<Duration>,
    ) -> Result<PendingResult, SessionError> {
        let (tx, rx) = oneshot::channel();
        self.enqueue(text.into(), timeout, ResultSink::Channel(tx))?;
        Ok(PendingResult { rx })
    }

    /// Submit a command and receive its outcome through a callback.
    ///
    /// The callback runs on the session task, exactly once.
    ///
    /// # Errors
    /// Returns `SessionError::Closed` once shutdown has been requested; the
    /// callback is not invoked in that case.
    pub fn submit_with<F>(&self, text: impl Into<String>, on_result: F) -> Result<(), SessionError>
    where
        F: FnOnce(CommandOutcome) + Send + 'static,
    {
        self.enqueue(
            text.into(),
            self.default_timeout,
            ResultSink::Callback(Box::new(on_result)),
        )
    }

    fn enqueue(
        &self,
        text: String,
        timeout: Option<Duration>,
        sink: ResultSink,
    ) -> Result<(), SessionError> {
        if self.closing.load(Ordering::Acquire) || self.status().is_closed() {
            return Err(SessionError::Closed);
        }
        let seq = self.next_seq.fetch_add(1, Ordering::Relaxed);
        self.mailbox
            .send(SessionMsg::Submit(PendingCommand::new(seq, text, timeout, sink)))
            .map_err(|_| SessionError::Closed)
    }

    /// Shut the session down.
    ///
    /// Stops reading, closes the interpreter's input, terminates it and
    /// resolves every unfinished command with `CommandOutcome::Cancelled`.
    /// Safe to call repeatedly and from several handles.
    pub async fn close(&self) {
        self.closing.store(true, Ordering::Release);
        let (ack_tx, ack_rx) = oneshot::channel();
        if self.mailbox.send(SessionMsg::Close(ack_tx)).is_ok() {
            let _ = ack_rx.await;
        }
        self.closed().await;
    }

    /// Wait until the session reaches `SessionStatus::Closed`.
    pub async fn closed(&self) {
        let mut status = self.status.clone();
        let _ = status.wait_for(|s| s.is_closed()).await;
    }
}

/// Why the event loop stopped.
enum Shutdown {
    Requested(Option<oneshot::Sender<()>>),
    StreamClosed,
    TimedOut,
    Overflow,
}

struct SessionActor<I> {
    interpreter: I,
    framer: OutputFramer,
    queue: CommandQueue,
    mailbox: mpsc::UnboundedReceiver<SessionMsg>,
    status: watch::Sender<SessionStatus>,
    sentinel: String,
}

impl<I: Interpreter> SessionActor<I> {
    async fn run(mut self) {
        tracing::info!("Session started");
        let reason = self.event_loop().await;
        self.shutdown(reason).await;
    }

    async fn event_loop(&mut self) -> Shutdown {
        loop {
            let deadline = self.queue.deadline();
            tokio::select! {
                msg = self.mailbox.recv() => match msg {
                    Some(SessionMsg::Submit(command)) => {
                        tracing::debug!(seq = command.seq, "Command queued");
                        self.queue.push(command);
                        self.dispatch().await;
                    }
                    Some(SessionMsg::Close(ack)) => return Shutdown::Requested(Some(ack)),
                    // Every handle was dropped.
                    None => return Shutdown::Requested(None),
                },
                chunk = self.interpreter.read_chunk() => match chunk {
                    Some(bytes) => {
                        if let Err(reason) = self.on_output(&bytes).await {
                            return reason;
                        }
                    }
                    None => return Shutdown::StreamClosed,
                },
                () = sleep_until(deadline.unwrap_or_else(Instant::now)), if deadline.is_some() => {
                    return Shutdown::TimedOut;
                }
            }
        }
    }

    /// Write the queue head if nothing is in flight.
    ///
    /// A head whose write fails is resolved with `WriteFailed` and the next
    /// one is tried, so the queue never stalls behind a failed write.
    async fn dispatch(&mut self) {
        while let Some(head) = self.queue.next_to_dispatch() {
            let seq = head.seq;
            let line = wire_line(&head.text, &self.sentinel);

            self.queue.mark_in_flight(Instant::now());
            self.status.send_replace(SessionStatus::Busy);

            match self.interpreter.write(line.as_bytes()).await {
                Ok(()) => {
                    tracing::debug!(seq, bytes = line.len(), "Command written");
                    return;
                }
                Err(err) => {
                    tracing::warn!(seq, %err, "Failed to write command");
                    self.queue
                        .complete_in_flight(CommandOutcome::WriteFailed(err.to_string()));
                    self.status.send_replace(SessionStatus::Idle);
                }
            }
        }
    }

    async fn on_output(&mut self, bytes: &[u8]) -> Result<(), Shutdown> {
        tracing::trace!(bytes = bytes.len(), "Output chunk");

        let frames = self.framer.push(bytes).map_err(|err| {
            tracing::warn!(%err, "Discarding session");
            Shutdown::Overflow
        })?;

        // Frames beyond the first cannot belong to a written command, since
        // the next command is only written after this loop.
        for frame in frames {
            if self.queue.is_in_flight() {
                let bytes = frame.len();
                if let Some(seq) = self.queue.complete_in_flight(CommandOutcome::Completed(frame)) {
                    tracing::debug!(seq, bytes, "Command completed");
                }
                self.status.send_replace(SessionStatus::Idle);
            } else {
                tracing::warn!(%frame, "Discarding frame with no command in flight");
            }
        }

        self.dispatch().await;
        Ok(())
    }

    async fn shutdown(mut self, reason: Shutdown) {
        self.status.send_replace(SessionStatus::Closed);

        let (in_flight, queued, ack) = match reason {
            Shutdown::Requested(ack) => (CommandOutcome::Cancelled, CommandOutcome::Cancelled, ack),
            Shutdown::StreamClosed => {
                tracing::warn!("Interpreter output closed");
                (CommandOutcome::ProcessExited, CommandOutcome::ProcessExited, None)
            }
            Shutdown::TimedOut => {
                tracing::warn!("Command timed out, closing session");
                (CommandOutcome::TimedOut, CommandOutcome::Cancelled, None)
            }
            Shutdown::Overflow => (CommandOutcome::OutputOverflow, CommandOutcome::Cancelled, None),
        };

        if self.queue.is_in_flight() {
            self.queue.complete_in_flight(in_flight);
        }
        let unresolved = self.queue.drain_with(|_| queued.clone());

        self.interpreter.terminate().await;
        self.framer.clear();

        // Submissions that raced with shutdown.
        self.mailbox.close();
        while let Ok(msg) = self.mailbox.try_recv() {
            match msg {
                SessionMsg::Submit(command) => command.resolve(CommandOutcome::Cancelled),
                SessionMsg::Close(ack) => {
                    let _ = ack.send(());
                }
            }
        }

        tracing::info!(unresolved, "Session closed");
        if let Some(ack) = ack {
            let _ = ack.send(());
        }
    }
}
