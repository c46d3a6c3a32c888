//! In-memory interpreter driven by the test.

#![allow(dead_code)]

use std::{
    sync::{
        Arc,
        atomic::{AtomicBool, AtomicUsize, Ordering},
    },
    time::Duration,
};

use async_trait::async_trait;
use bytes::Bytes;
use deltashell_core::{Interpreter, ProcessError};
use tokio::sync::mpsc;

pub const SENTINEL: &str = "__DONE__";

/// Interpreter half, handed to the session.
pub struct ScriptedInterpreter {
    writes: mpsc::UnboundedSender<String>,
    output: mpsc::UnboundedReceiver<Bytes>,
    terminations: Arc<AtomicUsize>,
    fail_writes: Arc<AtomicBool>,
}

/// Test half: observes writes and feeds output.
pub struct Controller {
    writes: mpsc::UnboundedReceiver<String>,
    output: Option<mpsc::UnboundedSender<Bytes>>,
    terminations: Arc<AtomicUsize>,
    fail_writes: Arc<AtomicBool>,
}

pub fn scripted() -> (ScriptedInterpreter, Controller) {
    let (writes_tx, writes_rx) = mpsc::unbounded_channel();
    let (output_tx, output_rx) = mpsc::unbounded_channel();
    let terminations = Arc::new(AtomicUsize::new(0));
    let fail_writes = Arc::new(AtomicBool::new(false));

    let interpreter = ScriptedInterpreter {
        writes: writes_tx,
        output: output_rx,
        terminations: Arc::clone(&terminations),
        fail_writes: Arc::clone(&fail_writes),
    };
    let controller = Controller {
        writes: writes_rx,
        output: Some(output_tx),
        terminations,
        fail_writes,
    };
    (interpreter, controller)
}

#[async_trait]
impl Interpreter for ScriptedInterpreter {
    async fn write(&mut self, bytes: &[u8]) -> Result<(), ProcessError> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(ProcessError::Write(std::io::Error::new(
                std::io::ErrorKind::BrokenPipe,
                "broken pipe",
            )));
        }
        let text = String::from_utf8_lossy(bytes).into_owned();
        self.writes.send(text).map_err(|_| ProcessError::InputClosed)
    }

    async fn read_chunk(&mut self) -> Option<Bytes> {
        self.output.recv().await
    }

    async fn terminate(&mut self) {
        self.terminations.fetch_add(1, Ordering::SeqCst);
        self.output.close();
    }
}

impl Controller {
    /// Feed one output chunk.
    pub fn emit(&self, chunk: &str) {
        self.emit_bytes(chunk.as_bytes());
    }

    pub fn emit_bytes(&self, chunk: &[u8]) {
        if let Some(output) = &self.output {
            let _ = output.send(Bytes::copy_from_slice(chunk));
        }
    }

    /// Simulate the interpreter exiting.
    pub fn end_output(&mut self) {
        self.output = None;
    }

    /// Make every following write fail.
    pub fn fail_writes(&self) {
        self.fail_writes.store(true, Ordering::SeqCst);
    }

    /// Wait for the next line the session writes.
    pub async fn next_write(&mut self) -> String {
        tokio::time::timeout(Duration::from_secs(5), self.writes.recv())
            .await
            .expect("timed out waiting for a write")
            .expect("interpreter dropped")
    }

    /// Next write if one is already waiting.
    pub fn try_next_write(&mut self) -> Option<String> {
        self.writes.try_recv().ok()
    }

    /// Next write, or `None` once the session has dropped the interpreter.
    pub async fn recv_write(&mut self) -> Option<String> {
        self.writes.recv().await
    }

    pub fn terminations(&self) -> usize {
        self.terminations.load(Ordering::SeqCst)
    }
}

/// Command text from a wire line such as `"a; echo __DONE__\n"`.
pub fn command_of(line: &str) -> &str {
    line.strip_suffix(&format!("; echo {SENTINEL}\n"))
        .expect("line is not framed")
}

/// Answer every command with `out:<command>` followed by the sentinel,
/// split into small chunks. Panics if a second command is written before the
/// first is answered.
pub fn spawn_echo_responder(mut controller: Controller) -> tokio::task::JoinHandle<usize> {
    tokio::spawn(async move {
        let mut answered = 0;
        while let Some(line) = controller.recv_write().await {
            assert!(
                controller.try_next_write().is_none(),
                "second command written while {line:?} was in flight"
            );
            let reply = format!("out:{}\n{SENTINEL}\n", command_of(&line));
            for chunk in reply.as_bytes().chunks(3) {
                controller.emit_bytes(chunk);
                tokio::task::yield_now().await;
            }
            answered += 1;
        }
        answered
    })
}
