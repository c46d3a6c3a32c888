//! Interpreter backed by a spawned child process.

use std::{process::Stdio, time::Duration};

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use command_group::{AsyncCommandGroup, AsyncGroupChild};
use deltashell_core::{Interpreter, InterpreterCommand, ProcessError};
use tokio::{
    io::{AsyncRead, AsyncReadExt, AsyncWriteExt},
    process::{ChildStdin, Command},
    sync::mpsc,
    task::JoinHandle,
};

use crate::shell::resolve_executable_path;

/// Chunks buffered between the pipe readers and the session.
const OUTPUT_CHANNEL_CAPACITY: usize = 64;

/// Options for spawning a `ChildInterpreter`.
#[derive(Debug, Clone, Copy)]
pub struct SpawnOptions {
    /// Read buffer size per pipe.
    pub read_chunk_size: usize,
    /// Wait after closing stdin before killing the process group.
    pub shutdown_grace: Duration,
}

impl Default for SpawnOptions {
    fn default() -> Self {
        Self {
            read_chunk_size: 8 * 1024,
            shutdown_grace: Duration::from_millis(500),
        }
    }
}

/// Long-running interpreter process with stdout and stderr merged.
///
/// The child runs in its own process group so `terminate` also reaches
/// anything it started (e.g. the remote command behind `ssh`).
pub struct ChildInterpreter {
    program: String,
    child: Option<AsyncGroupChild>,
    stdin: Option<ChildStdin>,
    output_rx: mpsc::Receiver<Bytes>,
    readers: Vec<JoinHandle<()>>,
    shutdown_grace: Duration,
}

impl ChildInterpreter {
    /// Spawn the interpreter and write its preamble.
    ///
    /// # Errors
    /// Returns error if the executable cannot be found or launched, or the
    /// preamble cannot be written.
    pub async fn spawn(
        command: &InterpreterCommand,
        options: SpawnOptions,
    ) -> Result<Self, ProcessError> {
        let executable = resolve_executable_path(&command.program)
            .await
            .ok_or_else(|| ProcessError::ExecutableNotFound(command.program.clone()))?;

        let mut cmd = Command::new(&executable);
        cmd.args(&command.args)
            .envs(&command.env)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        if let Some(dir) = &command.working_dir {
            cmd.current_dir(dir);
        }

        let mut child = cmd
            .group_spawn()
            .map_err(|e| ProcessError::Spawn(format!("{}: {e}", executable.display())))?;

        let inner = child.inner();
        let stdin = inner.stdin.take();
        let stdout = inner.stdout.take();
        let stderr = inner.stderr.take();

        let (tx, output_rx) = mpsc::channel(OUTPUT_CHANNEL_CAPACITY);
        let mut readers = Vec::with_capacity(2);
        if let Some(stdout) = stdout {
            readers.push(spawn_reader("stdout", stdout, tx.clone(), options.read_chunk_size));
        }
        if let Some(stderr) = stderr {
            readers.push(spawn_reader("stderr", stderr, tx.clone(), options.read_chunk_size));
        }
        drop(tx);

        tracing::info!(
            program = %command.display(),
            pid = ?child.id(),
            "Spawned interpreter"
        );

        let mut interpreter = Self {
            program: command.program.clone(),
            child: Some(child),
            stdin,
            output_rx,
            readers,
            shutdown_grace: options.shutdown_grace,
        };

        for line in &command.preamble {
            let mut bytes = line.clone().into_bytes();
            bytes.push(b'\n');
            if let Err(e) = interpreter.write(&bytes).await {
                interpreter.terminate().await;
                return Err(e);
            }
        }

        Ok(interpreter)
    }

    /// OS process id, while the child is alive.
    #[must_use]
    pub fn id(&self) -> Option<u32> {
        self.child.as_ref().and_then(AsyncGroupChild::id)
    }
}

#[async_trait]
impl Interpreter for ChildInterpreter {
    async fn write(&mut self, bytes: &[u8]) -> Result<(), ProcessError> {
        let stdin = self.stdin.as_mut().ok_or(ProcessError::InputClosed)?;
        stdin.write_all(bytes).await.map_err(ProcessError::Write)?;
        stdin.flush().await.map_err(ProcessError::Write)
    }

    async fn read_chunk(&mut self) -> Option<Bytes> {
        self.output_rx.recv().await
    }

    async fn terminate(&mut self) {
        // Dropping stdin signals end-of-input to the interpreter.
        drop(self.stdin.take());

        let Some(mut child) = self.child.take() else {
            return;
        };

        match tokio::time::timeout(self.shutdown_grace, child.wait()).await {
            Ok(Ok(status)) => {
                tracing::debug!(program = %self.program, %status, "Interpreter exited");
            }
            Ok(Err(err)) => {
                tracing::warn!(program = %self.program, ?err, "Failed to wait for interpreter");
            }
            Err(_) => {
                tracing::debug!(program = %self.program, "Interpreter still running, killing");
                if let Err(err) = child.start_kill() {
                    tracing::warn!(program = %self.program, ?err, "Failed to kill interpreter");
                }
                let _ = child.wait().await;
            }
        }

        self.output_rx.close();
        for reader in self.readers.drain(..) {
            reader.abort();
        }
    }
}

impl std::fmt::Debug for ChildInterpreter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChildInterpreter")
            .field("program", &self.program)
            .field("pid", &self.id())
            .finish_non_exhaustive()
    }
}

impl Drop for ChildInterpreter {
    fn drop(&mut self) {
        if let Some(child) = self.child.as_mut() {
            let _ = child.start_kill();
        }
    }
}

fn spawn_reader<R>(
    stream: &'static str,
    mut reader: R,
    tx: mpsc::Sender<Bytes>,
    chunk_size: usize,
) -> JoinHandle<()>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut buf = BytesMut::with_capacity(chunk_size);
        loop {
            buf.reserve(chunk_size);
            match reader.read_buf(&mut buf).await {
                Ok(0) => break, // EOF
                Ok(n) => {
                    tracing::trace!(stream, bytes = n, "Interpreter output");
                    if tx.send(buf.split().freeze()).await.is_err() {
                        break;
                    }
                }
                Err(e) => {
                    tracing::error!(stream, "Error reading interpreter output: {e}");
                    break;
                }
            }
        }
    })
}
