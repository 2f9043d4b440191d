//! Terminal Gateway — one instance per session: process lifecycle, output
//! parsing, readiness probe, scrollback ring, idle/stall classification.
//! Uses a plain piped child process rather than a real pseudo-terminal
//! allocation (`resize` is therefore tracked but not wired to a TTY ioctl),
//! and drains output on a dedicated reader task to avoid pipe deadlock.

use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use agenterm_core::config::TimeoutsConfig;
use agenterm_types::SessionStatus;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::process::{Child, Command as ProcessCommand};
use tokio::sync::{mpsc, RwLock};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::ansi::{classify, strip_ansi, MessageClass};
use crate::scrollback::{ScrollbackLine, ScrollbackRing};

#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    #[error("session {0} not found")]
    NotFound(Uuid),
    #[error("spawn failed: {0}")]
    Spawn(#[from] std::io::Error),
    #[error("readiness timeout for session {0}")]
    ReadinessTimeout(Uuid),
}

pub type Result<T> = std::result::Result<T, GatewayError>;

struct GatewayState {
    status: SessionStatus,
    scrollback: ScrollbackRing,
    last_output_at: Instant,
    first_output_at: Option<Instant>,
    last_flushed_class: Option<MessageClass>,
}

struct GatewayHandle {
    stdin_tx: mpsc::UnboundedSender<Vec<u8>>,
    state: RwLock<GatewayState>,
    child: tokio::sync::Mutex<Child>,
    cancel: CancellationToken,
    exited: AtomicBool,
}

pub struct GatewaySnapshot {
    pub status: SessionStatus,
    pub lines: Vec<ScrollbackLine>,
}

/// A flushed, classified chunk of session output, handed to whoever drives
/// the gateway (the session manager) so it can be published as a
/// `session_output` event.
pub struct OutputChunk {
    pub session_id: Uuid,
    pub seq: u64,
    pub text: String,
    pub is_stderr: bool,
}

pub struct TerminalGateway {
    sessions: RwLock<HashMap<Uuid, Arc<GatewayHandle>>>,
    timeouts: TimeoutsConfig,
    scrollback_lines: usize,
    output_tx: mpsc::UnboundedSender<OutputChunk>,
}

impl TerminalGateway {
    pub fn new(
        timeouts: TimeoutsConfig,
        scrollback_lines: usize,
        output_tx: mpsc::UnboundedSender<OutputChunk>,
    ) -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            timeouts,
            scrollback_lines,
            output_tx,
        }
    }

    /// Spawns `command` with `args` inside `cwd`, starts the reader/writer/
    /// timer tasks, and returns the new session id. The session's readiness
    /// is observed separately via [`TerminalGateway::await_ready`].
    pub async fn spawn(&self, command: &str, args: &[String], cwd: &Path) -> Result<Uuid> {
        let id = Uuid::new_v4();
        let mut proc = ProcessCommand::new(command);
        proc.args(args)
            .current_dir(cwd)
            .stdin(std::process::Stdio::piped())
            .stdout(std::process::Stdio::piped())
            .stderr(std::process::Stdio::piped())
            .kill_on_drop(true);

        let mut child = proc.spawn()?;
        let stdin = child.stdin.take().expect("piped stdin");
        let stdout = child.stdout.take().expect("piped stdout");
        let stderr = child.stderr.take().expect("piped stderr");

        let (stdin_tx, mut stdin_rx) = mpsc::unbounded_channel::<Vec<u8>>();
        let cancel = CancellationToken::new();

        let handle = Arc::new(GatewayHandle {
            stdin_tx,
            state: RwLock::new(GatewayState {
                status: SessionStatus::Starting,
                scrollback: ScrollbackRing::new(self.scrollback_lines),
                last_output_at: Instant::now(),
                first_output_at: None,
                last_flushed_class: None,
            }),
            child: tokio::sync::Mutex::new(child),
            cancel: cancel.clone(),
            exited: AtomicBool::new(false),
        });

        // Writer task: serializes all stdin writes through one channel so
        // concurrent `send_text`/`send_key`/`interrupt` calls never interleave.
        {
            let mut stdin = stdin;
            tokio::spawn(async move {
                while let Some(bytes) = stdin_rx.recv().await {
                    if stdin.write_all(&bytes).await.is_err() {
                        break;
                    }
                    let _ = stdin.flush().await;
                }
            });
        }

        // Reader task: drains stdout, strips ANSI, flushes on idle timer or
        // prompt detection, and updates idle/stall classification.
        {
            let handle = handle.clone();
            let flush_after = Duration::from_millis(self.timeouts.output_flush_ms);
            let cancel = cancel.clone();
            let output_tx = self.output_tx.clone();
            tokio::spawn(async move {
                read_and_classify_loop(id, stdout, handle, flush_after, cancel, false, output_tx).await;
            });
        }
        {
            let handle = handle.clone();
            let flush_after = Duration::from_millis(self.timeouts.output_flush_ms);
            let cancel = cancel.clone();
            let output_tx = self.output_tx.clone();
            tokio::spawn(async move {
                read_and_classify_loop(id, stderr, handle, flush_after, cancel, true, output_tx).await;
            });
        }

        self.sessions.write().await.insert(id, handle);
        Ok(id)
    }

    async fn handle(&self, id: Uuid) -> Result<Arc<GatewayHandle>> {
        self.sessions
            .read()
            .await
            .get(&id)
            .cloned()
            .ok_or(GatewayError::NotFound(id))
    }

    pub async fn send_text(&self, id: Uuid, text: &str) -> Result<()> {
        let handle = self.handle(id).await?;
        let _ = handle.stdin_tx.send(text.as_bytes().to_vec());
        Ok(())
    }

    /// `named` keys: "enter", "tab", "up", "down", "ctrl-c", "escape".
    pub async fn send_key(&self, id: Uuid, named: &str) -> Result<()> {
        let bytes: &[u8] = match named {
            "enter" => b"\n",
            "tab" => b"\t",
            "up" => b"\x1b[A",
            "down" => b"\x1b[B",
            "escape" => b"\x1b",
            "ctrl-c" => b"\x03",
            _ => b"",
        };
        let handle = self.handle(id).await?;
        let _ = handle.stdin_tx.send(bytes.to_vec());
        Ok(())
    }

    /// No real PTY is allocated; resize is recorded for display purposes
    /// only (see module doc) and always completes immediately.
    pub async fn resize(&self, id: Uuid, _cols: u16, _rows: u16) -> Result<()> {
        self.handle(id).await?;
        Ok(())
    }

    /// Sends the canonical interrupt byte (Ctrl-C, 0x03).
    pub async fn interrupt(&self, id: Uuid) -> Result<()> {
        let handle = self.handle(id).await?;
        let _ = handle.stdin_tx.send(vec![0x03]);
        Ok(())
    }

    /// Graceful terminate: close stdin, wait briefly, escalate to kill.
    pub async fn close(&self, id: Uuid) -> Result<()> {
        let handle = self.handle(id).await?;
        handle.cancel.cancel();
        let mut child = handle.child.lock().await;
        if tokio::time::timeout(Duration::from_secs(5), child.wait()).await.is_err() {
            let _ = child.start_kill();
        }
        handle.exited.store(true, Ordering::SeqCst);
        handle.state.write().await.status = SessionStatus::Completed;
        Ok(())
    }

    /// Ready once output has gone quiet for `readiness_quiescence_ms` after
    /// the first byte arrives; otherwise times out after `readiness_timeout_ms`.
    pub async fn await_ready(&self, id: Uuid) -> Result<()> {
        let handle = self.handle(id).await?;
        let quiescence = Duration::from_millis(self.timeouts.readiness_quiescence_ms);
        let deadline = Instant::now() + Duration::from_millis(self.timeouts.readiness_timeout_ms);
        loop {
            {
                let state = handle.state.read().await;
                if let Some(first) = state.first_output_at {
                    if Instant::now().duration_since(state.last_output_at) >= quiescence
                        && Instant::now().duration_since(first) >= quiescence
                    {
                        drop(state);
                        handle.state.write().await.status = SessionStatus::Ready;
                        return Ok(());
                    }
                }
            }
            if Instant::now() >= deadline {
                return Err(GatewayError::ReadinessTimeout(id));
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
    }

    pub async fn read_since(&self, id: Uuid, since: u64) -> Result<Vec<ScrollbackLine>> {
        let handle = self.handle(id).await?;
        Ok(handle.state.read().await.scrollback.read_since(since))
    }

    pub async fn snapshot(&self, id: Uuid) -> Result<GatewaySnapshot> {
        let handle = self.handle(id).await?;
        let state = handle.state.read().await;
        Ok(GatewaySnapshot {
            status: state.status,
            lines: state.scrollback.snapshot(),
        })
    }

    pub async fn status(&self, id: Uuid) -> Result<SessionStatus> {
        let handle = self.handle(id).await?;
        Ok(handle.state.read().await.status)
    }

    /// Idle/stall classification, driven by a periodic tick. Call this from
    /// a background loop owned by the session manager, one per session or
    /// one shared sweeper over all sessions.
    pub async fn reclassify(&self, id: Uuid) -> Result<SessionStatus> {
        let handle = self.handle(id).await?;
        if handle.exited.load(Ordering::SeqCst) {
            return Ok(SessionStatus::Completed);
        }
        let mut state = handle.state.write().await;
        let since_output = Instant::now().duration_since(state.last_output_at);
        let working_threshold = Duration::from_millis(self.timeouts.working_threshold_ms);
        let idle_threshold = Duration::from_millis(self.timeouts.idle_threshold_ms);

        let next = if since_output < working_threshold {
            SessionStatus::Working
        } else if matches!(state.last_flushed_class, Some(MessageClass::Prompt)) {
            SessionStatus::NeedsInput
        } else if since_output >= idle_threshold {
            SessionStatus::Idle
        } else {
            state.status
        };

        if !matches!(state.status, SessionStatus::Starting | SessionStatus::Completed | SessionStatus::Failed) {
            state.status = next;
        }
        Ok(state.status)
    }
}

async fn read_and_classify_loop(
    session_id: Uuid,
    mut reader: impl tokio::io::AsyncRead + Unpin,
    handle: Arc<GatewayHandle>,
    flush_after: Duration,
    cancel: CancellationToken,
    is_stderr: bool,
    output_tx: mpsc::UnboundedSender<OutputChunk>,
) {
    let mut buf = [0u8; 4096];
    let mut pending = String::new();
    let mut last_byte_at = Instant::now();

    loop {
        let idle_tick = tokio::time::sleep(flush_after);
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = idle_tick => {
                if !pending.is_empty() {
                    flush(session_id, &handle, &mut pending, is_stderr, &output_tx).await;
                }
            }
            read = reader.read(&mut buf) => {
                match read {
                    Ok(0) => {
                        if !pending.is_empty() {
                            flush(session_id, &handle, &mut pending, is_stderr, &output_tx).await;
                        }
                        handle.exited.store(true, Ordering::SeqCst);
                        handle.state.write().await.status = SessionStatus::Completed;
                        break;
                    }
                    Ok(n) => {
                        let chunk = String::from_utf8_lossy(&buf[..n]);
                        pending.push_str(&chunk);
                        last_byte_at = Instant::now();
                        {
                            let mut state = handle.state.write().await;
                            state.last_output_at = last_byte_at;
                            if state.first_output_at.is_none() {
                                state.first_output_at = Some(last_byte_at);
                            }
                        }
                        if pending.ends_with('\n') {
                            flush(session_id, &handle, &mut pending, is_stderr, &output_tx).await;
                        }
                    }
                    Err(_) => break,
                }
            }
        }
    }
}

async fn flush(
    session_id: Uuid,
    handle: &Arc<GatewayHandle>,
    pending: &mut String,
    is_stderr: bool,
    output_tx: &mpsc::UnboundedSender<OutputChunk>,
) {
    let stripped = strip_ansi(pending);
    pending.clear();
    if stripped.trim().is_empty() {
        return;
    }
    let mut parsed = classify(&stripped);
    if is_stderr {
        parsed.class = MessageClass::Error;
    }
    let mut state = handle.state.write().await;
    let seq = state.scrollback.push(parsed.text.clone());
    state.last_flushed_class = Some(parsed.class);
    drop(state);
    let _ = output_tx.send(OutputChunk {
        session_id,
        seq,
        text: parsed.text,
        is_stderr,
    });
}
