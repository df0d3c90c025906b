//! Command engine
//!
//! Serializes access to the transport and correlates each command with the
//! lines the monitor task routes back to it, up to a terminal token or a deadline.

use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::{mpsc, OwnedMutexGuard};
use tokio::time::Instant;

use super::{ModemError, SharedTransport, DEFAULT_TIMEOUT_MS, LINE_TERMINATOR};

/// Lines that end a command's response window
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Terminal {
    /// `OK`
    Ok,
    /// `ERROR`, `+CME ERROR: n` or `+CMS ERROR: n`
    Error,
    /// `>` payload prompt
    Prompt,
    /// `NO CARRIER`
    NoCarrier,
    /// `BUSY`
    Busy,
    /// `NO ANSWER`
    NoAnswer,
    /// `NO DIALTONE`
    NoDialtone,
}

impl Terminal {
    /// Final results of an ordinary command
    pub const COMMAND: &'static [Terminal] = &[Terminal::Ok, Terminal::Error];

    /// Results of a command that opens a payload prompt
    pub const PROMPT: &'static [Terminal] = &[Terminal::Prompt, Terminal::Error];

    /// Final results of a dial command
    pub const DIAL: &'static [Terminal] = &[
        Terminal::Ok,
        Terminal::Error,
        Terminal::NoCarrier,
        Terminal::Busy,
        Terminal::NoAnswer,
        Terminal::NoDialtone,
    ];

    /// Whether `line` is this terminal token
    pub fn matches(&self, line: &str) -> bool {
        match self {
            Terminal::Ok => line == "OK",
            Terminal::Error => {
                line == "ERROR"
                    || line.starts_with("+CME ERROR")
                    || line.starts_with("+CMS ERROR")
            }
            Terminal::Prompt => line.starts_with('>'),
            Terminal::NoCarrier => line == "NO CARRIER",
            Terminal::Busy => line == "BUSY",
            Terminal::NoAnswer => line == "NO ANSWER",
            Terminal::NoDialtone => line == "NO DIALTONE",
        }
    }

    /// First terminal in `terminals` matching `line`
    pub fn find(terminals: &[Terminal], line: &str) -> Option<Terminal> {
        terminals.iter().copied().find(|t| t.matches(line))
    }
}

/// Reply captured for one command
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandResult {
    /// Command (or payload label) that was sent
    pub command: String,
    /// Every solicited line, terminal included
    pub lines: Vec<String>,
    /// Terminal token that ended the wait
    pub matched: Terminal,
    /// Time from write to terminal
    pub elapsed: Duration,
}

impl CommandResult {
    /// Captured lines joined with newlines
    pub fn text(&self) -> String {
        self.lines.join("\n")
    }

    /// Whether the command ended with `OK`
    pub fn is_ok(&self) -> bool {
        self.matched == Terminal::Ok
    }

    /// Whether any captured line contains `needle`
    pub fn contains(&self, needle: &str) -> bool {
        self.lines.iter().any(|l| l.contains(needle))
    }

    /// First captured line starting with `prefix`
    pub fn line_with_prefix(&self, prefix: &str) -> Option<&str> {
        self.lines
            .iter()
            .map(String::as_str)
            .find(|l| l.starts_with(prefix))
    }
}

/// The command currently in flight
#[derive(Debug)]
struct PendingCommand {
    command: String,
    issued_at: Instant,
    sink: mpsc::UnboundedSender<String>,
}

/// The single "pending command" slot shared with the monitor task
#[derive(Debug, Default)]
pub struct PendingSlot {
    inner: Mutex<Option<PendingCommand>>,
}

impl PendingSlot {
    fn lock(&self) -> MutexGuard<'_, Option<PendingCommand>> {
        // A panic while holding the lock cannot leave the Option half-written
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Whether a command is waiting for its reply
    pub fn is_pending(&self) -> bool {
        self.lock().is_some()
    }

    /// Hand a solicited line to the pending command.
    ///
    /// Returns false when nothing is waiting (a late reply to a timed-out command).
    pub fn deliver(&self, line: String) -> bool {
        match self.lock().as_ref() {
            Some(pending) => pending.sink.send(line).is_ok(),
            None => false,
        }
    }

    /// Fail the pending command immediately (transport lost)
    pub fn abandon(&self) {
        if let Some(pending) = self.lock().take() {
            tracing::warn!(
                command = %pending.command,
                waited_ms = pending.issued_at.elapsed().as_millis() as u64,
                "abandoning pending command"
            );
        }
    }

    fn install(&self, pending: PendingCommand) {
        let mut slot = self.lock();
        debug_assert!(slot.is_none(), "two commands in flight");
        *slot = Some(pending);
    }

    fn clear(&self) {
        self.lock().take();
    }
}

/// Clears the slot however the wait ends
struct SlotGuard<'a>(&'a PendingSlot);

impl Drop for SlotGuard<'_> {
    fn drop(&mut self) {
        self.0.clear();
    }
}

/// Exclusive command channel to the modem
#[derive(Clone)]
pub struct CommandEngine {
    transport: SharedTransport,
    slot: Arc<PendingSlot>,
    exclusive: Arc<tokio::sync::Mutex<()>>,
}

impl CommandEngine {
    /// Create an engine writing to `transport`
    pub fn new(transport: SharedTransport) -> Self {
        Self {
            transport,
            slot: Arc::new(PendingSlot::default()),
            exclusive: Arc::new(tokio::sync::Mutex::new(())),
        }
    }

    /// Slot the monitor task delivers solicited lines into
    pub fn pending_slot(&self) -> Arc<PendingSlot> {
        self.slot.clone()
    }

    /// Acquire exclusive access for a multi-step exchange.
    ///
    /// Waiters are served in arrival order.
    pub async fn session(&self) -> CommandSession {
        let guard = self.exclusive.clone().lock_owned().await;
        CommandSession {
            transport: self.transport.clone(),
            slot: self.slot.clone(),
            _guard: guard,
        }
    }

    /// Send one command and wait for one of `terminals`
    pub async fn execute(
        &self,
        command: &str,
        timeout: Duration,
        terminals: &[Terminal],
    ) -> Result<CommandResult, ModemError> {
        self.session().await.execute(command, timeout, terminals).await
    }

    /// Send one command with the default timeout, ending at OK or ERROR
    pub async fn command(&self, command: &str) -> Result<CommandResult, ModemError> {
        self.execute(
            command,
            Duration::from_millis(DEFAULT_TIMEOUT_MS),
            Terminal::COMMAND,
        )
        .await
    }
}

/// Exclusive hold on the command channel
pub struct CommandSession {
    transport: SharedTransport,
    slot: Arc<PendingSlot>,
    _guard: OwnedMutexGuard<()>,
}

impl CommandSession {
    /// Send a line-terminated command
    pub async fn execute(
        &mut self,
        command: &str,
        timeout: Duration,
        terminals: &[Terminal],
    ) -> Result<CommandResult, ModemError> {
        let wire = format!("{}{}", command, LINE_TERMINATOR);
        self.transact(command, wire.as_bytes(), timeout, terminals)
            .await
    }

    /// Write raw bytes and collect the reply.
    ///
    /// `label` names the exchange in results and logs.
    pub async fn transact(
        &mut self,
        label: &str,
        bytes: &[u8],
        timeout: Duration,
        terminals: &[Terminal],
    ) -> Result<CommandResult, ModemError> {
        let (sink, mut replies) = mpsc::unbounded_channel();
        let issued_at = Instant::now();

        // Installed before writing so no reply line can be routed as noise
        self.slot.install(PendingCommand {
            command: label.to_string(),
            issued_at,
            sink,
        });
        let _clear = SlotGuard(&self.slot);

        tracing::debug!(command = label, timeout_ms = timeout.as_millis() as u64, "tx");
        self.transport.lock().await.write_bytes(bytes)?;

        let deadline = issued_at + timeout;
        let mut lines = Vec::new();
        loop {
            match tokio::time::timeout_at(deadline, replies.recv()).await {
                Ok(Some(line)) => {
                    let matched = Terminal::find(terminals, &line);
                    lines.push(line);
                    if let Some(matched) = matched {
                        let elapsed = issued_at.elapsed();
                        tracing::debug!(
                            command = label,
                            ?matched,
                            elapsed_ms = elapsed.as_millis() as u64,
                            "rx {:?}",
                            lines
                        );
                        return Ok(CommandResult {
                            command: label.to_string(),
                            lines,
                            matched,
                            elapsed,
                        });
                    }
                }
                Ok(None) => return Err(ModemError::NotConnected),
                Err(_) => {
                    let elapsed = issued_at.elapsed();
                    tracing::warn!(command = label, partial = ?lines, "command timed out");
                    return Err(ModemError::Timeout {
                        command: label.to_string(),
                        partial: lines,
                        elapsed,
                    });
                }
            }
        }
    }
}
