//! Monitor task
//!
//! The only reader of the transport. Polls on a fixed interval, frames lines,
//! routes them, and runs the periodic liveness probe.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::{interval, interval_at, Instant, MissedTickBehavior};

use super::{
    CommandEngine, Demultiplexer, LineBuffer, ModemConnection, ModemError, ModemEvent, Routed,
    Terminal,
};
use crate::config::ModemConfig;
use crate::sms::Dispatcher;

/// Timing and recovery knobs for the monitor
#[derive(Debug, Clone)]
pub(crate) struct MonitorSettings {
    pub poll_interval: Duration,
    pub settle: Duration,
    pub health_interval: Option<Duration>,
    pub health_timeout: Duration,
    pub reconnect_attempts: u32,
    pub reconnect_backoff: Duration,
}

impl From<&ModemConfig> for MonitorSettings {
    fn from(config: &ModemConfig) -> Self {
        Self {
            poll_interval: config.poll_interval(),
            settle: config.settle(),
            health_interval: config.health_interval(),
            health_timeout: config.health_timeout(),
            reconnect_attempts: config.reconnect_attempts,
            reconnect_backoff: config.reconnect_backoff(),
        }
    }
}

pub(crate) struct Monitor {
    connection: Arc<ModemConnection>,
    engine: CommandEngine,
    dispatcher: Dispatcher,
    demux: Demultiplexer,
    lines: LineBuffer,
    settings: MonitorSettings,
    health_running: Arc<AtomicBool>,
    health_failures: Arc<AtomicU32>,
}

/// Resolves once shutdown is signalled or its sender is gone
async fn shutdown_requested(shutdown: &mut watch::Receiver<bool>) {
    while !*shutdown.borrow_and_update() {
        if shutdown.changed().await.is_err() {
            return;
        }
    }
}

impl Monitor {
    pub fn new(
        connection: Arc<ModemConnection>,
        engine: CommandEngine,
        dispatcher: Dispatcher,
        settings: MonitorSettings,
    ) -> Self {
        Self {
            connection,
            engine,
            dispatcher,
            demux: Demultiplexer::new(settings.settle),
            lines: LineBuffer::new(),
            settings,
            health_running: Arc::new(AtomicBool::new(false)),
            health_failures: Arc::new(AtomicU32::new(0)),
        }
    }

    /// Run until shutdown is signalled or the transport is lost for good
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) -> Result<(), ModemError> {
        let mut poll = interval(self.settings.poll_interval);
        poll.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let health_enabled = self.settings.health_interval.is_some();
        let health_period = self
            .settings
            .health_interval
            .unwrap_or(Duration::from_secs(3600));
        let mut health = interval_at(Instant::now() + health_period, health_period);
        health.set_missed_tick_behavior(MissedTickBehavior::Skip);

        tracing::info!(device = %self.connection.device(), "monitor started");

        loop {
            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
                _ = poll.tick() => {
                    if let Err(e) = self.poll_once().await {
                        tokio::select! {
                            recovered = self.recover(e) => recovered?,
                            _ = shutdown_requested(&mut shutdown) => {
                                tracing::info!("shutdown during reconnect");
                                self.connection.close().await;
                                break;
                            }
                        }
                    }
                }
                _ = health.tick(), if health_enabled => self.spawn_health_check(),
            }
        }

        tracing::info!(device = %self.connection.device(), "monitor stopped");
        Ok(())
    }

    async fn poll_once(&mut self) -> Result<(), ModemError> {
        let bytes = self
            .connection
            .transport()
            .lock()
            .await
            .read_available()?;

        let now = Instant::now();
        if !bytes.is_empty() {
            tracing::trace!(len = bytes.len(), "raw {:?}", String::from_utf8_lossy(&bytes));
            let slot = self.engine.pending_slot();
            for line in self.lines.feed(&bytes) {
                tracing::debug!("rx line: {}", line);
                for routed in self.demux.route(line, slot.is_pending(), now) {
                    self.handle(routed);
                }
            }
        }

        if let Some(routed) = self.demux.flush_expired(now) {
            self.handle(routed);
        }
        Ok(())
    }

    fn handle(&self, routed: Routed) {
        match routed {
            Routed::Solicited(line) => {
                if !self.engine.pending_slot().deliver(line.clone()) {
                    tracing::debug!("late reply with no pending command: {}", line);
                }
            }
            Routed::Event(ModemEvent::IncomingMessage(message)) => {
                tracing::info!(sender = %message.sender, body = %message.body, "new message");
                self.dispatcher.dispatch(message);
            }
            Routed::Event(event) => tracing::info!(?event, "modem notification"),
            Routed::Noise(line) => tracing::debug!("modem: {}", line),
            Routed::Dropped(e) => tracing::warn!("dropping notification: {}", e),
        }
    }

    async fn recover(&mut self, error: ModemError) -> Result<(), ModemError> {
        if !error.is_transport() {
            tracing::warn!("monitor poll failed: {}", error);
            return Ok(());
        }

        tracing::error!(device = %self.connection.device(), "transport failure: {}", error);
        self.engine.pending_slot().abandon();
        self.lines = LineBuffer::new();
        self.connection
            .reconnect(
                self.settings.reconnect_attempts,
                self.settings.reconnect_backoff,
            )
            .await
    }

    /// The probe runs on its own task: it waits on replies that only this
    /// task can deliver.
    fn spawn_health_check(&self) {
        if self.health_running.swap(true, Ordering::SeqCst) {
            return;
        }

        let engine = self.engine.clone();
        let running = self.health_running.clone();
        let failures = self.health_failures.clone();
        let timeout = self.settings.health_timeout;

        tokio::spawn(async move {
            match engine.execute("AT", timeout, Terminal::COMMAND).await {
                Ok(result) if result.is_ok() => {
                    failures.store(0, Ordering::SeqCst);
                    tracing::debug!("health check ok");
                }
                Ok(result) => {
                    let n = failures.fetch_add(1, Ordering::SeqCst) + 1;
                    tracing::warn!(consecutive = n, "health check rejected: {}", result.text());
                }
                Err(e) => {
                    let n = failures.fetch_add(1, Ordering::SeqCst) + 1;
                    tracing::warn!(consecutive = n, "health check failed: {}", e);
                }
            }
            running.store(false, Ordering::SeqCst);
        });
    }
}
