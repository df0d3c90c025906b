//! Modem session
//!
//! Ties the connection, command engine and monitor task together behind one
//! cloneable handle that every frontend shares.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::config::ModemConfig;
use crate::diagnostics::{self, DiagnosticReport, NetworkStatus};
use crate::init::{InitReport, Initializer};
use crate::protocol::monitor::{Monitor, MonitorSettings};
use crate::protocol::{
    discover_port, CommandEngine, CommandResult, ConnectionState, ModemConnection, ModemError,
    Terminal, Transport, TransportFactory,
};
use crate::sms::{Dispatcher, SendOutcome, SmsSender};
use crate::voice::{self, CallOutcome};

/// Shared handle to one modem
#[derive(Clone)]
pub struct Modem {
    connection: Arc<ModemConnection>,
    engine: CommandEngine,
    config: Arc<ModemConfig>,
}

/// Running monitor task
pub struct MonitorHandle {
    task: JoinHandle<Result<(), ModemError>>,
    shutdown: watch::Sender<bool>,
}

impl MonitorHandle {
    /// Wait until the monitor exits on its own (transport lost for good)
    pub async fn wait(&mut self) -> Result<(), ModemError> {
        (&mut self.task)
            .await
            .map_err(|e| ModemError::Transport(format!("monitor task failed: {}", e)))?
    }

    /// Whether the monitor has exited
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Stop the monitor and wait for it
    pub async fn shutdown(self) -> Result<(), ModemError> {
        let _ = self.shutdown.send(true);
        self.task
            .await
            .map_err(|e| ModemError::Transport(format!("monitor task failed: {}", e)))?
    }
}

impl Modem {
    /// Open the configured device, discovering it when unset
    pub fn connect(config: &ModemConfig) -> Result<Self, ModemError> {
        let device = match &config.device {
            Some(device) => device.clone(),
            None => discover_port(&config.candidate_ports, config.baud_rate)?,
        };
        let connection = ModemConnection::open(&device, config.baud_rate)?;
        Ok(Self::from_connection(connection, config))
    }

    /// Use an already open transport; a factory enables reconnects
    pub fn with_transport(
        transport: Box<dyn Transport>,
        factory: Option<TransportFactory>,
        config: &ModemConfig,
    ) -> Self {
        let connection = ModemConnection::with_transport(transport, config.baud_rate, factory);
        Self::from_connection(connection, config)
    }

    fn from_connection(connection: ModemConnection, config: &ModemConfig) -> Self {
        let engine = CommandEngine::new(connection.transport());
        Self {
            connection: Arc::new(connection),
            engine,
            config: Arc::new(config.clone()),
        }
    }

    /// Start the monitor task. Commands only complete while it runs.
    pub fn start_monitor(&self, dispatcher: Dispatcher) -> MonitorHandle {
        let (shutdown, shutdown_rx) = watch::channel(false);
        let monitor = Monitor::new(
            self.connection.clone(),
            self.engine.clone(),
            dispatcher,
            MonitorSettings::from(self.config.as_ref()),
        );
        let task = tokio::spawn(monitor.run(shutdown_rx));
        MonitorHandle { task, shutdown }
    }

    /// Run the start-up handshake
    pub async fn initialize(&self) -> Result<InitReport, ModemError> {
        Initializer::new(&self.engine, &self.config.init).run().await
    }

    /// Send a text message
    pub async fn send_sms(&self, destination: &str, body: &str) -> Result<SendOutcome, ModemError> {
        SmsSender::new(&self.engine, &self.config.number_plan, &self.config.send)
            .send(destination, body)
            .await
    }

    /// Query registration and signal
    pub async fn network_status(&self) -> Result<NetworkStatus, ModemError> {
        NetworkStatus::query(&self.engine).await
    }

    /// Run the troubleshooting checks
    pub async fn diagnose(&self) -> Result<DiagnosticReport, ModemError> {
        diagnostics::run_diagnostics(&self.engine).await
    }

    /// Cycle the radio and wait up to 30 s for registration
    pub async fn force_registration(&self) -> Result<bool, ModemError> {
        diagnostics::force_registration(&self.engine, 30).await
    }

    /// Place a voice call and hang up after `hold`
    pub async fn dial(&self, number: &str, hold: Duration) -> Result<CallOutcome, ModemError> {
        voice::dial(&self.engine, number, hold).await
    }

    /// Send an ad-hoc command, ending at OK or ERROR
    pub async fn execute(&self, command: &str, timeout: Duration) -> Result<CommandResult, ModemError> {
        self.engine.execute(command, timeout, Terminal::COMMAND).await
    }

    /// Command engine
    pub fn engine(&self) -> &CommandEngine {
        &self.engine
    }

    /// Configuration in use
    pub fn config(&self) -> &ModemConfig {
        &self.config
    }

    /// Device identifier
    pub fn device(&self) -> &str {
        self.connection.device()
    }

    /// Current connection state
    pub fn connection_state(&self) -> ConnectionState {
        self.connection.state()
    }

    /// Whether the device is open
    pub fn is_connected(&self) -> bool {
        self.connection.is_connected()
    }

    /// Close the device
    pub async fn close(&self) {
        self.connection.close().await;
    }
}
