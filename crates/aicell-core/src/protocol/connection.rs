//! Connection management
//!
//! Owns the open transport and its lifecycle: open, reconnect, close.

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

use super::{into_shared, ModemError, SerialTransport, SharedTransport, Transport};

/// Connection state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConnectionState {
    /// Not connected
    Disconnected,
    /// Opening or re-opening the device
    Connecting,
    /// Device open and being polled
    Connected,
    /// I/O failed and could not be recovered
    Error,
}

/// Re-opens the device after an I/O failure
pub type TransportFactory = Arc<dyn Fn() -> Result<Box<dyn Transport>, ModemError> + Send + Sync>;

/// The single open modem connection
pub struct ModemConnection {
    device: String,
    baud_rate: u32,
    transport: SharedTransport,
    state: watch::Sender<ConnectionState>,
    factory: Option<TransportFactory>,
}

impl ModemConnection {
    /// Open a serial device
    pub fn open(device: &str, baud_rate: u32) -> Result<Self, ModemError> {
        let transport = SerialTransport::open(device, baud_rate)?;
        let name = device.to_string();
        let factory: TransportFactory = Arc::new(move || {
            SerialTransport::open(&name, baud_rate).map(|t| Box::new(t) as Box<dyn Transport>)
        });
        Ok(Self::with_transport(
            Box::new(transport),
            baud_rate,
            Some(factory),
        ))
    }

    /// Wrap an already open transport.
    ///
    /// Without a factory a transport failure cannot be recovered.
    pub fn with_transport(
        transport: Box<dyn Transport>,
        baud_rate: u32,
        factory: Option<TransportFactory>,
    ) -> Self {
        let device = transport.name().to_string();
        let state = if transport.is_open() {
            ConnectionState::Connected
        } else {
            ConnectionState::Disconnected
        };
        let (state, _) = watch::channel(state);
        Self {
            device,
            baud_rate,
            transport: into_shared(transport),
            state,
            factory,
        }
    }

    /// Device identifier
    pub fn device(&self) -> &str {
        &self.device
    }

    /// Configured baud rate
    pub fn baud_rate(&self) -> u32 {
        self.baud_rate
    }

    /// Current state
    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    /// Whether the device is open and usable
    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    /// Watch state changes
    pub fn subscribe(&self) -> watch::Receiver<ConnectionState> {
        self.state.subscribe()
    }

    /// Shared transport handle
    pub fn transport(&self) -> SharedTransport {
        self.transport.clone()
    }

    pub(crate) fn set_state(&self, state: ConnectionState) {
        let previous = self.state.send_replace(state);
        if previous != state {
            tracing::info!(device = %self.device, ?previous, ?state, "connection state changed");
        }
    }

    /// Close the failed transport and try to reopen it with linear backoff
    pub async fn reconnect(&self, attempts: u32, backoff: Duration) -> Result<(), ModemError> {
        self.set_state(ConnectionState::Connecting);
        self.transport.lock().await.close();

        let Some(factory) = self.factory.clone() else {
            self.set_state(ConnectionState::Error);
            return Err(ModemError::ReconnectExhausted {
                attempts: 0,
                last_error: "transport cannot be reopened".to_string(),
            });
        };

        let mut last_error = String::new();
        for attempt in 1..=attempts {
            tokio::time::sleep(backoff * attempt).await;

            let open = factory.clone();
            let reopened = tokio::task::spawn_blocking(move || open())
                .await
                .map_err(|e| ModemError::Transport(e.to_string()))
                .and_then(|r| r);

            match reopened {
                Ok(transport) => {
                    *self.transport.lock().await = transport;
                    self.set_state(ConnectionState::Connected);
                    tracing::info!(device = %self.device, attempt, "transport reopened");
                    return Ok(());
                }
                Err(e) => {
                    tracing::warn!(device = %self.device, attempt, "reopen failed: {}", e);
                    last_error = e.to_string();
                }
            }
        }

        self.set_state(ConnectionState::Error);
        Err(ModemError::ReconnectExhausted {
            attempts,
            last_error,
        })
    }

    /// Release the device
    pub async fn close(&self) {
        self.transport.lock().await.close();
        self.set_state(ConnectionState::Disconnected);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::simulator::{SimulatedModem, SimulatorProfile};
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test(start_paused = true)]
    async fn test_reconnect_without_factory_fails() {
        let modem = SimulatedModem::new(SimulatorProfile::default());
        let conn = ModemConnection::with_transport(Box::new(modem), 115200, None);
        assert_eq!(conn.state(), ConnectionState::Connected);

        let err = conn
            .reconnect(3, Duration::from_millis(10))
            .await
            .unwrap_err();
        assert!(matches!(err, ModemError::ReconnectExhausted { attempts: 0, .. }));
        assert_eq!(conn.state(), ConnectionState::Error);
    }

    #[tokio::test(start_paused = true)]
    async fn test_reconnect_retries_until_success() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();
        let factory: TransportFactory = Arc::new(move || {
            if counter.fetch_add(1, Ordering::SeqCst) < 2 {
                Err(ModemError::Transport("device busy".to_string()))
            } else {
                Ok(Box::new(SimulatedModem::new(SimulatorProfile::default())) as Box<dyn Transport>)
            }
        });

        let modem = SimulatedModem::new(SimulatorProfile::default());
        let conn = ModemConnection::with_transport(Box::new(modem), 115200, Some(factory));
        conn.reconnect(5, Duration::from_millis(10)).await.unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert!(conn.is_connected());
    }

    #[tokio::test]
    async fn test_close_sets_disconnected() {
        let modem = SimulatedModem::new(SimulatorProfile::default());
        let conn = ModemConnection::with_transport(Box::new(modem), 115200, None);
        let mut watcher = conn.subscribe();
        conn.close().await;
        assert_eq!(conn.state(), ConnectionState::Disconnected);
        assert!(watcher.has_changed().unwrap());
        assert!(!conn.transport().lock().await.is_open());
    }
}
