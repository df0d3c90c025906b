use std::sync::Arc;
use tokio::sync::Mutex;

use super::ModemError;

/// Raw byte channel to the modem.
///
/// Implementations do no buffering or interpretation. `read_available` must
/// return promptly: an empty vector means nothing has arrived yet.
pub trait Transport: Send {
    /// Write all bytes to the device
    fn write_bytes(&mut self, data: &[u8]) -> Result<(), ModemError>;

    /// Read whatever bytes are waiting, possibly none
    fn read_available(&mut self) -> Result<Vec<u8>, ModemError>;

    /// Release the device
    fn close(&mut self);

    /// Whether the device is still open
    fn is_open(&self) -> bool;

    /// Device identifier for logging (e.g. "/dev/ttyUSB0" or "COM3")
    fn name(&self) -> &str;
}

/// Transport handle shared by the monitor task (reader) and the command engine (writer)
pub type SharedTransport = Arc<Mutex<Box<dyn Transport>>>;

/// Wrap a transport for sharing
pub fn into_shared(transport: Box<dyn Transport>) -> SharedTransport {
    Arc::new(Mutex::new(transport))
}
