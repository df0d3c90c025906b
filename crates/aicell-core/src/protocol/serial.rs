//! Serial port handling
//!
//! Provides low-level serial port access and modem discovery.

use serialport::{SerialPort, SerialPortInfo, SerialPortType};
use std::collections::HashMap;
#[cfg(target_os = "linux")]
use std::fs;
use std::io::{ErrorKind, Read, Write};
use std::time::{Duration, Instant};

use super::{ModemError, Transport, DEFAULT_BAUD_RATE, LINE_TERMINATOR};

/// Information about an available serial port
#[derive(Debug, Clone)]
pub struct PortInfo {
    /// Port name (e.g., "/dev/ttyUSB0" or "COM3")
    pub name: String,

    /// USB vendor ID (if USB device)
    pub vid: Option<u16>,

    /// USB product ID (if USB device)
    pub pid: Option<u16>,

    /// Product name (if available)
    pub product: Option<String>,
}

impl PortInfo {
    fn bare(name: String) -> Self {
        Self {
            name,
            vid: None,
            pid: None,
            product: None,
        }
    }
}

impl From<SerialPortInfo> for PortInfo {
    fn from(info: SerialPortInfo) -> Self {
        let (vid, pid, product) = match info.port_type {
            SerialPortType::UsbPort(usb_info) => {
                (Some(usb_info.vid), Some(usb_info.pid), usb_info.product)
            }
            _ => (None, None, None),
        };

        Self {
            name: info.port_name,
            vid,
            pid,
            product,
        }
    }
}

/// Sort key for port names. GSM boards usually sit behind a USB-serial
/// bridge, so ttyUSB* comes first, then ttyACM*, then COMn, then the rest;
/// numbered families sort by number.
fn port_sort_key(name: &str) -> (u8, usize, String) {
    let basename = name.rsplit('/').next().unwrap_or(name);
    let families = [("ttyUSB", 0u8), ("ttyACM", 1), ("COM", 2)];
    for (prefix, rank) in families {
        if let Some(rest) = basename.strip_prefix(prefix) {
            if let Ok(num) = rest.parse::<usize>() {
                return (rank, num, basename.to_string());
            }
        }
    }
    (3, 0, basename.to_string())
}

/// List all available serial ports, with /dev fallbacks and deterministic ordering
pub fn list_ports() -> Vec<PortInfo> {
    let mut map: HashMap<String, PortInfo> = HashMap::new();
    for info in serialport::available_ports().unwrap_or_default() {
        let p = PortInfo::from(info);
        map.entry(p.name.clone()).or_insert(p);
    }

    // Linux-only: the enumeration API misses some CDC devices
    #[cfg(target_os = "linux")]
    if let Ok(entries) = fs::read_dir("/dev") {
        for entry in entries.flatten() {
            if let Some(fname) = entry.file_name().to_str() {
                if fname.starts_with("ttyUSB") || fname.starts_with("ttyACM") {
                    let full = format!("/dev/{}", fname);
                    map.entry(full.clone())
                        .or_insert_with(|| PortInfo::bare(full));
                }
            }
        }
    }

    let mut v: Vec<PortInfo> = map.into_values().collect();
    v.sort_by_key(|p| port_sort_key(&p.name));
    v
}

/// Open and configure a serial port (8N1, no flow control)
pub fn open_port(name: &str, baud_rate: Option<u32>) -> Result<Box<dyn SerialPort>, ModemError> {
    let baud = baud_rate.unwrap_or(DEFAULT_BAUD_RATE);

    // Short timeout keeps reads responsive; callers poll bytes_to_read first
    let mut port = serialport::new(name, baud)
        .data_bits(serialport::DataBits::Eight)
        .parity(serialport::Parity::None)
        .stop_bits(serialport::StopBits::One)
        .flow_control(serialport::FlowControl::None)
        .timeout(Duration::from_millis(50))
        .open()
        .map_err(|e| ModemError::Transport(format!("{}: {}", name, e)))?;

    // Some USB bridges gate the modem's UART on DTR/RTS
    if let Err(e) = port.write_data_terminal_ready(true) {
        tracing::debug!(port = name, "failed to assert DTR: {}", e);
    }
    if let Err(e) = port.write_request_to_send(true) {
        tracing::debug!(port = name, "failed to assert RTS: {}", e);
    }

    port.clear(serialport::ClearBuffer::All)
        .map_err(|e| ModemError::Transport(e.to_string()))?;

    Ok(port)
}

/// Serial port implementing [`Transport`]
pub struct SerialTransport {
    port: Option<Box<dyn SerialPort>>,
    name: String,
}

impl SerialTransport {
    /// Open `name` at `baud_rate`
    pub fn open(name: &str, baud_rate: u32) -> Result<Self, ModemError> {
        let port = open_port(name, Some(baud_rate))?;
        tracing::info!(port = name, baud = baud_rate, "serial port opened");
        Ok(Self {
            port: Some(port),
            name: name.to_string(),
        })
    }
}

impl Transport for SerialTransport {
    fn write_bytes(&mut self, data: &[u8]) -> Result<(), ModemError> {
        let port = self.port.as_mut().ok_or(ModemError::NotConnected)?;
        port.write_all(data)
            .and_then(|_| port.flush())
            .map_err(|e| ModemError::Transport(e.to_string()))
    }

    fn read_available(&mut self) -> Result<Vec<u8>, ModemError> {
        let port = self.port.as_mut().ok_or(ModemError::NotConnected)?;

        let available = port
            .bytes_to_read()
            .map_err(|e| ModemError::Transport(e.to_string()))? as usize;
        if available == 0 {
            return Ok(Vec::new());
        }

        let mut buf = vec![0u8; available];
        match port.read(&mut buf) {
            Ok(n) => {
                buf.truncate(n);
                Ok(buf)
            }
            Err(e) if e.kind() == ErrorKind::TimedOut || e.kind() == ErrorKind::WouldBlock => {
                Ok(Vec::new())
            }
            Err(e) => Err(ModemError::Transport(e.to_string())),
        }
    }

    fn close(&mut self) {
        if self.port.take().is_some() {
            tracing::info!(port = %self.name, "serial port closed");
        }
    }

    fn is_open(&self) -> bool {
        self.port.is_some()
    }

    fn name(&self) -> &str {
        &self.name
    }
}

/// Check whether a modem answers "AT" on `name`.
///
/// Runs outside the command engine: the port is opened, probed and closed
/// before the real session starts.
pub fn probe_port(name: &str, baud_rate: u32, wait: Duration) -> bool {
    let mut transport = match SerialTransport::open(name, baud_rate) {
        Ok(t) => t,
        Err(e) => {
            tracing::debug!(port = name, "probe open failed: {}", e);
            return false;
        }
    };

    let command = format!("AT{}", LINE_TERMINATOR);
    if transport.write_bytes(command.as_bytes()).is_err() {
        return false;
    }

    let start = Instant::now();
    let mut reply = Vec::new();
    while start.elapsed() < wait {
        match transport.read_available() {
            Ok(bytes) => reply.extend_from_slice(&bytes),
            Err(_) => break,
        }
        if String::from_utf8_lossy(&reply).contains("OK") {
            transport.close();
            return true;
        }
        std::thread::sleep(Duration::from_millis(50));
    }
    transport.close();
    false
}

/// Find the first port that answers the liveness probe.
///
/// Tries `candidates` in order, or every listed port when `candidates` is empty.
pub fn discover_port(candidates: &[String], baud_rate: u32) -> Result<String, ModemError> {
    let names: Vec<String> = if candidates.is_empty() {
        list_ports().into_iter().map(|p| p.name).collect()
    } else {
        candidates.to_vec()
    };

    for name in &names {
        tracing::info!(port = %name, "probing for modem");
        if probe_port(name, baud_rate, Duration::from_secs(1)) {
            tracing::info!(port = %name, "modem found");
            return Ok(name.clone());
        }
    }
    Err(ModemError::PortNotFound(names.join(", ")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_list_ports() {
        // Only checks that enumeration does not panic on this host
        let ports = list_ports();
        for port in &ports {
            println!("Found port: {} - {:?}", port.name, port.product);
        }
    }

    #[test]
    fn test_port_sorting() {
        let names = vec![
            "/dev/ttyACM0",
            "COM10",
            "/dev/ttyUSB1",
            "/dev/someport",
            "COM3",
            "/dev/ttyUSB0",
            "/dev/ttyUSB10",
        ];
        let mut ports: Vec<PortInfo> = names
            .into_iter()
            .map(|n| PortInfo::bare(n.to_string()))
            .collect();

        ports.sort_by_key(|p| port_sort_key(&p.name));
        let ordered: Vec<String> = ports.into_iter().map(|p| p.name).collect();

        assert_eq!(
            ordered,
            vec![
                "/dev/ttyUSB0",
                "/dev/ttyUSB1",
                "/dev/ttyUSB10",
                "/dev/ttyACM0",
                "COM3",
                "COM10",
                "/dev/someport",
            ]
        );
    }

    #[test]
    fn test_discover_with_missing_candidates() {
        let candidates = vec!["/dev/aicell-does-not-exist".to_string()];
        match discover_port(&candidates, DEFAULT_BAUD_RATE) {
            Err(ModemError::PortNotFound(list)) => assert!(list.contains("does-not-exist")),
            other => panic!("unexpected result: {:?}", other),
        }
    }
}
