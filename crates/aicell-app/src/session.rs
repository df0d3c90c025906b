//! Modem start-up shared by every frontend

use aicell_core::config::ModemConfig;
use aicell_core::init::InitReport;
use aicell_core::modem::{Modem, MonitorHandle};
use aicell_core::protocol::{list_ports, Transport, TransportFactory};
use aicell_core::simulator::{SimulatedModem, SimulatorProfile};
use aicell_core::sms::Dispatcher;
use anyhow::{bail, Context, Result};
use std::sync::Arc;

/// Open the real device, or the built-in simulator in demo mode
pub fn open_modem(config: &ModemConfig, demo: bool) -> Result<Modem> {
    if demo {
        tracing::info!("demo mode: using simulated modem");
        let factory: TransportFactory = Arc::new(|| {
            Ok(Box::new(SimulatedModem::new(SimulatorProfile::demo())) as Box<dyn Transport>)
        });
        let sim = SimulatedModem::new(SimulatorProfile::demo());
        return Ok(Modem::with_transport(Box::new(sim), Some(factory), config));
    }

    match Modem::connect(config) {
        Ok(modem) => {
            tracing::info!(device = modem.device(), baud = config.baud_rate, "modem connected");
            Ok(modem)
        }
        Err(e) => {
            print_available_ports();
            Err(e).context("opening modem")
        }
    }
}

/// Start the monitor and run the handshake.
///
/// Fails when the modem never answered the liveness probe.
pub async fn start(modem: &Modem, dispatcher: Dispatcher) -> Result<(MonitorHandle, InitReport)> {
    let monitor = modem.start_monitor(dispatcher);
    let report = modem.initialize().await.context("initializing modem")?;

    if !report.is_ready() {
        let _ = monitor.shutdown().await;
        eprintln!("\nGSM FAILED. Check:");
        eprintln!("  1. SIM card inserted?");
        eprintln!("  2. Antenna connected?");
        eprintln!("  3. LED blinking every 3 sec?");
        eprintln!("  4. Permission to open the serial port?");
        print_available_ports();
        bail!("modem did not respond");
    }

    if !report.is_registered() {
        tracing::warn!("not registered on a network; sends may fail until it attaches");
    }
    if let Some(signal) = report.signal {
        tracing::info!(%signal, "modem ready");
    }
    Ok((monitor, report))
}

fn print_available_ports() {
    let ports = list_ports();
    if ports.is_empty() {
        eprintln!("No serial ports found.");
        return;
    }
    eprintln!("Available serial ports:");
    for port in ports {
        eprintln!(
            "  {}  {}",
            port.name,
            port.product.as_deref().unwrap_or("(unknown device)")
        );
    }
}
