//! Simulated modem
//!
//! An in-process [`Transport`] that answers the AT dialect used here the way a
//! SIM800-class module does. Used by `--demo` and by the tests, where a
//! [`SimulatorProbe`] records what was written and injects notifications.

use chrono::Utc;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::time::Instant;

use crate::protocol::{ModemError, Transport, CTRL_Z};

const DEMO_SENDERS: &[&str] = &["+8801712345678", "+8801898765432", "+8801555000111"];
const DEMO_MESSAGES: &[&str] = &[
    "hi",
    "hello",
    "what is aicell",
    "help",
    "How do I treat fever in children?",
    "best time to plant rice",
];

/// How the simulated module behaves
#[derive(Debug, Clone)]
pub struct SimulatorProfile {
    /// Answer commands at all
    pub responsive: bool,
    /// Echo commands back (cleared by `ATE0`)
    pub echo: bool,
    /// A SIM card is inserted
    pub sim_inserted: bool,
    /// PIN the SIM is locked with
    pub sim_pin: Option<String>,
    /// Registration code reported once searching is over
    pub registration: u8,
    /// `AT+CREG?` polls answered with "searching" first
    pub registration_delay_polls: u32,
    /// RSSI reported by `AT+CSQ`; `None` reports 99
    pub signal: Option<u8>,
    /// Accepted `AT+CNMI` argument strings; empty accepts all
    pub notification_modes: Vec<String>,
    /// Open the `>` prompt for `AT+CMGS`
    pub send_prompt: bool,
    /// Confirm submitted bodies with `+CMGS`
    pub send_confirms: bool,
    /// Command prefixes answered without their final result line
    pub stalled: Vec<String>,
    /// Bytes returned per read; `None` returns everything
    pub chunk_size: Option<usize>,
    /// Emit incoming messages on its own every so often
    pub traffic: bool,
    /// Seed for traffic timing and content
    pub seed: Option<u64>,
}

impl Default for SimulatorProfile {
    fn default() -> Self {
        Self {
            responsive: true,
            echo: true,
            sim_inserted: true,
            sim_pin: None,
            registration: 1,
            registration_delay_polls: 0,
            signal: Some(18),
            notification_modes: Vec::new(),
            send_prompt: true,
            send_confirms: true,
            stalled: Vec::new(),
            chunk_size: None,
            traffic: false,
            seed: None,
        }
    }
}

impl SimulatorProfile {
    /// Profile used by demo mode: healthy module with spontaneous traffic
    pub fn demo() -> Self {
        Self {
            traffic: true,
            registration_delay_polls: 2,
            ..Self::default()
        }
    }
}

/// A message accepted through `AT+CMGS`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentMessage {
    /// Destination as written in the command
    pub to: String,
    /// Body without the Ctrl-Z terminator
    pub body: String,
}

#[derive(Debug, Default)]
struct Shared {
    written: Vec<String>,
    sent: Vec<SentMessage>,
    outbound: VecDeque<u8>,
    interleave: Option<String>,
    in_flight: bool,
    overlaps: u32,
    link_broken: bool,
}

/// Test-side view of a [`SimulatedModem`]
#[derive(Debug, Clone, Default)]
pub struct SimulatorProbe {
    shared: Arc<Mutex<Shared>>,
}

impl SimulatorProbe {
    fn lock(&self) -> MutexGuard<'_, Shared> {
        self.shared.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Every command line written, in order (message bodies excluded)
    pub fn written(&self) -> Vec<String> {
        self.lock().written.clone()
    }

    /// Messages accepted for delivery
    pub fn sent(&self) -> Vec<SentMessage> {
        self.lock().sent.clone()
    }

    /// Commands written while an earlier reply was still unread
    pub fn overlaps(&self) -> u32 {
        self.lock().overlaps
    }

    /// Queue raw bytes for the reader
    pub fn inject(&self, bytes: &[u8]) {
        self.lock().outbound.extend(bytes.iter().copied());
    }

    /// Queue a `+CMT` notification for an incoming message
    pub fn inject_incoming(&self, sender: &str, body: &str) {
        self.inject(incoming_notification(sender, body).as_bytes());
    }

    /// Place `text` inside the next reply, just before its final result line
    pub fn interleave_before_terminal(&self, text: &str) {
        self.lock().interleave = Some(text.to_string());
    }

    /// Make every further read and write fail
    pub fn break_link(&self) {
        self.lock().link_broken = true;
    }
}

fn incoming_notification(sender: &str, body: &str) -> String {
    let stamp = Utc::now().format("%y/%m/%d,%H:%M:%S+00");
    format!("\r\n+CMT: \"{}\",\"\",\"{}\"\r\n{}\r\n", sender, stamp, body)
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Input {
    Command,
    Body { to: String },
}

/// Simulated SIM800-class module
pub struct SimulatedModem {
    profile: SimulatorProfile,
    probe: SimulatorProbe,
    name: String,
    open: bool,
    input: Input,
    partial: Vec<u8>,
    after_cr: bool,
    sim_locked: bool,
    radio_on: bool,
    creg_polls: u32,
    next_reference: u8,
    rng: StdRng,
    next_traffic_at: Option<Instant>,
}

impl SimulatedModem {
    /// Create a module with a fresh probe
    pub fn new(profile: SimulatorProfile) -> Self {
        Self::with_probe(profile, SimulatorProbe::default())
    }

    /// Create a module sharing `probe`, e.g. when reopened by a factory
    pub fn with_probe(profile: SimulatorProfile, probe: SimulatorProbe) -> Self {
        let mut rng = match profile.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        let next_traffic_at = profile
            .traffic
            .then(|| Instant::now() + Duration::from_secs(rng.gen_range(10..20)));
        Self {
            sim_locked: profile.sim_pin.is_some(),
            profile,
            probe,
            name: "simulator".to_string(),
            open: true,
            input: Input::Command,
            partial: Vec::new(),
            after_cr: false,
            radio_on: true,
            creg_polls: 0,
            next_reference: 1,
            rng,
            next_traffic_at,
        }
    }

    /// Probe attached to this module
    pub fn probe(&self) -> SimulatorProbe {
        self.probe.clone()
    }

    fn check_link(&self) -> Result<(), ModemError> {
        if !self.open {
            return Err(ModemError::NotConnected);
        }
        if self.probe.lock().link_broken {
            return Err(ModemError::Transport("simulated link failure".to_string()));
        }
        Ok(())
    }

    fn reply(&mut self, lines: Vec<String>) {
        if !self.profile.responsive || lines.is_empty() {
            return;
        }
        let mut shared = self.probe.lock();
        if shared.in_flight && !shared.outbound.is_empty() {
            shared.overlaps += 1;
        }
        let interleave = shared.interleave.take();
        let last = lines.len() - 1;
        let mut wire = String::new();
        for (i, line) in lines.iter().enumerate() {
            if i == last {
                if let Some(text) = &interleave {
                    wire.push_str(text);
                }
            }
            if line == ">" {
                wire.push_str("\r\n> ");
            } else {
                wire.push_str(&format!("\r\n{}\r\n", line));
            }
        }
        shared.outbound.extend(wire.into_bytes());
        shared.in_flight = true;
    }

    fn accept_command(&mut self, line: &str) {
        let command = line.trim();
        if command.is_empty() {
            return;
        }
        {
            let mut shared = self.probe.lock();
            shared.written.push(command.to_string());
            if self.profile.responsive && self.profile.echo {
                shared.outbound.extend(format!("{}\r", command).into_bytes());
            }
        }
        let mut lines = self.respond(command);
        if self
            .profile
            .stalled
            .iter()
            .any(|prefix| command.starts_with(prefix.as_str()))
        {
            lines.pop();
        }
        self.reply(lines);
    }

    fn respond(&mut self, command: &str) -> Vec<String> {
        let upper = command.to_ascii_uppercase();
        let ok = || vec!["OK".to_string()];

        match upper.as_str() {
            "AT" => ok(),
            "ATE0" => {
                self.profile.echo = false;
                ok()
            }
            "ATE1" => {
                self.profile.echo = true;
                ok()
            }
            "AT+CPIN?" => {
                if !self.profile.sim_inserted {
                    vec!["+CME ERROR: 10".to_string()]
                } else if self.sim_locked {
                    vec!["+CPIN: SIM PIN".to_string(), "OK".to_string()]
                } else {
                    vec!["+CPIN: READY".to_string(), "OK".to_string()]
                }
            }
            "AT+CREG?" => {
                let code = if !self.radio_on || !self.profile.sim_inserted || self.sim_locked {
                    0
                } else if self.creg_polls < self.profile.registration_delay_polls {
                    self.creg_polls += 1;
                    2
                } else {
                    self.profile.registration
                };
                vec![format!("+CREG: 0,{}", code), "OK".to_string()]
            }
            "AT+CMGF=1" => ok(),
            "AT+CSQ" => {
                let rssi = if self.radio_on {
                    self.profile.signal.unwrap_or(99)
                } else {
                    99
                };
                vec![format!("+CSQ: {},0", rssi), "OK".to_string()]
            }
            "AT+CFUN?" => vec![
                format!("+CFUN: {}", u8::from(self.radio_on)),
                "OK".to_string(),
            ],
            "AT+CFUN=0" => {
                self.radio_on = false;
                ok()
            }
            "AT+CFUN=1" => {
                self.radio_on = true;
                ok()
            }
            "AT+COPS=?" if self.radio_on => vec![
                "+COPS: (2,\"Grameenphone\",\"GP\",\"47001\"),(1,\"Robi\",\"Robi\",\"47002\"),,(0-4),(0-2)"
                    .to_string(),
                "OK".to_string(),
            ],
            "AT+COPS=0" => ok(),
            "ATH" => ok(),
            _ => self.respond_with_arguments(command, &upper),
        }
    }

    fn respond_with_arguments(&mut self, command: &str, upper: &str) -> Vec<String> {
        if let Some(pin) = upper.strip_prefix("AT+CPIN=") {
            let pin = pin.trim_matches('"');
            return match &self.profile.sim_pin {
                Some(expected) if self.sim_locked && expected == pin => {
                    self.sim_locked = false;
                    vec!["OK".to_string()]
                }
                _ => vec!["+CME ERROR: 16".to_string()],
            };
        }

        if let Some(mode) = upper.strip_prefix("AT+CNMI=") {
            let accepted = self.profile.notification_modes.is_empty()
                || self.profile.notification_modes.iter().any(|m| m == mode);
            return vec![if accepted { "OK" } else { "ERROR" }.to_string()];
        }

        if upper.starts_with("AT+CMGS=") {
            let to = command["AT+CMGS=".len()..].trim_matches('"').to_string();
            if !self.profile.send_prompt {
                return vec!["+CMS ERROR: 500".to_string()];
            }
            self.input = Input::Body { to };
            return vec![">".to_string()];
        }

        if let Some(number) = upper.strip_prefix("ATD") {
            let registered = matches!(self.profile.registration, 1 | 5)
                && self.radio_on
                && !number.is_empty();
            return vec![if registered { "OK" } else { "NO CARRIER" }.to_string()];
        }

        vec!["ERROR".to_string()]
    }

    fn accept_body(&mut self, to: String, body: &[u8]) {
        let body = String::from_utf8_lossy(body).into_owned();
        self.input = Input::Command;
        if !self.profile.send_confirms {
            self.reply(vec!["+CMS ERROR: 304".to_string()]);
            return;
        }
        self.probe.lock().sent.push(SentMessage { to, body });
        let reference = self.next_reference;
        self.next_reference = self.next_reference.wrapping_add(1).max(1);
        self.reply(vec![format!("+CMGS: {}", reference), "OK".to_string()]);
    }

    fn emit_traffic(&mut self) {
        let Some(due) = self.next_traffic_at else {
            return;
        };
        let now = Instant::now();
        if now < due {
            return;
        }
        let sender = DEMO_SENDERS[self.rng.gen_range(0..DEMO_SENDERS.len())];
        let body = DEMO_MESSAGES[self.rng.gen_range(0..DEMO_MESSAGES.len())];
        tracing::debug!(sender, body, "simulated incoming message");
        self.probe.inject_incoming(sender, body);
        self.next_traffic_at = Some(now + Duration::from_secs(self.rng.gen_range(20..45)));
    }
}

impl Transport for SimulatedModem {
    fn write_bytes(&mut self, data: &[u8]) -> Result<(), ModemError> {
        self.check_link()?;
        for &byte in data {
            // LF of a CRLF pair belongs to the command line, never the body
            let continues_crlf = std::mem::replace(&mut self.after_cr, byte == b'\r');
            if continues_crlf && byte == b'\n' {
                continue;
            }
            match self.input.clone() {
                Input::Body { to } => {
                    if byte == CTRL_Z {
                        let body = std::mem::take(&mut self.partial);
                        self.accept_body(to, &body);
                    } else {
                        self.partial.push(byte);
                    }
                }
                Input::Command => {
                    if byte == b'\r' || byte == b'\n' {
                        let line = std::mem::take(&mut self.partial);
                        self.accept_command(&String::from_utf8_lossy(&line));
                    } else {
                        self.partial.push(byte);
                    }
                }
            }
        }
        Ok(())
    }

    fn read_available(&mut self) -> Result<Vec<u8>, ModemError> {
        self.check_link()?;
        self.emit_traffic();

        let mut shared = self.probe.lock();
        let take = self
            .profile
            .chunk_size
            .unwrap_or(usize::MAX)
            .min(shared.outbound.len());
        let bytes: Vec<u8> = shared.outbound.drain(..take).collect();
        if shared.outbound.is_empty() {
            shared.in_flight = false;
        }
        Ok(bytes)
    }

    fn close(&mut self) {
        self.open = false;
    }

    fn is_open(&self) -> bool {
        self.open
    }

    fn name(&self) -> &str {
        &self.name
    }
}
