//! Command engine behaviour against the simulated modem

#[cfg(test)]
mod tests {
    use aicell_core::config::ModemConfig;
    use aicell_core::modem::Modem;
    use aicell_core::protocol::{ModemError, Terminal};
    use aicell_core::simulator::{SimulatedModem, SimulatorProbe, SimulatorProfile};
    use aicell_core::sms::{Dispatcher, InboundHandler, InboundMessage};
    use async_trait::async_trait;
    use pretty_assertions::assert_eq;
    use std::sync::Arc;
    use std::time::Duration;
    use tokio::sync::Mutex;

    fn quiet_config() -> ModemConfig {
        ModemConfig {
            health_check_secs: 0,
            ..ModemConfig::default()
        }
    }

    fn simulated(profile: SimulatorProfile) -> (Modem, SimulatorProbe) {
        let sim = SimulatedModem::new(SimulatorProfile {
            echo: false,
            ..profile
        });
        let probe = sim.probe();
        (Modem::with_transport(Box::new(sim), None, &quiet_config()), probe)
    }

    #[derive(Default)]
    struct Collect {
        messages: Mutex<Vec<InboundMessage>>,
    }

    #[async_trait]
    impl InboundHandler for Collect {
        async fn handle(&self, message: InboundMessage) {
            self.messages.lock().await.push(message);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_simple_command() {
        let (modem, _probe) = simulated(SimulatorProfile::default());
        let monitor = modem.start_monitor(Dispatcher::logging_only());

        let result = modem.engine().command("AT+CSQ").await.unwrap();
        assert_eq!(result.lines, vec!["+CSQ: 18,0", "OK"]);
        assert_eq!(result.matched, Terminal::Ok);

        let rejected = modem.engine().command("AT+NOPE").await.unwrap();
        assert_eq!(rejected.matched, Terminal::Error);
        assert!(!rejected.is_ok());

        monitor.shutdown().await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_callers_never_overlap() {
        let (modem, probe) = simulated(SimulatorProfile::default());
        let monitor = modem.start_monitor(Dispatcher::logging_only());

        let tasks: Vec<_> = (0..12)
            .map(|i| {
                let modem = modem.clone();
                tokio::spawn(async move {
                    let command = if i % 2 == 0 { "AT+CSQ" } else { "AT+CREG?" };
                    (command, modem.engine().command(command).await)
                })
            })
            .collect();

        for task in tasks {
            let (command, result) = task.await.unwrap();
            let result = result.unwrap();
            assert!(result.is_ok());
            // Each caller sees only its own reply
            let expected = if command == "AT+CSQ" { "+CSQ:" } else { "+CREG:" };
            assert_eq!(result.lines.len(), 2);
            assert!(result.lines[0].starts_with(expected));
        }

        assert_eq!(probe.written().len(), 12);
        assert_eq!(probe.overlaps(), 0);
        monitor.shutdown().await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_keeps_partial_output() {
        let (modem, _probe) = simulated(SimulatorProfile {
            stalled: vec!["AT+CSQ".to_string()],
            ..SimulatorProfile::default()
        });
        let monitor = modem.start_monitor(Dispatcher::logging_only());

        let err = modem
            .execute("AT+CSQ", Duration::from_secs(1))
            .await
            .unwrap_err();
        match err {
            ModemError::Timeout {
                command, partial, ..
            } => {
                assert_eq!(command, "AT+CSQ");
                assert_eq!(partial, vec!["+CSQ: 18,0"]);
            }
            other => panic!("expected timeout, got {:?}", other),
        }

        // The engine is free again afterwards
        assert!(modem.engine().command("AT").await.unwrap().is_ok());
        monitor.shutdown().await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_silent_modem_times_out() {
        let (modem, _probe) = simulated(SimulatorProfile {
            responsive: false,
            ..SimulatorProfile::default()
        });
        let monitor = modem.start_monitor(Dispatcher::logging_only());

        let err = modem.execute("AT", Duration::from_millis(500)).await.unwrap_err();
        assert!(matches!(err, ModemError::Timeout { ref partial, .. } if partial.is_empty()));
        assert!(!err.is_transport());
        monitor.shutdown().await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_interleaved_notification_is_not_part_of_reply() {
        let (modem, probe) = simulated(SimulatorProfile::default());
        let collect = Arc::new(Collect::default());
        let monitor = modem.start_monitor(Dispatcher::new(collect.clone()));

        probe.interleave_before_terminal(
            "\r\n+CMT: \"+8801712345678\",\"\",\"26/10/19,12:00:00+24\"\r\nhello there\r\n",
        );
        let result = modem.engine().command("AT+CSQ").await.unwrap();
        assert_eq!(result.lines, vec!["+CSQ: 18,0", "OK"]);

        tokio::time::sleep(Duration::from_secs(1)).await;
        let messages = collect.messages.lock().await;
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].sender, "+8801712345678");
        assert_eq!(messages[0].body, "hello there");
        drop(messages);

        monitor.shutdown().await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_byte_at_a_time_delivery() {
        let (modem, probe) = simulated(SimulatorProfile {
            chunk_size: Some(1),
            ..SimulatorProfile::default()
        });
        let collect = Arc::new(Collect::default());
        let monitor = modem.start_monitor(Dispatcher::new(collect.clone()));

        let result = modem.engine().command("AT+CREG?").await.unwrap();
        assert_eq!(result.lines, vec!["+CREG: 0,1", "OK"]);

        probe.inject_incoming("+8801898765432", "hi");
        tokio::time::sleep(Duration::from_secs(5)).await;

        let messages = collect.messages.lock().await;
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].body, "hi");
        drop(messages);

        monitor.shutdown().await.unwrap();
    }
}
