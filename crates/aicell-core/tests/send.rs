//! Message send protocol against the simulated modem

#[cfg(test)]
mod tests {
    use aicell_core::config::ModemConfig;
    use aicell_core::modem::Modem;
    use aicell_core::simulator::{SentMessage, SimulatedModem, SimulatorProbe, SimulatorProfile};
    use aicell_core::sms::{Dispatcher, MAX_MESSAGE_CHARS};
    use pretty_assertions::assert_eq;

    fn simulated(profile: SimulatorProfile) -> (Modem, SimulatorProbe) {
        let config = ModemConfig {
            health_check_secs: 0,
            ..ModemConfig::default()
        };
        let sim = SimulatedModem::new(profile);
        let probe = sim.probe();
        (Modem::with_transport(Box::new(sim), None, &config), probe)
    }

    #[tokio::test(start_paused = true)]
    async fn test_local_number_is_normalized_and_sent() {
        let (modem, probe) = simulated(SimulatorProfile::default());
        let monitor = modem.start_monitor(Dispatcher::logging_only());

        let outcome = modem.send_sms("01712345678", "hello").await.unwrap();
        assert!(outcome.success);
        assert_eq!(outcome.destination, "+8801712345678");
        assert_eq!(outcome.reference, Some(1));

        assert_eq!(
            probe.sent(),
            vec![SentMessage {
                to: "+8801712345678".to_string(),
                body: "hello".to_string(),
            }]
        );
        let written = probe.written();
        assert_eq!(&written[written.len() - 2..], ["AT+CMGF=1", "AT+CMGS=\"+8801712345678\""]);

        let second = modem.send_sms("+8801712345678", "again").await.unwrap();
        assert_eq!(second.reference, Some(2));
        monitor.shutdown().await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_long_body_is_truncated() {
        let (modem, probe) = simulated(SimulatorProfile::default());
        let monitor = modem.start_monitor(Dispatcher::logging_only());

        let body = "x".repeat(300);
        assert!(modem.send_sms("8801712345678", &body).await.unwrap().success);

        let sent = probe.sent();
        assert_eq!(sent[0].to, "+8801712345678");
        assert_eq!(sent[0].body.chars().count(), MAX_MESSAGE_CHARS);
        assert!(sent[0].body.ends_with("..."));
        monitor.shutdown().await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_full_length_body_arrives_unchanged() {
        let (modem, probe) = simulated(SimulatorProfile::default());
        let monitor = modem.start_monitor(Dispatcher::logging_only());

        let body = "y".repeat(MAX_MESSAGE_CHARS);
        assert!(modem.send_sms("01712345678", &body).await.unwrap().success);
        assert!(modem.send_sms("01712345678", "hi").await.unwrap().success);

        let bodies: Vec<String> = probe.sent().into_iter().map(|m| m.body).collect();
        assert_eq!(bodies, vec![body, "hi".to_string()]);
        monitor.shutdown().await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_missing_prompt_is_a_failed_outcome() {
        let (modem, probe) = simulated(SimulatorProfile {
            send_prompt: false,
            ..SimulatorProfile::default()
        });
        let monitor = modem.start_monitor(Dispatcher::logging_only());

        let outcome = modem.send_sms("01712345678", "hello").await.unwrap();
        assert!(!outcome.success);
        assert!(outcome.detail.contains("prompt"));
        assert!(probe.sent().is_empty());
        monitor.shutdown().await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_rejected_body_is_a_failed_outcome() {
        let (modem, probe) = simulated(SimulatorProfile {
            send_confirms: false,
            ..SimulatorProfile::default()
        });
        let monitor = modem.start_monitor(Dispatcher::logging_only());

        let outcome = modem.send_sms("01712345678", "hello").await.unwrap();
        assert!(!outcome.success);
        assert_eq!(outcome.reference, None);
        assert!(outcome.detail.contains("+CMS ERROR"));
        assert!(probe.sent().is_empty());
        monitor.shutdown().await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_silent_modem_is_a_failed_outcome() {
        let (modem, _probe) = simulated(SimulatorProfile {
            responsive: false,
            ..SimulatorProfile::default()
        });
        let monitor = modem.start_monitor(Dispatcher::logging_only());

        let outcome = modem.send_sms("01712345678", "hello").await.unwrap();
        assert!(!outcome.success);
        monitor.shutdown().await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_sends_stay_in_order() {
        let (modem, probe) = simulated(SimulatorProfile {
            echo: false,
            ..SimulatorProfile::default()
        });
        let monitor = modem.start_monitor(Dispatcher::logging_only());

        let tasks: Vec<_> = (0..4)
            .map(|i| {
                let modem = modem.clone();
                tokio::spawn(async move { modem.send_sms("01712345678", &format!("m{}", i)).await })
            })
            .collect();
        for task in tasks {
            assert!(task.await.unwrap().unwrap().success);
        }

        // Every CMGS is followed by its own body before the next command
        assert_eq!(probe.sent().len(), 4);
        assert_eq!(probe.overlaps(), 0);
        let written = probe.written();
        assert_eq!(written.len(), 8);
        for pair in written.chunks(2) {
            assert_eq!(pair[0], "AT+CMGF=1");
            assert!(pair[1].starts_with("AT+CMGS="));
        }
        monitor.shutdown().await.unwrap();
    }
}
