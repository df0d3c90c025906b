//! Interactive console: send a message, place a test call, quit

use aicell_core::modem::Modem;
use anyhow::Result;
use std::io::Write;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader, Lines, Stdin};

use crate::config::ConsoleConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Command {
    Send,
    Call,
    Quit,
    Unknown,
}

impl Command {
    fn parse(input: &str) -> Self {
        match input.trim().to_lowercase().as_str() {
            "s" => Self::Send,
            "c" => Self::Call,
            "q" => Self::Quit,
            _ => Self::Unknown,
        }
    }
}

fn prompt(text: &str) -> Result<()> {
    print!("{}", text);
    std::io::stdout().flush()?;
    Ok(())
}

/// The entered value, or `default` when left empty
fn or_default(input: Option<String>, default: &str) -> String {
    input
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| default.to_string())
}

async fn ask(lines: &mut Lines<BufReader<Stdin>>, text: &str) -> Result<Option<String>> {
    prompt(text)?;
    Ok(lines.next_line().await?)
}

/// Run the prompt until `q`, end of input or Ctrl-C
pub async fn run(modem: &Modem, config: &ConsoleConfig) -> Result<()> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    println!("\n{}", "=".repeat(50));
    println!("READY! Type commands below:");
    println!("{}", "=".repeat(50));

    loop {
        let input = tokio::select! {
            line = ask(&mut lines, "\nEnter (s/c/q): ") => line?,
            _ = tokio::signal::ctrl_c() => {
                println!("\nStopped by user.");
                break;
            }
        };
        let Some(input) = input else { break };

        match Command::parse(&input) {
            Command::Quit => {
                println!("Goodbye!");
                break;
            }
            Command::Send => {
                let phone = ask(&mut lines, &format!("Phone (default {}): ", config.default_phone)).await?;
                let phone = or_default(phone, &config.default_phone);
                let message = ask(&mut lines, "Message: ").await?.unwrap_or_default();
                let message = message.trim();
                if message.is_empty() {
                    println!("Empty message!");
                    continue;
                }
                match modem.send_sms(&phone, message).await {
                    Ok(outcome) if outcome.success => println!("SMS sent to {}", outcome.destination),
                    Ok(outcome) => println!("SMS failed: {}", outcome.detail),
                    Err(e) => println!("Error: {}", e),
                }
            }
            Command::Call => {
                let phone = ask(&mut lines, &format!("Call (default {}): ", config.default_phone)).await?;
                let phone = or_default(phone, &config.default_phone);
                println!("Calling {} for {} s...", phone, config.call_hold_secs);
                match modem
                    .dial(&phone, Duration::from_secs(config.call_hold_secs))
                    .await
                {
                    Ok(call) if call.connected => println!("Call ended."),
                    Ok(call) => println!("Call failed: {}", call.result),
                    Err(e) => println!("Error: {}", e),
                }
            }
            Command::Unknown => println!("Use: s = send, c = call, q = quit"),
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_commands() {
        assert_eq!(Command::parse("s"), Command::Send);
        assert_eq!(Command::parse(" C \n"), Command::Call);
        assert_eq!(Command::parse("Q"), Command::Quit);
        assert_eq!(Command::parse("send"), Command::Unknown);
        assert_eq!(Command::parse(""), Command::Unknown);
    }

    #[test]
    fn test_default_phone() {
        assert_eq!(or_default(Some("  ".to_string()), "+880"), "+880");
        assert_eq!(or_default(None, "+880"), "+880");
        assert_eq!(or_default(Some(" 017 ".to_string()), "+880"), "017");
    }
}
