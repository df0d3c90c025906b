//! Voice dial test

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::protocol::{CommandEngine, ModemError, Terminal};

/// Result of a dial attempt
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallOutcome {
    /// Whether the modem accepted the dial and the call was held
    pub connected: bool,
    /// Final result line reported by the modem
    pub result: String,
}

/// Dial `number`, hold for `hold`, then hang up.
///
/// `ATD<number>;` (the semicolon selects a voice call). Busy, no carrier
/// and the other dial results end the attempt without holding.
pub async fn dial(
    engine: &CommandEngine,
    number: &str,
    hold: Duration,
) -> Result<CallOutcome, ModemError> {
    tracing::info!(number, hold_secs = hold.as_secs(), "dialing");
    let dialed = match engine
        .execute(&format!("ATD{};", number), Duration::from_secs(5), Terminal::DIAL)
        .await
    {
        Ok(result) => result,
        Err(e) if e.is_transport() => return Err(e),
        Err(e) => {
            return Ok(CallOutcome {
                connected: false,
                result: e.to_string(),
            })
        }
    };

    let result = dialed.lines.last().cloned().unwrap_or_default();
    if !dialed.is_ok() {
        tracing::warn!(number, "call not placed: {}", result);
        return Ok(CallOutcome {
            connected: false,
            result,
        });
    }

    tokio::time::sleep(hold).await;
    if let Err(e) = engine.command("ATH").await {
        if e.is_transport() {
            return Err(e);
        }
        tracing::warn!("hang-up failed: {}", e);
    }
    tracing::info!(number, "call ended");

    Ok(CallOutcome {
        connected: true,
        result,
    })
}
