//! AiCell SMS hotline gateway

mod config;
mod console;
mod http;
mod logging;
mod reply;
mod session;

use aicell_core::modem::Modem;
use aicell_core::sms::Dispatcher;
use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use config::AppConfig;

#[derive(Parser, Debug)]
#[command(name = "aicell", version, about = "SMS hotline gateway for AT-command cellular modems")]
struct Cli {
    /// Configuration file
    #[arg(short, long, global = true, default_value = "aicell.json")]
    config: PathBuf,

    /// Serial device (skips port discovery)
    #[arg(short, long, global = true)]
    device: Option<String>,

    /// Baud rate
    #[arg(short, long, global = true)]
    baud: Option<u32>,

    /// Run against the built-in simulated modem
    #[arg(long, global = true)]
    demo: bool,

    /// Debug logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Answer incoming messages and serve the status page
    Serve,
    /// Interactive send/call prompt
    Console,
    /// Print a network diagnostic report
    Diagnose {
        /// Cycle the radio and wait for registration
        #[arg(long)]
        force_registration: bool,

        /// Send a test message to this number afterwards
        #[arg(long)]
        send_to: Option<String>,

        /// Text of the test message
        #[arg(long, default_value = "Test from AiCell")]
        message: String,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    logging::init(cli.verbose);

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("{:#}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<()> {
    let mut config = AppConfig::load(&cli.config)?;
    if let Some(device) = cli.device {
        config.modem.device = Some(device);
    }
    if let Some(baud) = cli.baud {
        config.modem.baud_rate = baud;
    }

    let modem = session::open_modem(&config.modem, cli.demo)?;
    let result = match cli.command {
        Command::Serve => serve(&modem, &config).await,
        Command::Console => console(&modem, &config).await,
        Command::Diagnose {
            force_registration,
            send_to,
            message,
        } => diagnose(&modem, force_registration, send_to, &message).await,
    };
    modem.close().await;
    result
}

async fn serve(modem: &Modem, config: &AppConfig) -> Result<()> {
    println!("AiCell SMS AI Server Starting...");
    println!("Hotline: {}", config.server.hotline);

    let pipeline = Arc::new(reply::ReplyPipeline::new(config.reply.clone())?);
    if config.reply.api_key.is_none() {
        tracing::info!("no reply API key; keyword and offline replies only");
    }
    let handler = Arc::new(reply::AutoReply::new(modem.clone(), pipeline));
    let (mut monitor, _report) = session::start(modem, Dispatcher::new(handler)).await?;

    let listener = http::bind_first_free(&config.server)?;
    let state = Arc::new(http::HttpState {
        modem: modem.clone(),
        hotline: config.server.hotline.clone(),
    });
    println!("SEND SMS NOW TO TEST!");

    let (stop, stopped) = tokio::sync::oneshot::channel::<()>();
    let server = tokio::spawn(http::serve(listener, state, async move {
        let _ = stopped.await;
    }));

    let exited = tokio::select! {
        r = monitor.wait() => Some(r),
        _ = tokio::signal::ctrl_c() => None,
    };
    let outcome = match exited {
        Some(r) => r.context("modem monitor stopped"),
        None => {
            tracing::info!("shutting down");
            monitor.shutdown().await.context("stopping monitor")
        }
    };

    let _ = stop.send(());
    server.await.context("HTTP server task")??;
    outcome
}

async fn console(modem: &Modem, config: &AppConfig) -> Result<()> {
    let handler = Arc::new(reply::ConsoleReply::new(modem.clone(), &config.console));
    let (monitor, _report) = session::start(modem, Dispatcher::new(handler)).await?;
    let result = console::run(modem, &config.console).await;
    monitor.shutdown().await?;
    result
}

async fn diagnose(
    modem: &Modem,
    force_registration: bool,
    send_to: Option<String>,
    message: &str,
) -> Result<()> {
    let monitor = modem.start_monitor(Dispatcher::logging_only());

    let result = async {
        let report = modem.diagnose().await?;
        println!("\n{}", report);

        if force_registration {
            let registered = modem.force_registration().await?;
            println!(
                "Registration {}",
                if registered { "succeeded" } else { "failed" }
            );
        }

        if let Some(number) = send_to {
            let outcome = modem.send_sms(&number, message).await?;
            if outcome.success {
                println!("Test message sent to {}", outcome.destination);
            } else {
                println!("Test message failed: {}", outcome.detail);
            }
        }
        anyhow::Ok(())
    }
    .await;

    monitor.shutdown().await?;
    result
}
