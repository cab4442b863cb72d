//! Idobata demo client.
//!
//! Seeds an in-memory chat backend, enters a room and walks through history
//! paging, optimistic sends, a dropped connection and voice playback.
//!
//! Run with:
//! ```not_rust
//! cargo run --bin idobata-client -- --room lobby --messages 3
//! cargo run --bin idobata-client -- -s settings.toml -l debug
//! ```

use std::path::PathBuf;

use clap::Parser;

use idobata_client::{DemoOptions, run_demo};
use idobata_core::settings::Settings;
use idobata_shared::logger::setup_logger;

#[derive(Parser, Debug)]
#[command(name = "idobata-client")]
#[command(about = "Scripted Idobata chat session against an in-memory backend", long_about = None)]
struct Args {
    /// Settings file (TOML); defaults and IDOBATA__* variables apply without it
    #[arg(short = 's', long)]
    settings: Option<PathBuf>,

    /// Room to enter
    #[arg(short = 'r', long, default_value = "lobby")]
    room: String,

    /// Number of messages to send after entering
    #[arg(short = 'm', long, default_value_t = 3)]
    messages: usize,

    /// Display name of the demo user
    #[arg(short = 'u', long, default_value = "alice")]
    user: String,

    /// Log level; overrides the settings file, `RUST_LOG` overrides both
    #[arg(short = 'l', long)]
    log_level: Option<String>,
}

#[tokio::main]
async fn main() {
    let args = Args::parse();

    let settings = match Settings::load(args.settings.as_deref()) {
        Ok(settings) => settings,
        Err(e) => {
            eprintln!("{}", e);
            std::process::exit(2);
        }
    };

    // Initialize tracing
    let level = args
        .log_level
        .clone()
        .unwrap_or_else(|| settings.log.filter.clone());
    setup_logger(env!("CARGO_BIN_NAME"), &level);

    let options = DemoOptions {
        room: args.room,
        messages: args.messages,
        user: args.user,
    };
    if let Err(e) = run_demo(&settings, options).await {
        tracing::error!("Client error: {}", e);
        std::process::exit(1);
    }
}
