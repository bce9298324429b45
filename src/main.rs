//! vv-speaker: VOICEVOX speaker box with LLM replies, streaming playback
//! and a serialized request queue.

mod api;
mod config;
mod error;
mod lock;
mod mcp_server;
mod reply;
mod service;
mod speaker_box;
mod speech;
mod text;

#[cfg(test)]
mod testing;

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use serde_json::json;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use crate::config::Config;
use crate::reply::Mode;
use crate::service::SpeakService;
use crate::speaker_box::{SpeakRequest, SpeakerBox};
use crate::speech::speakers::SpeakerRef;

#[derive(Parser, Debug)]
#[command(name = "vv-speaker", about = "VOICEVOX speaker box")]
struct Args {
    /// Path to config.yaml
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable verbose (debug) logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Read one request per stdin line, print one JSON result per line
    Cli {
        #[arg(long, value_enum, default_value_t = Mode::Llm)]
        mode: Mode,

        /// Generate replies without playing audio
        #[arg(long)]
        dry_run: bool,
    },
    /// Serve the HTTP API (and the MCP server when enabled)
    Api {
        #[arg(long)]
        host: Option<String>,

        #[arg(long)]
        port: Option<u16>,
    },
    /// Stream text sentence by sentence, without reply generation
    Say {
        #[arg(long)]
        text: String,

        /// Voice name or style id (default: configured speaker)
        #[arg(long)]
        speaker: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    let config = Arc::new(Config::load(args.config.as_deref())?);

    let level = if args.verbose {
        "debug"
    } else {
        config.log_level.as_str()
    };
    let filter = EnvFilter::try_new(format!("{level},rmcp=warn,hyper=warn,reqwest=warn"))
        .unwrap_or_else(|_| EnvFilter::new("info,rmcp=warn,hyper=warn,reqwest=warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    info!(
        "vv-speaker starting (voicevox: {}, speaker: {}, stream: {})",
        config.voicevox.url, config.voicevox.speaker_name, config.playback.stream
    );

    let speaker_box = Arc::new(SpeakerBox::new(config.clone())?);

    match args.command {
        Command::Cli { mode, dry_run } => {
            let service = SpeakService::start(speaker_box, config.queue.max);
            run_cli(&service, mode, dry_run).await?;
        }
        Command::Api { host, port } => {
            let service = Arc::new(SpeakService::start(speaker_box, config.queue.max));
            if config.mcp.enabled {
                mcp_server::start_mcp_server(config.mcp.port, service.clone()).await;
            }
            let host = host.unwrap_or_else(|| config.api.host.clone());
            let port = port.unwrap_or(config.api.port);
            api::serve(api::ApiState { service }, &host, port).await?;
        }
        Command::Say { text, speaker } => {
            let speaker = speaker.map(SpeakerRef::Name);
            speaker_box.say(&text, speaker.as_ref()).await?;
        }
    }

    Ok(())
}

/// Line mode: each non-blank stdin line is one request.
async fn run_cli(service: &SpeakService, mode: Mode, dry_run: bool) -> error::Result<()> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdout = tokio::io::stdout();

    while let Some(line) = lines.next_line().await? {
        let text = line.trim();
        if text.is_empty() {
            continue;
        }

        let request = SpeakRequest {
            dry_run,
            ..SpeakRequest::new(text, mode)
        };
        let output = match service.speak(request).await {
            Ok(result) => serde_json::to_string(&result)?,
            Err(e) => {
                warn!("Request failed: {e}");
                json!({ "error": e.to_string() }).to_string()
            }
        };
        stdout.write_all(output.as_bytes()).await?;
        stdout.write_all(b"\n").await?;
        stdout.flush().await?;
    }

    info!("End of input");
    Ok(())
}
