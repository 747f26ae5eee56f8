use std::path::PathBuf;

use anyhow::anyhow;
use clap::{Parser, Subcommand};
use tokio::io::{AsyncBufReadExt, BufReader};

use voicebridge::core::translate::TextTranslator;
use voicebridge::{
    AppConfig, MicrophoneCapture, RealtimeGateway, SpeakerPlayback, TranslationSession,
};

/// VoiceBridge - real-time voice translation client
#[derive(Parser, Debug)]
#[command(name = "voicebridge")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Path to configuration file (YAML)
    #[arg(short = 'c', long = "config", value_name = "FILE")]
    config: Option<PathBuf>,

    /// Subcommand to run
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Translate a piece of text over plain HTTP and exit
    Translate {
        /// Text to translate
        text: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file if it exists (must be done before config loading)
    let _ = dotenvy::dotenv();

    // Initialize tracing
    tracing_subscriber::fmt::init();

    // Initialize crypto provider for TLS connections
    // This must be done before any TLS connections are attempted
    rustls::crypto::ring::default_provider()
        .install_default()
        .map_err(|_| anyhow!("Failed to install default crypto provider"))?;

    // Parse CLI arguments
    let cli = Cli::parse();

    // Load configuration from file or environment
    let config = if let Some(config_path) = cli.config {
        println!("Loading configuration from {}", config_path.display());
        AppConfig::from_file(&config_path)?
    } else {
        AppConfig::from_env()?
    };

    if let Some(Commands::Translate { text }) = cli.command {
        let endpoint = config
            .translate_url
            .clone()
            .ok_or_else(|| anyhow!("TRANSLATE_URL is not configured"))?;
        let translator = TextTranslator::new(reqwest::Client::new(), endpoint);
        let translation = translator
            .translate(&text, &config.source_language, &config.target_language)
            .await?;
        println!("{}", translation.translated_text);
        return Ok(());
    }

    let gateway = RealtimeGateway::new(config.gateway_config());
    let capture = MicrophoneCapture::new();
    let playback = SpeakerPlayback::new();
    let (session, mut snapshots) =
        TranslationSession::spawn(gateway, capture, playback, config.session_tuning());

    // Print every state change until the session ends.
    let printer = tokio::spawn(async move {
        while snapshots.changed().await.is_ok() {
            let snapshot = snapshots.borrow_and_update().clone();
            if let Some(error) = &snapshot.error {
                eprintln!("! {}", error);
            }
            let state = if snapshot.is_recording {
                "recording"
            } else if snapshot.is_translating {
                "translating"
            } else if snapshot.is_playing {
                "playing"
            } else {
                "idle"
            };
            if !snapshot.current_text.is_empty() || !snapshot.translated_text.is_empty() {
                println!(
                    "[{}] {} -> {}",
                    state, snapshot.current_text, snapshot.translated_text
                );
            } else {
                println!("[{}]", state);
            }
        }
    });

    println!("Commands: start | stop | say <text> | replay | quit");
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        let line = line.trim();
        match line {
            "" => {}
            "start" => session.start().await,
            "stop" => session.stop().await,
            "replay" => session.speak(None).await,
            "quit" | "exit" => break,
            _ => {
                if let Some(text) = line.strip_prefix("say ") {
                    session.speak(Some(text.to_string())).await;
                } else {
                    println!("Unknown command: {}", line);
                }
            }
        }
    }

    session.shutdown().await;
    printer.abort();
    Ok(())
}
