use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, bail};
use bytes::Bytes;
use clap::{Parser, Subcommand};
use tokio::sync::mpsc;
use tracing::info;

use waav_session::{
    ClientConfig, ControlAction, EventKind, SessionError, SessionEvent, VoiceSession,
    WebSocketTransport, protocol,
};

/// WaaV Session - real-time voice session client
#[derive(Parser, Debug)]
#[command(name = "waav-session")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Path to configuration file (YAML)
    #[arg(short = 'c', long = "config", value_name = "FILE")]
    config: Option<PathBuf>,

    /// Subcommand to run
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Open a session, optionally stream a WAV file and send text, and log every event
    Connect {
        /// Endpoint URL (ws:// or wss://); defaults to ENDPOINT_URL
        #[arg(short = 'e', long = "endpoint")]
        endpoint: Option<String>,

        /// 16-bit PCM WAV file to stream as audio frames
        #[arg(short = 'a', long = "audio", value_name = "FILE")]
        audio: Option<PathBuf>,

        /// Audio chunk length in milliseconds
        #[arg(long = "chunk-ms", default_value_t = 20)]
        chunk_ms: u32,

        /// Text message to send after the audio
        #[arg(short = 't', long = "text")]
        text: Option<String>,

        /// Seconds to stay connected after sending; Ctrl-C ends early
        #[arg(long = "linger", default_value_t = 10)]
        linger_secs: u64,
    },

    /// Decode a hex-encoded frame and print the message
    Decode {
        /// Frame bytes as hex, e.g. "0301"
        hex: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file if it exists (must be done before config loading)
    let _ = dotenvy::dotenv();

    // Initialize tracing
    tracing_subscriber::fmt::init();

    // Initialize crypto provider for wss:// connections
    rustls::crypto::ring::default_provider()
        .install_default()
        .map_err(|_| anyhow!("Failed to install default crypto provider"))?;

    let cli = Cli::parse();

    match cli.command {
        Commands::Decode { hex } => decode_frame(&hex),
        Commands::Connect {
            endpoint,
            audio,
            chunk_ms,
            text,
            linger_secs,
        } => {
            let config = if let Some(config_path) = cli.config {
                println!("Loading configuration from {}", config_path.display());
                ClientConfig::from_file(&config_path)?
            } else {
                ClientConfig::from_env()?
            };

            let endpoint = endpoint
                .or_else(|| config.endpoint_url.clone())
                .ok_or_else(|| anyhow!("No endpoint given; pass --endpoint or set ENDPOINT_URL"))?;

            let options = ConnectOptions {
                endpoint,
                audio,
                chunk_ms,
                text,
                linger: Duration::from_secs(linger_secs),
            };
            connect(&config, options).await
        }
    }
}

fn decode_frame(hex_frame: &str) -> anyhow::Result<()> {
    let cleaned: String = hex_frame.chars().filter(|c| !c.is_whitespace()).collect();
    let bytes = hex::decode(&cleaned).map_err(|e| anyhow!("Invalid hex: {}", e))?;
    let message = protocol::decode_slice(&bytes)?;
    println!("{message:?}");
    Ok(())
}

struct ConnectOptions {
    endpoint: String,
    audio: Option<PathBuf>,
    chunk_ms: u32,
    text: Option<String>,
    linger: Duration,
}

async fn connect(config: &ClientConfig, options: ConnectOptions) -> anyhow::Result<()> {
    let mut transport = WebSocketTransport::new();
    if let Some(token) = config.auth_token.as_deref() {
        if let Ok(url) = waav_session::utils::validate_endpoint(&options.endpoint) {
            waav_session::utils::url_validation::warn_if_insecure(&url, true);
        }
        transport = transport.with_auth_token(token);
    }

    let session = VoiceSession::new(config.session.clone(), Arc::new(transport))?;
    info!(session_id = %session.session_id(), "Session created");

    session.on_any(|event| {
        match event {
            SessionEvent::AudioReceived { data } => info!(bytes = data.len(), "audio received"),
            other => info!(event = %other.kind(), "{:?}", other),
        }
        Ok(())
    });

    // Signals the CLI waits on.
    let (signal_tx, mut signals) = mpsc::unbounded_channel::<SessionEvent>();
    for kind in [
        EventKind::SessionReady,
        EventKind::SessionClosed,
        EventKind::QueueDrained,
    ] {
        let tx = signal_tx.clone();
        session.on(kind, move |event| {
            tx.send(event.clone())
                .map_err(|_| anyhow!("signal receiver dropped"))
        });
    }

    session.open(&options.endpoint).await?;

    let connect_wait = config.session.connect_timeout() * 2;
    match tokio::time::timeout(connect_wait, wait_for_ready(&mut signals)).await {
        Ok(Ok(())) => info!("Session ready"),
        Ok(Err(e)) => {
            session.shutdown().await;
            return Err(e);
        }
        Err(_) => {
            session.shutdown().await;
            bail!("Session not ready after {}s", connect_wait.as_secs());
        }
    }

    if let Some(path) = options.audio.as_ref() {
        let chunks = read_wav_chunks(path, options.chunk_ms)?;
        info!(chunks = chunks.len(), file = %path.display(), "Streaming audio");
        for chunk in chunks {
            send_with_backpressure(&session, chunk, &mut signals).await?;
        }
        session.send_control(ControlAction::EndTurn).await?;
    }

    if let Some(text) = options.text {
        session.send_text(text).await?;
    }

    tokio::select! {
        _ = tokio::time::sleep(options.linger) => {}
        _ = tokio::signal::ctrl_c() => info!("Interrupted"),
        _ = wait_for_close(&mut signals) => {}
    }

    session.close().await?;
    session.shutdown().await;
    Ok(())
}

async fn wait_for_ready(signals: &mut mpsc::UnboundedReceiver<SessionEvent>) -> anyhow::Result<()> {
    while let Some(event) = signals.recv().await {
        match event {
            SessionEvent::SessionReady { .. } => return Ok(()),
            SessionEvent::SessionClosed { reason } => bail!("Session closed: {}", reason),
            _ => {}
        }
    }
    bail!("Event stream ended before the session became ready")
}

async fn wait_for_close(signals: &mut mpsc::UnboundedReceiver<SessionEvent>) {
    while let Some(event) = signals.recv().await {
        if matches!(event, SessionEvent::SessionClosed { .. }) {
            return;
        }
    }
}

/// Send one chunk, waiting for a queue-drained signal whenever the queue is full.
async fn send_with_backpressure(
    session: &VoiceSession,
    chunk: Bytes,
    signals: &mut mpsc::UnboundedReceiver<SessionEvent>,
) -> anyhow::Result<()> {
    loop {
        match session.send_audio(chunk.clone()).await {
            Ok(()) => return Ok(()),
            Err(SessionError::QueueFull { capacity }) => {
                tracing::debug!(capacity, "Queue full, waiting for drain");
                loop {
                    match signals.recv().await {
                        Some(SessionEvent::QueueDrained) => break,
                        Some(SessionEvent::SessionClosed { reason }) => {
                            bail!("Session closed while streaming: {}", reason)
                        }
                        Some(_) => continue,
                        None => bail!("Event stream ended while streaming"),
                    }
                }
            }
            Err(e) => return Err(e.into()),
        }
    }
}

/// Split a 16-bit PCM WAV file into little-endian chunks of `chunk_ms`.
fn read_wav_chunks(path: &PathBuf, chunk_ms: u32) -> anyhow::Result<Vec<Bytes>> {
    let mut reader = hound::WavReader::open(path)
        .map_err(|e| anyhow!("Failed to open {}: {}", path.display(), e))?;
    let spec = reader.spec();
    if spec.sample_format != hound::SampleFormat::Int || spec.bits_per_sample != 16 {
        bail!(
            "Unsupported WAV format: {:?} {}-bit (expected 16-bit PCM)",
            spec.sample_format,
            spec.bits_per_sample
        );
    }

    let samples_per_chunk =
        ((spec.sample_rate as u64 * spec.channels as u64 * chunk_ms.max(1) as u64) / 1000).max(1)
            as usize;

    let samples = reader
        .samples::<i16>()
        .collect::<Result<Vec<i16>, _>>()
        .map_err(|e| anyhow!("Failed to read samples: {}", e))?;

    Ok(samples
        .chunks(samples_per_chunk)
        .map(|chunk| {
            let bytes: Vec<u8> = chunk.iter().flat_map(|s| s.to_le_bytes()).collect();
            Bytes::from(bytes)
        })
        .collect())
}
