use std::time::Duration;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tracing::{debug, warn};
use tube_core::config::Config;
use tube_core::protocol::{Broadcast, Command, Message, PlayerSnapshot, PROTOCOL_VERSION};

/// How long to wait for the daemon to answer a command.
const REPLY_TIMEOUT: Duration = Duration::from_secs(3);

#[derive(Parser, Debug)]
#[command(name = "tubectl")]
#[command(about = "Control a running tubed daemon")]
#[command(version)]
struct Args {
    /// Daemon address (host:port); defaults to the configured socket.
    #[arg(short, long, env = "TUBE_ADDRESS")]
    address: Option<String>,

    #[command(subcommand)]
    command: Action,
}

#[derive(Subcommand, Debug)]
enum Action {
    /// Add a YouTube video or playlist URL
    Load { url: String },
    /// Select and play the track at INDEX
    Select { index: usize },
    /// Remove the track at INDEX
    Remove { index: usize },
    Toggle,
    Play,
    Pause,
    Stop,
    Next,
    Prev,
    /// Seek to a fraction of the track (0.0 to 1.0)
    Seek { fraction: f64 },
    Clear,
    /// Show metadata cache statistics
    Cache,
    /// Drop every cached playlist
    CacheClear,
    /// Print the current player state
    State,
}

impl Action {
    fn into_command(self) -> Command {
        match self {
            Action::Load { url } => Command::LoadUrl { url },
            Action::Select { index } => Command::Select { index },
            Action::Remove { index } => Command::Remove { index },
            Action::Toggle => Command::TogglePlay,
            Action::Play => Command::Play,
            Action::Pause => Command::Pause,
            Action::Stop => Command::Stop,
            Action::Next => Command::Next,
            Action::Prev => Command::Prev,
            Action::Seek { fraction } => Command::SeekFraction { fraction },
            Action::Clear => Command::Clear,
            Action::Cache => Command::CacheStats,
            Action::CacheClear => Command::CacheClear,
            Action::State => Command::GetState,
        }
    }
}

/// Buffered reader for length-prefixed frames.
struct FrameReader<S> {
    stream: S,
    buffer: Vec<u8>,
}

impl<S: AsyncRead + Unpin> FrameReader<S> {
    async fn next(&mut self) -> anyhow::Result<Broadcast> {
        let mut chunk = [0u8; 8192];
        loop {
            if let Some(frame_len) = Message::frame_len(&self.buffer)? {
                let frame: Vec<u8> = self.buffer.drain(..frame_len).collect();
                match Message::decode(&frame) {
                    Ok((Message::Broadcast(b), _)) => return Ok(b),
                    Ok((Message::Command(c), _)) => debug!("ignoring echoed command {:?}", c),
                    Err(e) => warn!("skipping undecodable frame: {}", e),
                }
                continue;
            }
            let n = self.stream.read(&mut chunk).await?;
            if n == 0 {
                anyhow::bail!("daemon closed the connection");
            }
            self.buffer.extend_from_slice(&chunk[..n]);
        }
    }
}

fn print_state(state: &PlayerSnapshot) {
    println!("status:   {}", state.status);
    println!(
        "engine:   {:?}  track: {:?}  playback: {:?}",
        state.engine_state, state.track_state, state.playback_state
    );
    println!(
        "progress: {} / {}",
        state.progress.current_text, state.progress.duration_text
    );
    for (i, track) in state.tracks.iter().enumerate() {
        let marker = if i == state.cursor { '>' } else { ' ' };
        println!("{} {:3}. {} - {}", marker, i, track.name, track.artist);
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .init();

    let args = Args::parse();
    let address = match args.address {
        Some(a) => a,
        None => Config::load()?.daemon.address(),
    };

    let stream = TcpStream::connect(&address)
        .await
        .with_context(|| format!("connecting to tubed at {}", address))?;
    let mut reader = FrameReader {
        stream,
        buffer: Vec::new(),
    };

    let hello = match reader.next().await? {
        Broadcast::Hello {
            protocol_version,
            state,
        } => {
            if protocol_version != PROTOCOL_VERSION {
                warn!(
                    "daemon speaks protocol {} (expected {})",
                    protocol_version, PROTOCOL_VERSION
                );
            }
            state
        }
        other => anyhow::bail!("expected Hello, got {:?}", other),
    };

    let command = args.command.into_command();
    if command == Command::GetState {
        print_state(&hello);
        return Ok(());
    }

    let frame = Message::Command(command).encode()?;
    reader.stream.write_all(&frame).await?;

    let reply = tokio::time::timeout(REPLY_TIMEOUT, async {
        loop {
            match reader.next().await? {
                Broadcast::Log { message } => eprintln!("{}", message),
                other => return anyhow::Ok(other),
            }
        }
    })
    .await;

    match reply {
        Ok(Ok(Broadcast::State { data })) => print_state(&data),
        Ok(Ok(Broadcast::CacheStats { data })) => {
            println!("{}", serde_json::to_string_pretty(&data)?)
        }
        Ok(Ok(Broadcast::Error { message })) => anyhow::bail!("{}", message),
        Ok(Ok(other)) => debug!("unexpected reply {:?}", other),
        Ok(Err(e)) => return Err(e),
        // nothing changed: show what we had on connect
        Err(_) => print_state(&hello),
    }

    Ok(())
}
