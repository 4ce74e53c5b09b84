use std::sync::Arc;

use clap::{Parser, Subcommand};
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use gateview::api::ApiClient;
use gateview::config::{PlayerConfig, WhepConfig};
use gateview::events::PlayerEvent;
use gateview::session::{PlayerSession, PlayerState, PlayerStatus};
use gateview::whep::{PacketProbeSink, VideoSink, WhepConnection};

/// gateview command line arguments
#[derive(Parser, Debug)]
#[command(name = "gateview")]
#[command(version, about = "Live gate-camera viewer over WHEP", long_about = None)]
struct CliArgs {
    /// Base URL of the directory / ticket API
    #[arg(long, value_name = "URL", default_value = "http://127.0.0.1:8080/api")]
    api_base: String,

    /// Log filter (RUST_LOG overrides this)
    #[arg(long, value_name = "FILTER", default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List stations
    Stations,
    /// List the gates of a station
    Gates { station_id: String },
    /// List the streams of a gate
    Streams { gate_id: String },
    /// Play a stream until interrupted
    Play {
        stream_id: String,
        /// Do not start playback automatically once a ticket is ready
        #[arg(long)]
        no_autoplay: bool,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = CliArgs::parse();
    init_tracing(&args.log_level);

    let api = ApiClient::new(args.api_base.clone());

    match args.command {
        Command::Stations => {
            for station in api.stations().await? {
                println!("{}\t{}", station.station_id, station.name);
            }
        }
        Command::Gates { station_id } => {
            for gate in api.station_gates(&station_id).await? {
                println!("{}\t{}", gate.gate_id, gate.name);
            }
        }
        Command::Streams { gate_id } => {
            for stream in api.gate_streams(&gate_id).await? {
                println!("{}\t{}\t{}", stream.stream_id, stream.name, stream.status);
            }
        }
        Command::Play {
            stream_id,
            no_autoplay,
        } => {
            let config = PlayerConfig {
                api_base: args.api_base,
                auto_play: !no_autoplay,
                ..PlayerConfig::default()
            };
            run_player(api, config, stream_id).await?;
        }
    }

    Ok(())
}

/// Wire the ticket session to the WHEP transport and run until the
/// session fails terminally or the user interrupts.
async fn run_player(api: ApiClient, config: PlayerConfig, stream_id: String) -> anyhow::Result<()> {
    let session = PlayerSession::spawn(Arc::new(api), config);
    let mut state_rx = session.watch_state();
    let mut events = session.subscribe();
    let mut transport: Option<Arc<WhepConnection>> = None;

    info!(%stream_id, "starting session");
    session.start(&stream_id);

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("interrupted, tearing down");
                session.disconnect();
                break;
            }
            changed = state_rx.changed() => {
                if changed.is_err() {
                    break;
                }
                let state = state_rx.borrow_and_update().clone();
                match &state {
                    PlayerState::Playing { ticket } if transport.is_none() => {
                        transport = Some(open_transport(&ticket.whep_url));
                    }
                    PlayerState::Error { message, .. } => {
                        error!(%message, "session failed terminally");
                        break;
                    }
                    _ => {
                        if state.status() == PlayerStatus::Disconnected {
                            break;
                        }
                    }
                }
            }
            event = events.recv() => {
                match event {
                    Ok(PlayerEvent::EndpointChanged { whep_url, .. }) => {
                        // The renewed ticket points elsewhere; the old
                        // transport is no longer authorized.
                        warn!(%whep_url, "endpoint changed, re-negotiating transport");
                        if let Some(old) = transport.take() {
                            old.close().await;
                        }
                        transport = Some(open_transport(&whep_url));
                    }
                    Ok(_) => {}
                    Err(_) => break,
                }
            }
        }
    }

    if let Some(conn) = transport.take() {
        conn.close().await;
    }
    Ok(())
}

/// Open a transport against `whep_url` and log its phase changes
fn open_transport(whep_url: &str) -> Arc<WhepConnection> {
    let sink: Arc<dyn VideoSink> = Arc::new(PacketProbeSink::new());
    let conn = Arc::new(WhepConnection::new(
        whep_url,
        Some(sink),
        WhepConfig::default(),
    ));

    let mut phase_rx = conn.watch_phase();
    tokio::spawn(async move {
        while phase_rx.changed().await.is_ok() {
            let phase = *phase_rx.borrow();
            info!(%phase, "transport phase");
        }
    });

    let handle = conn.clone();
    tokio::spawn(async move {
        if let Err(e) = handle.connect().await {
            error!(error = %e, "transport negotiation failed");
        }
    });

    conn
}

fn init_tracing(level: &str) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level));

    if let Err(err) = tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .try_init()
    {
        eprintln!("failed to initialize tracing: {}", err);
    }
}
