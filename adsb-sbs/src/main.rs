//! adsb: command-line tools for BaseStation (SBS) streams.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::Utc;
use clap::{Args, Parser, Subcommand, ValueEnum};
use comfy_table::{Cell, Table};
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

use adsb_core::config::{self, Config};
use adsb_core::{json, Aircraft, Position, SbsMessage};
use adsb_sbs::{
    frame, read_archive, replay_delay, Client, ClientConfig, SbsError, Server, Session,
    SessionConfig,
};

#[derive(Parser)]
#[command(name = "adsb", version, about = "BaseStation (SBS) ADS-B client, session and server")]
struct Cli {
    /// Enable debug logging (RUST_LOG takes precedence)
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Config file [default: ~/.adsb-sbs/config.yaml]
    #[arg(long, global = true, env = "ADSB_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print messages from an SBS source
    Client {
        #[command(flatten)]
        source: SourceArgs,

        /// How to print each message
        #[arg(long, value_enum, default_value_t = OutputFormat::Line)]
        format: OutputFormat,

        /// Record received lines to this archive
        #[arg(long)]
        record: Option<PathBuf>,
    },

    /// Track aircraft from a live SBS source
    Session {
        #[command(flatten)]
        source: SourceArgs,

        /// Record received lines to this archive
        #[arg(long)]
        record: Option<PathBuf>,

        /// Receiver location as "lat,lon" for distances
        #[arg(long, value_parser = parse_origin, allow_hyphen_values = true)]
        origin: Option<Position>,

        /// Seconds between aircraft table dumps
        #[arg(long, default_value = "10")]
        interval: u64,

        /// Don't load or save the session cache
        #[arg(long)]
        no_cache: bool,
    },

    /// Replay an archive through a session and print the aircraft table
    Replay {
        /// Archive written by `client --record` or `session --record`
        file: PathBuf,

        /// Playback speed; 0 replays without delays
        #[arg(long, default_value = "0")]
        rate: f64,

        /// Receiver location as "lat,lon" for distances
        #[arg(long, value_parser = parse_origin, allow_hyphen_values = true)]
        origin: Option<Position>,
    },

    /// Publish an archive to TCP clients
    Serve {
        /// Archive to publish
        file: PathBuf,

        /// Address to listen on
        #[arg(long)]
        host: Option<String>,

        /// Port to listen on (0 picks a free port)
        #[arg(long)]
        port: Option<u16>,

        /// Playback speed; 0 sends without delays
        #[arg(long, default_value = "1.0")]
        rate: f64,

        /// Start over when the archive ends
        #[arg(long)]
        repeat: bool,
    },

    /// Show the current configuration
    Config {
        /// Write a default config file if none exists
        #[arg(long)]
        init: bool,
    },
}

#[derive(Args)]
struct SourceArgs {
    /// SBS source host
    #[arg(long, env = "ADSB_HOST")]
    host: Option<String>,

    /// SBS source port
    #[arg(long, env = "ADSB_PORT")]
    port: Option<u16>,
}

impl SourceArgs {
    fn resolve(self, cfg: &Config) -> (String, u16) {
        (
            self.host.unwrap_or_else(|| cfg.source.host.clone()),
            self.port.unwrap_or(cfg.source.port),
        )
    }
}

#[derive(Clone, Copy, PartialEq, Eq, ValueEnum)]
enum OutputFormat {
    /// Lines exactly as received
    Raw,
    /// Parsed and re-serialized SBS lines
    Line,
    /// One JSON object per message
    Json,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let config_path = cli.config.unwrap_or_else(config::config_file);
    let cfg = config::load_config_from(&config_path)
        .with_context(|| format!("loading {}", config_path.display()))?;
    debug!("Using config {}", config_path.display());

    match cli.command {
        Commands::Client {
            source,
            format,
            record,
        } => cmd_client(&cfg, source, format, record).await,
        Commands::Session {
            source,
            record,
            origin,
            interval,
            no_cache,
        } => cmd_session(&cfg, source, record, origin, interval, no_cache).await,
        Commands::Replay { file, rate, origin } => cmd_replay(&cfg, &file, rate, origin).await,
        Commands::Serve {
            file,
            host,
            port,
            rate,
            repeat,
        } => {
            let host = host.unwrap_or_else(|| cfg.server.host.clone());
            let port = port.unwrap_or(cfg.server.port);
            cmd_serve(&cfg, &file, &host, port, rate, repeat).await
        }
        Commands::Config { init } => cmd_config(&cfg, &config_path, init),
    }
}

fn init_logging(verbose: bool) {
    let default = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

/// Parse a receiver location given as "lat,lon".
fn parse_origin(s: &str) -> std::result::Result<Position, String> {
    let (lat, lon) = s
        .split_once(',')
        .ok_or_else(|| format!("expected \"lat,lon\", got {s:?}"))?;
    let lat: f64 = lat
        .trim()
        .parse()
        .map_err(|e| format!("bad latitude {lat:?}: {e}"))?;
    let lon: f64 = lon
        .trim()
        .parse()
        .map_err(|e| format!("bad longitude {lon:?}: {e}"))?;
    if !(-90.0..=90.0).contains(&lat) {
        return Err(format!("latitude {lat} out of range"));
    }
    if !(-180.0..=180.0).contains(&lon) {
        return Err(format!("longitude {lon} out of range"));
    }
    Ok((lat, lon))
}

fn session_config(cfg: &Config, origin: Option<Position>) -> SessionConfig {
    let settings = &cfg.session;
    SessionConfig {
        record: cfg.record.enabled,
        record_file: cfg.record.file.as_ref().map(PathBuf::from),
        max_bytes: cfg.record.max_bytes,
        backup_count: cfg.record.backup_count,
        cache_enabled: settings.cache_enabled,
        cache_file: PathBuf::from(&settings.cache_file),
        expiry: Duration::from_secs(settings.expiry_minutes * 60),
        check_interval: Duration::try_from_secs_f64(settings.check_interval)
            .unwrap_or(Duration::from_secs(5)),
        origin: origin.or_else(|| cfg.receiver.origin()),
        history_size: settings.history_size,
        history_interval: settings.history_interval.map(Duration::from_secs),
    }
}

// ---------------------------------------------------------------------------
// Subcommands
// ---------------------------------------------------------------------------

async fn cmd_client(
    cfg: &Config,
    source: SourceArgs,
    format: OutputFormat,
    record: Option<PathBuf>,
) -> Result<()> {
    let (host, port) = source.resolve(cfg);
    let client_config = ClientConfig {
        host,
        port,
        record: record.is_some() || cfg.record.enabled,
        record_file: record.or_else(|| cfg.record.file.as_ref().map(PathBuf::from)),
        max_bytes: cfg.record.max_bytes,
        backup_count: cfg.record.backup_count,
    };

    let client = Client::new(client_config)?;
    let mut client = match format {
        OutputFormat::Raw => {
            client.on_raw(|line| println!("{}", String::from_utf8_lossy(line).trim_end()))
        }
        OutputFormat::Line => client.on_message(|msg: SbsMessage| println!("{msg}")),
        OutputFormat::Json => client.on_message(|msg: SbsMessage| match json::to_json(&msg) {
            Ok(text) => println!("{text}"),
            Err(e) => warn!("Could not encode message: {e}"),
        }),
    };

    client.start().await?;
    tokio::select! {
        _ = tokio::signal::ctrl_c() => info!("Interrupted"),
        () = client.wait_closed() => info!("Source closed the connection"),
    }
    client.stop().await?;
    Ok(())
}

enum SessionEvent {
    Dump,
    Interrupted,
    Closed,
}

async fn cmd_session(
    cfg: &Config,
    source: SourceArgs,
    record: Option<PathBuf>,
    origin: Option<Position>,
    interval: u64,
    no_cache: bool,
) -> Result<()> {
    let (host, port) = source.resolve(cfg);
    let mut session_cfg = session_config(cfg, origin);
    if let Some(path) = record {
        session_cfg.record = true;
        session_cfg.record_file = Some(path);
    }
    if no_cache {
        session_cfg.cache_enabled = false;
    }

    let mut session = Session::new(session_cfg)?;
    session
        .connect(&host, port)
        .await
        .with_context(|| format!("connecting to {host}:{port}"))?;

    let mut ticker = tokio::time::interval(Duration::from_secs(interval.max(1)));
    ticker.tick().await;

    loop {
        let event = tokio::select! {
            _ = tokio::signal::ctrl_c() => SessionEvent::Interrupted,
            _ = ticker.tick() => SessionEvent::Dump,
            () = session.wait_closed() => SessionEvent::Closed,
        };
        match event {
            SessionEvent::Dump => print_aircraft(&session.active()),
            SessionEvent::Interrupted => {
                info!("Interrupted");
                break;
            }
            SessionEvent::Closed => {
                warn!("Source closed the connection");
                break;
            }
        }
    }

    session.close().await?;
    print_aircraft(&session.aircraft());
    Ok(())
}

async fn cmd_replay(cfg: &Config, file: &Path, rate: f64, origin: Option<Position>) -> Result<()> {
    let mut session_cfg = session_config(cfg, origin);
    session_cfg.record = false;
    session_cfg.cache_enabled = false;

    let mut session = Session::new(session_cfg)?;
    let count = session
        .replay(file, rate)
        .await
        .with_context(|| format!("replaying {}", file.display()))?;

    let (total, invalid, tracked) =
        session.with_tracker(|t| (t.total_messages, t.invalid_icao, t.len()));
    println!();
    println!("Records: {count} replayed, {total} messages, {invalid} invalid ICAO, {tracked} aircraft");
    println!();
    print_aircraft(&session.aircraft());

    session.close().await?;
    Ok(())
}

async fn cmd_serve(
    cfg: &Config,
    file: &Path,
    host: &str,
    port: u16,
    rate: f64,
    repeat: bool,
) -> Result<()> {
    let mut server = Server::new(host, port, cfg.server.backlog);
    server
        .start()
        .await
        .with_context(|| format!("listening on {host}:{port}"))?;
    info!(
        "Serving {} on {host}:{}",
        file.display(),
        server.port().unwrap_or(port)
    );

    let outcome = tokio::select! {
        r = publish(&server, file, rate, repeat) => r,
        _ = tokio::signal::ctrl_c() => {
            info!("Interrupted");
            Ok(())
        }
    };

    server.stop().await;
    outcome
}

/// Send every archived line to all connected clients.
async fn publish(server: &Server, file: &Path, rate: f64, repeat: bool) -> Result<()> {
    while server.peer_count() == 0 {
        tokio::time::sleep(Duration::from_millis(100)).await;
    }

    loop {
        let mut previous = None;
        let mut sent = 0u64;

        for record in read_archive(file)? {
            let record = match record {
                Ok(r) => r,
                Err(e) => {
                    warn!("Skipping archived line: {e}");
                    continue;
                }
            };
            if let Some(delay) =
                previous.and_then(|prev| replay_delay(prev, record.timestamp, rate))
            {
                tokio::time::sleep(delay).await;
            }
            previous = Some(record.timestamp);

            match server.send_message(&frame(record.message.as_bytes(), true), None) {
                Ok(()) => sent += 1,
                Err(SbsError::NoPeers) => debug!("No clients connected, dropping message"),
                Err(e) => return Err(e.into()),
            }
        }

        info!("Published {sent} messages");
        if !repeat {
            return Ok(());
        }
    }
}

fn cmd_config(cfg: &Config, path: &Path, init: bool) -> Result<()> {
    if init {
        if path.exists() {
            println!("Config already exists: {}", path.display());
        } else {
            config::save_config_to(&Config::default(), path)?;
            println!("Wrote default config to {}", path.display());
        }
        return Ok(());
    }

    println!("# {}", path.display());
    print!("{}", config::serialize_config(cfg));
    Ok(())
}

// ---------------------------------------------------------------------------
// Output
// ---------------------------------------------------------------------------

fn print_aircraft(aircraft: &[Aircraft]) {
    if aircraft.is_empty() {
        println!("No aircraft");
        return;
    }

    let now = Utc::now();
    let mut table = Table::new();
    table.set_header(vec![
        "ICAO", "Callsign", "Squawk", "Alt (ft)", "Speed (kts)", "Track", "VRate", "Lat",
        "Lon", "Dist (km)", "Msgs", "Age (s)",
    ]);

    for ac in aircraft {
        table.add_row(vec![
            Cell::new(&ac.icao),
            Cell::new(ac.callsign.as_deref().unwrap_or("-")),
            Cell::new(match (&ac.squawk, ac.emergency) {
                (Some(s), true) => format!("{s}!"),
                (Some(s), false) => s.clone(),
                (None, _) => "-".into(),
            }),
            Cell::new(
                ac.altitude
                    .map(|a| a.to_string())
                    .unwrap_or("-".into()),
            ),
            Cell::new(
                ac.ground_speed
                    .map(|s| format!("{s:.0}"))
                    .unwrap_or("-".into()),
            ),
            Cell::new(
                ac.track
                    .map(|h| format!("{h:.1}"))
                    .unwrap_or("-".into()),
            ),
            Cell::new(
                ac.vertical_rate
                    .map(|v| format!("{v:+}"))
                    .unwrap_or("-".into()),
            ),
            Cell::new(
                ac.lat
                    .map(|l| format!("{l:.4}"))
                    .unwrap_or("-".into()),
            ),
            Cell::new(
                ac.lon
                    .map(|l| format!("{l:.4}"))
                    .unwrap_or("-".into()),
            ),
            Cell::new(
                ac.distance()
                    .map(|d| format!("{:.1}", d / 1000.0))
                    .unwrap_or("-".into()),
            ),
            Cell::new(ac.msg_count),
            Cell::new(
                ac.age(now)
                    .map(|a| a.as_secs().to_string())
                    .unwrap_or("0".into()),
            ),
        ]);
    }

    println!("{table}");
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_parse_origin() {
        assert_eq!(parse_origin("-34.9285,138.6007"), Ok((-34.9285, 138.6007)));
        assert_eq!(parse_origin(" 51.5 , -0.12 "), Ok((51.5, -0.12)));
        assert!(parse_origin("51.5").is_err());
        assert!(parse_origin("north,west").is_err());
        assert!(parse_origin("91,0").is_err());
        assert!(parse_origin("0,181").is_err());
    }

    #[test]
    fn test_cli_parses() {
        Cli::command().debug_assert();

        let cli = Cli::try_parse_from([
            "adsb", "replay", "capture.log", "--rate", "2", "--origin", "-34.9,138.6",
        ])
        .unwrap();
        match cli.command {
            Commands::Replay { file, rate, origin } => {
                assert_eq!(file, PathBuf::from("capture.log"));
                assert_eq!(rate, 2.0);
                assert_eq!(origin, Some((-34.9, 138.6)));
            }
            _ => panic!("expected replay"),
        }
    }

    #[test]
    fn test_session_config_from_file_settings() {
        let mut cfg = Config::default();
        cfg.receiver.lat = Some(-34.9);
        cfg.receiver.lon = Some(138.6);
        cfg.session.expiry_minutes = 3;
        cfg.session.history_interval = None;

        let sc = session_config(&cfg, None);
        assert_eq!(sc.expiry, Duration::from_secs(180));
        assert_eq!(sc.origin, Some((-34.9, 138.6)));
        assert_eq!(sc.history_interval, None);
        assert!(!sc.record);

        let sc = session_config(&cfg, Some((0.0, 0.0)));
        assert_eq!(sc.origin, Some((0.0, 0.0)), "command line wins");
    }
}
