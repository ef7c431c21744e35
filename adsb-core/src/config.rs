//! Configuration file management for the `adsb` tools.
//!
//! Reads/writes `~/.adsb-sbs/config.yaml` with the SBS source, receiver
//! location, session, recording and server settings. Command-line flags
//! override anything read from the file.

use std::path::{Path, PathBuf};

use crate::types::{AdsbError, Position, Result};

/// Full configuration structure.
#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    pub source: SourceConfig,
    pub receiver: ReceiverConfig,
    pub session: SessionSettings,
    pub record: RecordConfig,
    pub server: ServerConfig,
}

/// Where to read BaseStation output from.
#[derive(Debug, Clone, PartialEq)]
pub struct SourceConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ReceiverConfig {
    pub lat: Option<f64>,
    pub lon: Option<f64>,
}

impl ReceiverConfig {
    /// Receiver location as a distance origin, when fully configured.
    pub fn origin(&self) -> Option<Position> {
        self.lat.zip(self.lon)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SessionSettings {
    pub expiry_minutes: u64,
    /// Seconds between expiry sweeps.
    pub check_interval: f64,
    pub cache_enabled: bool,
    pub cache_file: String,
    pub history_size: usize,
    /// Seconds; `None` records every position.
    pub history_interval: Option<u64>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RecordConfig {
    pub enabled: bool,
    pub file: Option<String>,
    pub max_bytes: u64,
    pub backup_count: u32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub backlog: u32,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            source: SourceConfig {
                host: "localhost".into(),
                port: 30003,
            },
            receiver: ReceiverConfig {
                lat: None,
                lon: None,
            },
            session: SessionSettings {
                expiry_minutes: 2,
                check_interval: 5.0,
                cache_enabled: true,
                cache_file: "session_cache.json".into(),
                history_size: 50,
                history_interval: Some(5),
            },
            record: RecordConfig {
                enabled: false,
                file: None,
                max_bytes: 8 * 1024 * 1024,
                backup_count: 3,
            },
            server: ServerConfig {
                host: "localhost".into(),
                port: 30003,
                backlog: 100,
            },
        }
    }
}

/// Get the config directory path (`~/.adsb-sbs/`).
pub fn config_dir() -> PathBuf {
    dirs_home().join(".adsb-sbs")
}

/// Get the config file path.
pub fn config_file() -> PathBuf {
    config_dir().join("config.yaml")
}

fn dirs_home() -> PathBuf {
    std::env::var("HOME")
        .or_else(|_| std::env::var("USERPROFILE"))
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("."))
}

/// Load config from `~/.adsb-sbs/config.yaml`.
///
/// Returns default config if the file doesn't exist or can't be read.
pub fn load_config() -> Config {
    load_config_from(&config_file()).unwrap_or_default()
}

/// Load config from an explicit path. A missing file gives the defaults.
pub fn load_config_from(path: &Path) -> Result<Config> {
    if !path.exists() {
        return Ok(Config::default());
    }
    let text = std::fs::read_to_string(path)
        .map_err(|e| AdsbError::Config(format!("{}: {e}", path.display())))?;
    Ok(parse_config(&text))
}

/// Save config to `~/.adsb-sbs/config.yaml`.
pub fn save_config(config: &Config) -> Result<PathBuf> {
    let path = config_file();
    save_config_to(config, &path)?;
    Ok(path)
}

/// Save config to an explicit path, creating parent directories.
pub fn save_config_to(config: &Config, path: &Path) -> Result<()> {
    if let Some(dir) = path.parent() {
        std::fs::create_dir_all(dir).map_err(|e| AdsbError::Config(e.to_string()))?;
    }
    std::fs::write(path, serialize_config(config)).map_err(|e| AdsbError::Config(e.to_string()))
}

/// Parse simple YAML-like config text. Unknown keys are ignored and
/// unparsable values keep their defaults.
pub fn parse_config(text: &str) -> Config {
    let mut config = Config::default();
    let mut current_section: Option<String> = None;

    for line in text.lines() {
        let stripped = line.trim();
        if stripped.is_empty() || stripped.starts_with('#') {
            continue;
        }

        let is_indented = line.starts_with("  ") || line.starts_with('\t');

        let Some((key, val)) = stripped.split_once(':') else {
            continue;
        };
        let key = key.trim();
        let val = val.trim();

        if !is_indented {
            current_section = val.is_empty().then(|| key.to_string());
            continue;
        }
        let Some(section) = current_section.as_deref() else {
            continue;
        };

        match (section, key) {
            ("source", "host") => set_string(&mut config.source.host, val),
            ("source", "port") => set_parsed(&mut config.source.port, val),

            ("receiver", "lat") => config.receiver.lat = parse_float_value(val),
            ("receiver", "lon") => config.receiver.lon = parse_float_value(val),

            ("session", "expiry_minutes") => set_parsed(&mut config.session.expiry_minutes, val),
            ("session", "check_interval") => set_parsed(&mut config.session.check_interval, val),
            ("session", "cache_enabled") => set_bool(&mut config.session.cache_enabled, val),
            ("session", "cache_file") => set_string(&mut config.session.cache_file, val),
            ("session", "history_size") => set_parsed(&mut config.session.history_size, val),
            ("session", "history_interval") => {
                config.session.history_interval =
                    parse_string_value(val).and_then(|v| v.parse().ok())
            }

            ("record", "enabled") => set_bool(&mut config.record.enabled, val),
            ("record", "file") => config.record.file = parse_string_value(val),
            ("record", "max_bytes") => set_parsed(&mut config.record.max_bytes, val),
            ("record", "backup_count") => set_parsed(&mut config.record.backup_count, val),

            ("server", "host") => set_string(&mut config.server.host, val),
            ("server", "port") => set_parsed(&mut config.server.port, val),
            ("server", "backlog") => set_parsed(&mut config.server.backlog, val),

            _ => {}
        }
    }

    config
}

fn parse_string_value(val: &str) -> Option<String> {
    if val == "null" || val == "~" || val.is_empty() {
        return None;
    }
    // Strip quotes
    if val.len() >= 2
        && ((val.starts_with('"') && val.ends_with('"'))
            || (val.starts_with('\'') && val.ends_with('\'')))
    {
        return Some(val[1..val.len() - 1].to_string());
    }
    Some(val.to_string())
}

fn parse_float_value(val: &str) -> Option<f64> {
    if val == "null" || val == "~" || val.is_empty() {
        return None;
    }
    val.parse().ok()
}

fn set_string(target: &mut String, val: &str) {
    if let Some(v) = parse_string_value(val) {
        *target = v;
    }
}

fn set_parsed<T: std::str::FromStr>(target: &mut T, val: &str) {
    if let Ok(v) = val.parse() {
        *target = v;
    }
}

fn set_bool(target: &mut bool, val: &str) {
    match val {
        "true" | "yes" | "on" => *target = true,
        "false" | "no" | "off" => *target = false,
        _ => {}
    }
}

fn opt_line<T: std::fmt::Display>(key: &str, value: Option<T>) -> String {
    match value {
        Some(v) => format!("  {key}: {v}"),
        None => format!("  {key}: null"),
    }
}

/// Serialize config to YAML-like text.
pub fn serialize_config(config: &Config) -> String {
    let mut lines = vec!["# adsb-sbs configuration".to_string(), String::new()];

    lines.push("source:".into());
    lines.push(format!("  host: \"{}\"", config.source.host));
    lines.push(format!("  port: {}", config.source.port));
    lines.push(String::new());

    lines.push("receiver:".into());
    lines.push(opt_line("lat", config.receiver.lat));
    lines.push(opt_line("lon", config.receiver.lon));
    lines.push(String::new());

    let session = &config.session;
    lines.push("session:".into());
    lines.push(format!("  expiry_minutes: {}", session.expiry_minutes));
    lines.push(format!("  check_interval: {}", session.check_interval));
    lines.push(format!("  cache_enabled: {}", session.cache_enabled));
    lines.push(format!("  cache_file: \"{}\"", session.cache_file));
    lines.push(format!("  history_size: {}", session.history_size));
    lines.push(opt_line("history_interval", session.history_interval));
    lines.push(String::new());

    let record = &config.record;
    lines.push("record:".into());
    lines.push(format!("  enabled: {}", record.enabled));
    match &record.file {
        Some(file) => lines.push(format!("  file: \"{file}\"")),
        None => lines.push("  file: null".into()),
    }
    lines.push(format!("  max_bytes: {}", record.max_bytes));
    lines.push(format!("  backup_count: {}", record.backup_count));
    lines.push(String::new());

    lines.push("server:".into());
    lines.push(format!("  host: \"{}\"", config.server.host));
    lines.push(format!("  port: {}", config.server.port));
    lines.push(format!("  backlog: {}", config.server.backlog));

    lines.join("\n") + "\n"
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
