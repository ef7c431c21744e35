//! adsb-core: BaseStation (SBS) message model and aircraft tracking.
//!
//! No async, no network I/O. Shared by the `adsb-sbs` client, server and
//! session layers and the `adsb` CLI.

pub mod aircraft;
pub mod config;
pub mod geo;
pub mod json;
pub mod message;
pub mod tracker;
pub mod types;

/// Crate version, as published.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

// Re-export commonly used types at crate root
pub use aircraft::{Aircraft, HistoryPoint};
pub use message::{MessageType, SbsMessage, TransmissionType};
pub use tracker::{TrackEvent, Tracker, TrackerConfig};
pub use types::*;

#[cfg(test)]
pub(crate) mod testdata {
    const MESSAGES_LOG: &str = include_str!("../../testdata/messages-log.txt");

    /// SBS lines from the recorded archive, timestamps stripped.
    pub fn messages_log() -> Vec<String> {
        MESSAGES_LOG
            .split("\r\n")
            .filter(|line| !line.is_empty())
            .filter_map(|line| line.split_once(',').map(|(_, sbs)| sbs.to_string()))
            .collect()
    }
}
