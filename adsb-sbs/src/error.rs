use std::net::SocketAddr;

use adsb_core::AdsbError;
use thiserror::Error;

/// Errors from the SBS client, server, session and archive.
#[derive(Debug, Error)]
pub enum SbsError {
    #[error("Record is enabled but no record_file is specified!")]
    RecordFileMissing,
    #[error("No recording log file specified")]
    NoRecordFile,
    #[error("{0} is already running!")]
    AlreadyRunning(&'static str),
    #[error("Server can't send msg, no peers available")]
    NoPeers,
    #[error("Server can't send msg to non-existant peer: {0}")]
    UnknownPeer(SocketAddr),
    #[error("invalid archive line {line}: {reason}")]
    InvalidArchive { line: usize, reason: String },
    #[error(transparent)]
    Core(#[from] AdsbError),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, SbsError>;
