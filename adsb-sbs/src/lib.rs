//! adsb-sbs: async plumbing for BaseStation (SBS) streams.
//!
//! A TCP `Client` that reads SBS lines, a `Server` that publishes them, a
//! `Session` that tracks the aircraft they describe, and rotating message
//! archives for recording and replay. Message parsing and aircraft state
//! live in `adsb-core`.

pub mod archive;
pub mod client;
pub mod error;
pub mod protocol;
pub mod server;
pub mod session;

pub use archive::{read_archive, replay_delay, ArchiveRecord, Recorder, RotatingArchive};
pub use client::{Client, ClientConfig};
pub use error::{Result, SbsError};
pub use protocol::{frame, SbsFramer, DELIMITER};
pub use server::Server;
pub use session::{Session, SessionConfig};
