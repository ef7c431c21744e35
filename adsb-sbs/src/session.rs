//! A live session: the aircraft currently visible from an SBS source.
//!
//! A session is either connected to a source through a `Client` or fed
//! from a message archive with `replay`. Aircraft not heard from within
//! the expiry are dropped by a background monitor task, and the aircraft
//! table can be cached to disk across restarts.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use adsb_core::aircraft::{DEFAULT_HISTORY_INTERVAL, DEFAULT_HISTORY_SIZE};
use adsb_core::tracker::DEFAULT_EXPIRY;
use adsb_core::{Aircraft, Position, SbsMessage, TrackEvent, Tracker, TrackerConfig};
use chrono::Utc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::archive::{read_archive, replay_delay, Recorder, DEFAULT_BACKUP_COUNT, DEFAULT_MAX_BYTES};
use crate::client::{Client, ClientConfig};
use crate::error::{Result, SbsError};

/// Lower bound for the monitor period.
const MIN_CHECK_INTERVAL: Duration = Duration::from_millis(10);

#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub record: bool,
    pub record_file: Option<PathBuf>,
    pub max_bytes: u64,
    pub backup_count: u32,
    pub cache_enabled: bool,
    pub cache_file: PathBuf,
    /// Drop aircraft silent for longer than this.
    pub expiry: Duration,
    /// How often the monitor looks for lost aircraft.
    pub check_interval: Duration,
    pub origin: Option<Position>,
    pub history_size: usize,
    pub history_interval: Option<Duration>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            record: false,
            record_file: None,
            max_bytes: DEFAULT_MAX_BYTES,
            backup_count: DEFAULT_BACKUP_COUNT,
            cache_enabled: true,
            cache_file: PathBuf::from("session_cache.json"),
            expiry: DEFAULT_EXPIRY,
            check_interval: Duration::from_secs(5),
            origin: None,
            history_size: DEFAULT_HISTORY_SIZE,
            history_interval: Some(DEFAULT_HISTORY_INTERVAL),
        }
    }
}

/// State shared between the session, its client handler and its monitor.
#[derive(Debug)]
struct Shared {
    tracker: Mutex<Tracker>,
    recorder: Recorder,
}

impl Shared {
    fn tracker(&self) -> MutexGuard<'_, Tracker> {
        self.tracker.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn on_sbs_message(&self, line: &str) -> Result<Vec<TrackEvent>> {
        let now = Utc::now();
        let msg = SbsMessage::parse(line)?;

        if msg.has_valid_icao() && msg.is_transmission() {
            self.recorder.record(line);
        }
        Ok(self.tracker().update(&msg, now))
    }
}

#[derive(Debug)]
pub struct Session {
    config: SessionConfig,
    shared: Arc<Shared>,
    client: Option<Client>,
    monitor_token: CancellationToken,
    monitor: Option<JoinHandle<()>>,
}

impl Session {
    /// Create a session and start its monitor. Must run inside a tokio runtime.
    pub fn new(config: SessionConfig) -> Result<Self> {
        if config.record && config.record_file.is_none() {
            return Err(SbsError::RecordFileMissing);
        }

        let tracker = Tracker::new(TrackerConfig {
            expiry: config.expiry,
            history_size: config.history_size,
            history_interval: config.history_interval,
            origin: config.origin,
        });
        let shared = Arc::new(Shared {
            tracker: Mutex::new(tracker),
            recorder: Recorder::new(),
        });

        let mut session = Session {
            config,
            shared,
            client: None,
            monitor_token: CancellationToken::new(),
            monitor: None,
        };

        if session.config.record {
            session.start_recording(None)?;
        }
        if session.config.cache_enabled && session.config.cache_file.exists() {
            session.load_cache()?;
        }

        session.monitor = Some(tokio::spawn(monitor(
            session.shared.clone(),
            session.config.check_interval.max(MIN_CHECK_INTERVAL),
            session.monitor_token.clone(),
        )));
        Ok(session)
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Connect to an SBS source and feed its lines into the session.
    pub async fn connect(&mut self, host: &str, port: u16) -> Result<()> {
        self.disconnect().await;

        let shared = self.shared.clone();
        let mut client = Client::new(ClientConfig {
            host: host.to_string(),
            port,
            ..ClientConfig::default()
        })?
        .on_raw(move |data| match std::str::from_utf8(data) {
            Ok(line) => {
                if let Err(e) = shared.on_sbs_message(line) {
                    warn!("Dropping SBS line: {e}");
                }
            }
            Err(_) => warn!("Dropping non UTF-8 SBS line"),
        });
        client.start().await?;
        self.client = Some(client);
        Ok(())
    }

    pub async fn disconnect(&mut self) {
        if let Some(mut client) = self.client.take() {
            if let Err(e) = client.stop().await {
                warn!("Error stopping client: {e}");
            }
        }
    }

    pub fn is_connected(&self) -> bool {
        self.client.as_ref().is_some_and(Client::is_connected)
    }

    /// Wait until the source closes the connection.
    pub async fn wait_closed(&mut self) {
        if let Some(client) = self.client.as_mut() {
            client.wait_closed().await;
        }
    }

    /// Stop the monitor, disconnect, stop recording and save the cache.
    ///
    /// Every step runs even when an earlier one fails; the first error is
    /// returned.
    pub async fn close(&mut self) -> Result<()> {
        self.monitor_token.cancel();
        if let Some(task) = self.monitor.take() {
            if let Err(e) = task.await {
                warn!("Session monitor ended abnormally: {e}");
            }
        }
        self.disconnect().await;

        let recording = self.stop_recording();
        let cache = if self.config.cache_enabled {
            self.save_cache()
        } else {
            Ok(())
        };
        recording.and(cache)
    }

    /// Start recording accepted messages. Falls back to the configured file.
    pub fn start_recording(&self, record_file: Option<&Path>) -> Result<()> {
        let path = record_file
            .or(self.config.record_file.as_deref())
            .ok_or(SbsError::NoRecordFile)?;
        self.shared
            .recorder
            .start(path, self.config.max_bytes, self.config.backup_count)
    }

    pub fn stop_recording(&self) -> Result<()> {
        self.shared.recorder.stop()
    }

    pub fn is_recording(&self) -> bool {
        self.shared.recorder.is_recording()
    }

    /// Process one SBS line using the wall clock as the receive time.
    pub fn on_sbs_message(&self, line: &str) -> Result<Vec<TrackEvent>> {
        self.shared.on_sbs_message(line)
    }

    /// Feed an archive through the session, keeping the recorded spacing
    /// between messages divided by `rate`. A `rate` of 0 or less replays
    /// without delays. Returns the number of records processed.
    pub async fn replay(&self, archive: impl AsRef<Path>, rate: f64) -> Result<usize> {
        let mut previous = None;
        let mut count = 0;

        for record in read_archive(archive)? {
            let record = record?;

            if let Some(delay) = previous.and_then(|prev| replay_delay(prev, record.timestamp, rate)) {
                tokio::time::sleep(delay).await;
            }
            previous = Some(record.timestamp);

            if let Err(e) = self.on_sbs_message(&record.message) {
                warn!("Skipping archived line: {e}");
            }
            count += 1;
        }

        debug!("Replayed {count} archived messages");
        Ok(count)
    }

    /// All aircraft in the session, ordered by ICAO.
    pub fn aircraft(&self) -> Vec<Aircraft> {
        self.shared.tracker().snapshot()
    }

    /// Non-expired aircraft, most recently seen first.
    pub fn active(&self) -> Vec<Aircraft> {
        self.shared
            .tracker()
            .get_active(Utc::now())
            .into_iter()
            .cloned()
            .collect()
    }

    pub fn get(&self, icao: &str) -> Option<Aircraft> {
        self.shared.tracker().get(icao).cloned()
    }

    /// Run `f` with the tracker locked.
    pub fn with_tracker<R>(&self, f: impl FnOnce(&Tracker) -> R) -> R {
        f(&self.shared.tracker())
    }

    fn load_cache(&self) -> Result<()> {
        let path = &self.config.cache_file;
        let text = std::fs::read_to_string(path)?;
        let cached: Vec<Aircraft> = match serde_json::from_str(&text) {
            Ok(cached) => cached,
            Err(e) => {
                warn!("Ignoring unreadable session cache {}: {e}", path.display());
                return Ok(());
            }
        };
        self.shared.tracker().restore(cached, Utc::now());
        Ok(())
    }

    fn save_cache(&self) -> Result<()> {
        info!("Saving aircraft to session cache");
        let snapshot = self.aircraft();
        std::fs::write(&self.config.cache_file, serde_json::to_string_pretty(&snapshot)?)?;
        Ok(())
    }
}

async fn monitor(shared: Arc<Shared>, check_interval: Duration, cancel_token: CancellationToken) {
    debug!("starting session management task");
    let mut ticker = tokio::time::interval(check_interval);
    loop {
        tokio::select! {
            () = cancel_token.cancelled() => return,
            _ = ticker.tick() => {
                shared.tracker().discard_lost(Utc::now());
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
