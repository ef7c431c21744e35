//! State for a single aircraft observed during a session.
//!
//! Updates only overwrite what the message carried: an empty field in an
//! SBS line never clears a value learned from an earlier line.

use std::collections::{BTreeMap, VecDeque};
use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::geo::haversine_distance;
use crate::types::Position;

/// Default maximum number of history points.
pub const DEFAULT_HISTORY_SIZE: usize = 50;

/// Default minimum spacing between history points.
pub const DEFAULT_HISTORY_INTERVAL: Duration = Duration::from_secs(5);

/// One point on an aircraft's travel path.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryPoint {
    pub timestamp: DateTime<Utc>,
    pub lat: f64,
    pub lon: f64,
    pub altitude: Option<i32>,
}

/// An aircraft seen during a session, keyed by its ICAO address.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Aircraft {
    pub icao: String,
    pub callsign: Option<String>,
    pub squawk: Option<String>,
    pub last_seen: DateTime<Utc>,

    pub altitude: Option<i32>,
    pub lat: Option<f64>,
    pub lon: Option<f64>,
    pub ground_speed: Option<f64>,
    pub track: Option<f64>,
    pub vertical_rate: Option<i32>,
    pub is_on_ground: Option<bool>,
    pub emergency: bool,

    pub msg_count: u64,
    /// Reference location for `distance()`.
    pub origin: Option<Position>,
    /// Manufacturer, model, operator and similar.
    pub details: BTreeMap<String, String>,

    pub history: VecDeque<HistoryPoint>,
    /// 0 means unbounded.
    pub history_size: usize,
    /// `None` records every position update.
    pub history_interval: Option<Duration>,
}

impl Aircraft {
    pub fn new(icao: &str, now: DateTime<Utc>) -> Self {
        Aircraft {
            icao: icao.to_string(),
            callsign: None,
            squawk: None,
            last_seen: now,
            altitude: None,
            lat: None,
            lon: None,
            ground_speed: None,
            track: None,
            vertical_rate: None,
            is_on_ground: None,
            emergency: false,
            msg_count: 0,
            origin: None,
            details: BTreeMap::new(),
            history: VecDeque::new(),
            history_size: DEFAULT_HISTORY_SIZE,
            history_interval: Some(DEFAULT_HISTORY_INTERVAL),
        }
    }

    pub fn with_history(mut self, size: usize, interval: Option<Duration>) -> Self {
        self.history_size = size;
        self.history_interval = interval;
        while size > 0 && self.history.len() > size {
            self.history.pop_front();
        }
        self
    }

    /// `(lat, lon)` once both are known.
    pub fn position(&self) -> Option<Position> {
        self.lat.zip(self.lon)
    }

    /// Meters from the origin, when both the origin and position are known.
    pub fn distance(&self) -> Option<f64> {
        let origin = self.origin?;
        let position = self.position()?;
        Some(haversine_distance(origin, position))
    }

    /// Time since the last update, or `None` if `now` is before it.
    pub fn age(&self, now: DateTime<Utc>) -> Option<Duration> {
        (now - self.last_seen).to_std().ok()
    }

    /// True when nothing was heard for longer than `expiry`.
    pub fn is_lost(&self, now: DateTime<Utc>, expiry: Duration) -> bool {
        self.age(now).is_some_and(|age| age > expiry)
    }

    pub fn update_ident(&mut self, callsign: &str, timestamp: DateTime<Utc>) {
        self.last_seen = timestamp;
        self.callsign = Some(callsign.to_string());
    }

    pub fn update_motion(
        &mut self,
        ground_speed: Option<f64>,
        track: Option<f64>,
        vertical_rate: Option<i32>,
        timestamp: DateTime<Utc>,
    ) {
        self.last_seen = timestamp;
        if ground_speed.is_some() {
            self.ground_speed = ground_speed;
        }
        if track.is_some() {
            self.track = track;
        }
        if vertical_rate.is_some() {
            self.vertical_rate = vertical_rate;
        }
    }

    /// Set position fields and maybe record a history point.
    ///
    /// A point is recorded when the history is empty, when there is no
    /// interval, or when `timestamp` is more than one interval past the
    /// last point. Points inside the window are discarded.
    pub fn update_position(
        &mut self,
        altitude: Option<i32>,
        lat: Option<f64>,
        lon: Option<f64>,
        timestamp: DateTime<Utc>,
    ) {
        self.last_seen = timestamp;
        if altitude.is_some() {
            self.altitude = altitude;
        }
        if lat.is_some() {
            self.lat = lat;
        }
        if lon.is_some() {
            self.lon = lon;
        }

        let Some((lat, lon)) = lat.zip(lon) else {
            return;
        };

        let record = match (self.history.back(), self.history_interval) {
            (None, _) | (_, None) => true,
            (Some(last), Some(interval)) => (timestamp - last.timestamp)
                .to_std()
                .is_ok_and(|elapsed| elapsed > interval),
        };
        if !record {
            return;
        }

        if self.history_size > 0 && self.history.len() >= self.history_size {
            self.history.pop_front();
        }
        self.history.push_back(HistoryPoint {
            timestamp,
            lat,
            lon,
            altitude: self.altitude,
        });
    }

    pub fn update_altitude(&mut self, altitude: Option<i32>, timestamp: DateTime<Utc>) {
        self.last_seen = timestamp;
        if altitude.is_some() {
            self.altitude = altitude;
        }
    }

    pub fn update_squawk(
        &mut self,
        squawk: Option<&str>,
        emergency: Option<bool>,
        timestamp: DateTime<Utc>,
    ) {
        self.last_seen = timestamp;
        if let Some(squawk) = squawk {
            self.squawk = Some(squawk.to_string());
        }
        if let Some(emergency) = emergency {
            self.emergency = emergency;
        }
    }

    pub fn update_ground(&mut self, is_on_ground: Option<bool>, timestamp: DateTime<Utc>) {
        self.last_seen = timestamp;
        if is_on_ground.is_some() {
            self.is_on_ground = is_on_ground;
        }
    }

    /// Replace the descriptive details. Does not touch `last_seen`.
    pub fn update_details(&mut self, details: BTreeMap<String, String>) {
        self.details = details;
    }

    /// Travel path, oldest point first.
    pub fn path(&self) -> Vec<HistoryPoint> {
        self.history.iter().cloned().collect()
    }
}

fn or_none<T: fmt::Display>(value: &Option<T>) -> String {
    match value {
        Some(v) => v.to_string(),
        None => "None".into(),
    }
}

impl fmt::Display for Aircraft {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "icao24={}, last_seen={}, msgs={}, history={}, lat={}, lon={}, alt={}, \
             ground_speed={}, track={}, vertical_rate={}, callsign={}",
            self.icao,
            self.last_seen.to_rfc3339(),
            self.msg_count,
            self.history.len(),
            or_none(&self.lat),
            or_none(&self.lon),
            or_none(&self.altitude),
            or_none(&self.ground_speed),
            or_none(&self.track),
            or_none(&self.vertical_rate),
            or_none(&self.callsign),
        )?;
        if !self.details.is_empty() {
            write!(f, ", details={:?}", self.details)?;
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
