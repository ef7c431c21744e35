//! Session aircraft table driven by SBS messages.
//!
//! Pure logic, no I/O and no clock: the caller passes `now` into every
//! call. Produces `TrackEvent` outputs that the caller may log or forward.

use std::collections::HashMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use crate::aircraft::{Aircraft, DEFAULT_HISTORY_INTERVAL, DEFAULT_HISTORY_SIZE};
use crate::message::{SbsMessage, TransmissionType};
use crate::types::Position;

/// Aircraft are dropped after this long without a message.
pub const DEFAULT_EXPIRY: Duration = Duration::from_secs(120);

/// Meaning of a squawk reserved for hijack, radio failure or general
/// emergency, if it is one.
pub fn emergency_squawk(squawk: &str) -> Option<&'static str> {
    match squawk {
        "7500" => Some("hijack"),
        "7600" => Some("radio failure"),
        "7700" => Some("emergency"),
        _ => None,
    }
}

// ---------------------------------------------------------------------------
// Track events (output)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub enum TrackEvent {
    /// First message from this ICAO address in the session.
    NewAircraft {
        icao: String,
        timestamp: DateTime<Utc>,
    },
    /// Callsign set or changed.
    IdentChanged { icao: String, callsign: String },
    /// A position report with both coordinates.
    PositionUpdate {
        icao: String,
        lat: f64,
        lon: f64,
        altitude: Option<i32>,
        timestamp: DateTime<Utc>,
    },
    /// Squawk changed to 7500, 7600 or 7700.
    EmergencySquawk {
        icao: String,
        squawk: String,
        meaning: &'static str,
    },
}

// ---------------------------------------------------------------------------
// Tracker
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct TrackerConfig {
    pub expiry: Duration,
    pub history_size: usize,
    pub history_interval: Option<Duration>,
    /// Stamped onto every new aircraft for distance calculations.
    pub origin: Option<Position>,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        TrackerConfig {
            expiry: DEFAULT_EXPIRY,
            history_size: DEFAULT_HISTORY_SIZE,
            history_interval: Some(DEFAULT_HISTORY_INTERVAL),
            origin: None,
        }
    }
}

/// Aircraft currently visible in a session.
#[derive(Debug, Default)]
pub struct Tracker {
    pub aircraft: HashMap<String, Aircraft>,
    pub config: TrackerConfig,

    // Counters
    pub total_messages: u64,
    pub accepted_messages: u64,
    pub invalid_icao: u64,
}

impl Tracker {
    pub fn new(config: TrackerConfig) -> Self {
        Tracker {
            aircraft: HashMap::new(),
            config,
            total_messages: 0,
            accepted_messages: 0,
            invalid_icao: 0,
        }
    }

    /// Apply one message. Returns the events it caused.
    pub fn update(&mut self, msg: &SbsMessage, now: DateTime<Utc>) -> Vec<TrackEvent> {
        self.total_messages += 1;
        let mut events = Vec::new();

        if !msg.has_valid_icao() {
            self.invalid_icao += 1;
            warn!("Invalid ICAO code detected: {:?}", msg.hex_ident);
            return events;
        }
        if !msg.is_transmission() {
            return events;
        }
        self.accepted_messages += 1;

        let icao = msg.hex_ident.clone();
        let config = &self.config;
        let ac = self.aircraft.entry(icao.clone()).or_insert_with(|| {
            info!("New session aircraft: {icao}");
            events.push(TrackEvent::NewAircraft {
                icao: icao.clone(),
                timestamp: now,
            });
            let mut ac = Aircraft::new(&icao, now)
                .with_history(config.history_size, config.history_interval);
            ac.origin = config.origin;
            ac
        });
        ac.last_seen = now;
        ac.msg_count += 1;

        let Some(tt) = msg.transmission_type else {
            return events;
        };

        match tt {
            TransmissionType::EsIdentAndCategory => {
                if let Some(callsign) = msg.callsign.as_deref() {
                    if ac.callsign.as_deref() != Some(callsign) {
                        ac.update_ident(callsign, now);
                        events.push(TrackEvent::IdentChanged {
                            icao,
                            callsign: callsign.to_string(),
                        });
                    }
                }
            }
            TransmissionType::EsSurfacePos | TransmissionType::EsAirbornePos => {
                ac.update_position(msg.altitude, msg.lat, msg.lon, now);
                if let Some((lat, lon)) = msg.lat.zip(msg.lon) {
                    events.push(TrackEvent::PositionUpdate {
                        icao,
                        lat,
                        lon,
                        altitude: ac.altitude,
                        timestamp: now,
                    });
                }
            }
            TransmissionType::EsAirborneVel => {
                ac.update_motion(msg.ground_speed, msg.track, msg.vertical_rate, now);
            }
            TransmissionType::SurveillanceAlt | TransmissionType::AirToAir => {
                ac.update_altitude(msg.altitude, now);
            }
            TransmissionType::SurveillanceId => {
                let previous = ac.squawk.clone();
                ac.update_squawk(msg.squawk.as_deref(), msg.emergency, now);
                ac.update_altitude(msg.altitude, now);

                if let Some(squawk) = msg.squawk.as_deref() {
                    if previous.as_deref() != Some(squawk) {
                        if let Some(meaning) = emergency_squawk(squawk) {
                            warn!("{icao} squawking {squawk} ({meaning})");
                            events.push(TrackEvent::EmergencySquawk {
                                icao,
                                squawk: squawk.to_string(),
                                meaning,
                            });
                        }
                    }
                }
            }
            TransmissionType::AllCallReply => {
                ac.update_ground(msg.is_on_ground, now);
            }
        }

        events
    }

    pub fn get(&self, icao: &str) -> Option<&Aircraft> {
        self.aircraft.get(icao)
    }

    pub fn len(&self) -> usize {
        self.aircraft.len()
    }

    pub fn is_empty(&self) -> bool {
        self.aircraft.is_empty()
    }

    /// Return all non-expired aircraft, most recently seen first.
    pub fn get_active(&self, now: DateTime<Utc>) -> Vec<&Aircraft> {
        let mut active: Vec<_> = self
            .aircraft
            .values()
            .filter(|ac| !ac.is_lost(now, self.config.expiry))
            .collect();
        active.sort_by(|a, b| b.last_seen.cmp(&a.last_seen).then(a.icao.cmp(&b.icao)));
        active
    }

    /// Remove aircraft last seen longer ago than the expiry. Returns their ICAOs.
    pub fn discard_lost(&mut self, now: DateTime<Utc>) -> Vec<String> {
        let expiry = self.config.expiry;
        let mut lost: Vec<String> = self
            .aircraft
            .iter()
            .filter(|(_, ac)| ac.is_lost(now, expiry))
            .map(|(k, _)| k.clone())
            .collect();
        lost.sort();

        if !lost.is_empty() {
            debug!(
                "dropping {} aircraft from session due to inactivity: {:?}",
                lost.len(),
                lost
            );
            for icao in &lost {
                self.aircraft.remove(icao);
            }
        }
        lost
    }

    /// All aircraft, ordered by ICAO, for the session cache.
    pub fn snapshot(&self) -> Vec<Aircraft> {
        let mut aircraft: Vec<Aircraft> = self.aircraft.values().cloned().collect();
        aircraft.sort_by(|a, b| a.icao.cmp(&b.icao));
        aircraft
    }

    /// Load cached aircraft, skipping any that have already expired.
    /// Returns the number recovered.
    pub fn restore(&mut self, cached: Vec<Aircraft>, now: DateTime<Utc>) -> usize {
        let expiry = self.config.expiry;
        let mut recovered = 0;
        for ac in cached {
            if ac.is_lost(now, expiry) {
                continue;
            }
            self.aircraft.insert(ac.icao.clone(), ac);
            recovered += 1;
        }
        if recovered > 0 {
            info!("Recovered {recovered} aircraft from session cache");
        }
        recovered
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testdata::messages_log;
    use chrono::TimeZone;

    fn t(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_490_438_500 + secs, 0).unwrap()
    }

    fn make_tracker() -> Tracker {
        Tracker::new(TrackerConfig::default())
    }

    fn parse(line: &str) -> SbsMessage {
        SbsMessage::parse(line).expect("valid line")
    }

    const IDENT: &str = "MSG,1,1,1,7C6DB8,1,2017/03/25,10:41:44.122,2017/03/25,10:41:44.140,QFA123,,,,,,,,,,,0";
    const POSITION: &str = "MSG,3,1,1,7C79B7,1,2017/03/25,10:41:45.365,2017/03/25,10:41:45.384,,2850,,,-34.84658,138.67962,,,,,,";
    const VELOCITY: &str = "MSG,4,1,1,7C6DB8,1,2017/03/25,10:41:44.501,2017/03/25,10:41:44.519,,,452,271,,,64,,,,,0";
    const SQUAWK: &str =
        "MSG,6,1,1,7C7C76,1,2018/02/18,21:21:06.987,2018/02/18,21:21:07.005,,,,,,,,7220,0,0,0,";

    #[test]
    fn test_new_aircraft_event() {
        let mut tracker = make_tracker();
        let events = tracker.update(&parse(IDENT), t(0));

        assert!(
            events
                .iter()
                .any(|e| matches!(e, TrackEvent::NewAircraft { .. })),
            "Should emit NewAircraft event"
        );
        let ac = tracker.get("7C6DB8").unwrap();
        assert_eq!(ac.callsign.as_deref(), Some("QFA123"));
        assert_eq!(ac.msg_count, 1);
        assert_eq!(ac.last_seen, t(0));
    }

    #[test]
    fn test_second_message_not_new_aircraft() {
        let mut tracker = make_tracker();
        tracker.update(&parse(IDENT), t(0));
        let events = tracker.update(&parse(VELOCITY), t(1));

        let new_count = events
            .iter()
            .filter(|e| matches!(e, TrackEvent::NewAircraft { .. }))
            .count();
        assert_eq!(new_count, 0, "Second message should NOT emit NewAircraft");
        assert_eq!(tracker.get("7C6DB8").unwrap().msg_count, 2);
    }

    #[test]
    fn test_ident_only_on_change() {
        let mut tracker = make_tracker();
        let events = tracker.update(&parse(IDENT), t(0));
        assert!(events
            .iter()
            .any(|e| matches!(e, TrackEvent::IdentChanged { callsign, .. } if callsign == "QFA123")));

        let events = tracker.update(&parse(IDENT), t(1));
        assert!(events.is_empty());

        let renamed = tracker.update(&parse(&IDENT.replace("QFA123", "QFA124")), t(2));
        assert_eq!(renamed.len(), 1);
        assert_eq!(
            tracker.get("7C6DB8").unwrap().callsign.as_deref(),
            Some("QFA124")
        );
    }

    #[test]
    fn test_position_update() {
        let mut tracker = make_tracker();
        let events = tracker.update(&parse(POSITION), t(0));

        assert!(events.iter().any(|e| matches!(
            e,
            TrackEvent::PositionUpdate { altitude: Some(2850), .. }
        )));
        let ac = tracker.get("7C79B7").unwrap();
        assert_eq!(ac.position(), Some((-34.84658, 138.67962)));
        assert_eq!(ac.history.len(), 1);
    }

    #[test]
    fn test_velocity_update() {
        let mut tracker = make_tracker();
        tracker.update(&parse(VELOCITY), t(0));

        let ac = tracker.get("7C6DB8").unwrap();
        assert_eq!(ac.ground_speed, Some(452.0));
        assert_eq!(ac.track, Some(271.0));
        assert_eq!(ac.vertical_rate, Some(64));
    }

    #[test]
    fn test_squawk_and_emergency() {
        let mut tracker = make_tracker();
        let events = tracker.update(&parse(SQUAWK), t(0));
        assert!(!events
            .iter()
            .any(|e| matches!(e, TrackEvent::EmergencySquawk { .. })));
        assert_eq!(
            tracker.get("7C7C76").unwrap().squawk.as_deref(),
            Some("7220")
        );

        let line = SQUAWK.replace("7220,0,0,0", "7700,0,-1,0");
        let events = tracker.update(&parse(&line), t(1));
        assert!(events.iter().any(|e| matches!(
            e,
            TrackEvent::EmergencySquawk { squawk, meaning: "emergency", .. } if squawk == "7700"
        )));
        assert!(tracker.get("7C7C76").unwrap().emergency);

        // repeated code does not re-alert
        let events = tracker.update(&parse(&line), t(2));
        assert!(events.is_empty());
    }

    #[test]
    fn test_ground_flag() {
        let mut tracker = make_tracker();
        let line = "MSG,8,1,1,7C4530,1,2017/03/25,10:41:47.001,2017/03/25,10:41:47.020,,,,,,,,,,,,-1";
        tracker.update(&parse(line), t(0));
        assert_eq!(tracker.get("7C4530").unwrap().is_on_ground, Some(true));
    }

    #[test]
    fn test_invalid_icao_ignored() {
        let mut tracker = make_tracker();
        let events = tracker.update(&parse(&POSITION.replace("7C79B7", "000000")), t(0));
        assert!(events.is_empty());
        assert!(tracker.is_empty());
        assert_eq!(tracker.invalid_icao, 1);
        assert_eq!(tracker.total_messages, 1);
        assert_eq!(tracker.accepted_messages, 0);
    }

    #[test]
    fn test_non_transmission_ignored() {
        let mut tracker = make_tracker();
        let line = "STA,,5,179,400AE7,10103,2008/11/28,14:58:51.153,2008/11/28,14:58:51.153,RM";
        tracker.update(&parse(line), t(0));
        assert!(tracker.is_empty());
        assert_eq!(tracker.accepted_messages, 0);
    }

    #[test]
    fn test_origin_stamped() {
        let origin = (-34.9285, 138.6007);
        let mut tracker = Tracker::new(TrackerConfig {
            origin: Some(origin),
            ..TrackerConfig::default()
        });
        tracker.update(&parse(POSITION), t(0));
        let ac = tracker.get("7C79B7").unwrap();
        assert_eq!(ac.origin, Some(origin));
        assert!(ac.distance().is_some());
    }

    #[test]
    fn test_discard_lost() {
        let mut tracker = make_tracker();
        tracker.update(&parse(IDENT), t(0));
        tracker.update(&parse(POSITION), t(60));

        assert!(tracker.discard_lost(t(120)).is_empty());
        assert_eq!(tracker.discard_lost(t(121)), vec!["7C6DB8".to_string()]);
        assert_eq!(tracker.len(), 1);
        assert_eq!(tracker.discard_lost(t(181)), vec!["7C79B7".to_string()]);
        assert!(tracker.is_empty());
    }

    #[test]
    fn test_get_active() {
        let mut tracker = make_tracker();
        tracker.update(&parse(IDENT), t(0));
        tracker.update(&parse(POSITION), t(10));

        let active = tracker.get_active(t(11));
        assert_eq!(active.len(), 2);
        assert_eq!(active[0].icao, "7C79B7", "most recent first");

        assert_eq!(tracker.get_active(t(125)).len(), 1);
        assert_eq!(tracker.get_active(t(200)).len(), 0);
    }

    #[test]
    fn test_snapshot_restore() {
        let mut tracker = make_tracker();
        tracker.update(&parse(IDENT), t(0));
        tracker.update(&parse(POSITION), t(100));
        let snapshot = tracker.snapshot();
        assert_eq!(snapshot.len(), 2);
        assert_eq!(snapshot[0].icao, "7C6DB8");

        let mut restored = make_tracker();
        assert_eq!(restored.restore(snapshot, t(150)), 1);
        assert!(restored.get("7C6DB8").is_none());
        assert!(restored.get("7C79B7").is_some());
    }

    #[test]
    fn test_messages_log() {
        let mut tracker = make_tracker();
        for (i, line) in messages_log().iter().enumerate() {
            tracker.update(&parse(line), t(i as i64));
        }
        assert_eq!(tracker.len(), 3);
        assert_eq!(tracker.invalid_icao, 0);
        assert_eq!(tracker.total_messages, messages_log().len() as u64);
        assert_eq!(
            tracker.get("7C6DB8").unwrap().callsign.as_deref(),
            Some("QFA123")
        );
        assert_eq!(tracker.get("7C4530").unwrap().squawk.as_deref(), Some("0421"));
    }

    #[test]
    fn test_emergency_squawk_helper() {
        assert_eq!(emergency_squawk("7500"), Some("hijack"));
        assert_eq!(emergency_squawk("7600"), Some("radio failure"));
        assert_eq!(emergency_squawk("7700"), Some("emergency"));
        assert_eq!(emergency_squawk("1200"), None);
    }
}
