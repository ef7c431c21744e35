//! BaseStation (SBS-1) message model and line codec.
//!
//! An SBS line is 22 comma-separated fields:
//!
//! ```text
//! MSG,3,1,1,7C79B7,1,2017/03/25,10:41:45.365,2017/03/25,10:41:45.384,,2850,,,-34.84658,138.67962,,,,,,
//! ```
//!
//! Empty fields mean "not present in this transmission". Non-MSG lines
//! (SEL, ID, AIR, STA, CLK) are shorter; missing trailing fields parse as
//! `None`. Formatting always emits the full 22 fields without a delimiter.

use std::fmt;
use std::str::FromStr;

use chrono::{NaiveDate, NaiveTime, Timelike};
use serde::{Deserialize, Serialize};

use crate::types::{is_valid_icao, AdsbError, Result};

/// Number of fields in a full SBS line.
pub const FIELD_COUNT: usize = 22;

const DATE_FORMAT: &str = "%Y/%m/%d";
const TIME_FORMAT_MS: &str = "%H:%M:%S%.3f";
const TIME_FORMAT_FRACTION: &str = "%H:%M:%S%.f";
const TIME_FORMAT_WHOLE: &str = "%H:%M:%S";

// ---------------------------------------------------------------------------
// Message and transmission types
// ---------------------------------------------------------------------------

/// SBS message type (field 0).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum MessageType {
    /// Selection change.
    Sel,
    /// New ID.
    Id,
    /// New aircraft.
    Air,
    /// Status change.
    Sta,
    /// Click.
    Clk,
    /// Transmission. The only type that carries aircraft data.
    Msg,
}

impl MessageType {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageType::Sel => "SEL",
            MessageType::Id => "ID",
            MessageType::Air => "AIR",
            MessageType::Sta => "STA",
            MessageType::Clk => "CLK",
            MessageType::Msg => "MSG",
        }
    }
}

impl FromStr for MessageType {
    type Err = AdsbError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "SEL" => Ok(MessageType::Sel),
            "ID" => Ok(MessageType::Id),
            "AIR" => Ok(MessageType::Air),
            "STA" => Ok(MessageType::Sta),
            "CLK" => Ok(MessageType::Clk),
            "MSG" => Ok(MessageType::Msg),
            other => Err(AdsbError::UnknownMessageType(other.to_string())),
        }
    }
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Transmission type of a `MSG` line (field 1).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
#[repr(u8)]
pub enum TransmissionType {
    /// DF17 BDS 0,8: callsign and category.
    EsIdentAndCategory = 1,
    /// DF17 BDS 0,6: surface position.
    EsSurfacePos = 2,
    /// DF17 BDS 0,5: airborne position.
    EsAirbornePos = 3,
    /// DF17 BDS 0,9: airborne velocity.
    EsAirborneVel = 4,
    /// DF4/DF20: altitude reply.
    SurveillanceAlt = 5,
    /// DF5/DF21: identity reply (squawk).
    SurveillanceId = 6,
    /// DF16: air-to-air.
    AirToAir = 7,
    /// DF11: all-call reply.
    AllCallReply = 8,
}

impl TryFrom<u8> for TransmissionType {
    type Error = AdsbError;

    fn try_from(value: u8) -> Result<Self> {
        match value {
            1 => Ok(TransmissionType::EsIdentAndCategory),
            2 => Ok(TransmissionType::EsSurfacePos),
            3 => Ok(TransmissionType::EsAirbornePos),
            4 => Ok(TransmissionType::EsAirborneVel),
            5 => Ok(TransmissionType::SurveillanceAlt),
            6 => Ok(TransmissionType::SurveillanceId),
            7 => Ok(TransmissionType::AirToAir),
            8 => Ok(TransmissionType::AllCallReply),
            other => Err(AdsbError::UnknownTransmissionType(other.to_string())),
        }
    }
}

impl From<TransmissionType> for u8 {
    fn from(tt: TransmissionType) -> u8 {
        tt as u8
    }
}

impl FromStr for TransmissionType {
    type Err = AdsbError;

    fn from_str(s: &str) -> Result<Self> {
        let value: u8 = s
            .parse()
            .map_err(|_| AdsbError::UnknownTransmissionType(s.to_string()))?;
        TransmissionType::try_from(value)
    }
}

// ---------------------------------------------------------------------------
// SbsMessage
// ---------------------------------------------------------------------------

/// One BaseStation line, fields in wire order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SbsMessage {
    pub message_type: MessageType,
    pub transmission_type: Option<TransmissionType>,
    pub session_id: Option<u32>,
    pub aircraft_id: Option<u32>,
    pub hex_ident: String,
    pub flight_id: Option<u32>,
    pub generated_date: Option<NaiveDate>,
    pub generated_time: Option<NaiveTime>,
    pub logged_date: Option<NaiveDate>,
    pub logged_time: Option<NaiveTime>,
    pub callsign: Option<String>,
    /// Feet.
    pub altitude: Option<i32>,
    /// Knots.
    pub ground_speed: Option<f64>,
    /// Degrees from north.
    pub track: Option<f64>,
    pub lat: Option<f64>,
    pub lon: Option<f64>,
    /// Feet per minute.
    pub vertical_rate: Option<i32>,
    pub squawk: Option<String>,
    pub alert: Option<bool>,
    pub emergency: Option<bool>,
    pub spi: Option<bool>,
    pub is_on_ground: Option<bool>,
}

impl SbsMessage {
    /// An otherwise empty message of the given type.
    pub fn new(message_type: MessageType, hex_ident: &str) -> Self {
        SbsMessage {
            message_type,
            transmission_type: None,
            session_id: None,
            aircraft_id: None,
            hex_ident: hex_ident.to_string(),
            flight_id: None,
            generated_date: None,
            generated_time: None,
            logged_date: None,
            logged_time: None,
            callsign: None,
            altitude: None,
            ground_speed: None,
            track: None,
            lat: None,
            lon: None,
            vertical_rate: None,
            squawk: None,
            alert: None,
            emergency: None,
            spi: None,
            is_on_ground: None,
        }
    }

    /// Parse a single SBS line. A trailing `\r\n` is ignored.
    pub fn parse(line: &str) -> Result<Self> {
        let line = line.trim_end_matches(['\r', '\n']);
        let fields: Vec<&str> = line.split(',').map(str::trim).collect();

        if fields.len() < 5 {
            return Err(AdsbError::InvalidMessage(format!(
                "expected at least 5 fields, got {}",
                fields.len()
            )));
        }
        if fields.len() > FIELD_COUNT {
            return Err(AdsbError::InvalidMessage(format!(
                "expected at most {FIELD_COUNT} fields, got {}",
                fields.len()
            )));
        }

        let field = |i: usize| fields.get(i).copied().filter(|s| !s.is_empty());

        Ok(SbsMessage {
            message_type: fields[0].parse()?,
            transmission_type: field(1).map(str::parse).transpose()?,
            session_id: parse_number("session_id", field(2))?,
            aircraft_id: parse_number("aircraft_id", field(3))?,
            hex_ident: fields[4].to_string(),
            flight_id: parse_number("flight_id", field(5))?,
            generated_date: parse_date("generated_date", field(6))?,
            generated_time: parse_time("generated_time", field(7))?,
            logged_date: parse_date("logged_date", field(8))?,
            logged_time: parse_time("logged_time", field(9))?,
            callsign: field(10).map(str::to_string),
            altitude: parse_number("altitude", field(11))?,
            ground_speed: parse_float("ground_speed", field(12))?,
            track: parse_float("track", field(13))?,
            lat: parse_float("lat", field(14))?,
            lon: parse_float("lon", field(15))?,
            vertical_rate: parse_number("vertical_rate", field(16))?,
            squawk: field(17).map(str::to_string),
            alert: parse_flag("alert", field(18))?,
            emergency: parse_flag("emergency", field(19))?,
            spi: parse_flag("spi", field(20))?,
            is_on_ground: parse_flag("is_on_ground", field(21))?,
        })
    }

    /// Parse raw line bytes as received from the network.
    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        let line = std::str::from_utf8(data)
            .map_err(|_| AdsbError::InvalidMessage("invalid UTF-8".into()))?;
        SbsMessage::parse(line)
    }

    /// Format as an SBS line, without the `\r\n` delimiter.
    pub fn to_line(&self) -> String {
        let fields: [String; FIELD_COUNT] = [
            self.message_type.as_str().to_string(),
            opt(self.transmission_type.map(u8::from)),
            opt(self.session_id),
            opt(self.aircraft_id),
            self.hex_ident.clone(),
            opt(self.flight_id),
            opt(self.generated_date.map(|d| d.format(DATE_FORMAT))),
            self.generated_time.map(format_time).unwrap_or_default(),
            opt(self.logged_date.map(|d| d.format(DATE_FORMAT))),
            self.logged_time.map(format_time).unwrap_or_default(),
            opt(self.callsign.as_deref()),
            opt(self.altitude),
            opt(self.ground_speed),
            opt(self.track),
            opt(self.lat),
            opt(self.lon),
            opt(self.vertical_rate),
            opt(self.squawk.as_deref()),
            format_flag(self.alert),
            format_flag(self.emergency),
            format_flag(self.spi),
            format_flag(self.is_on_ground),
        ];
        fields.join(",")
    }

    /// Whether this message carries a usable ICAO address.
    pub fn has_valid_icao(&self) -> bool {
        is_valid_icao(&self.hex_ident)
    }

    /// `true` for transmission (`MSG`) lines.
    pub fn is_transmission(&self) -> bool {
        self.message_type == MessageType::Msg
    }
}

impl FromStr for SbsMessage {
    type Err = AdsbError;

    fn from_str(s: &str) -> Result<Self> {
        SbsMessage::parse(s)
    }
}

impl fmt::Display for SbsMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_line())
    }
}

// ---------------------------------------------------------------------------
// Field codecs
// ---------------------------------------------------------------------------

fn parse_number<T: FromStr>(field: &'static str, raw: Option<&str>) -> Result<Option<T>> {
    raw.map(|v| {
        v.parse::<T>().map_err(|_| AdsbError::InvalidField {
            field,
            value: v.to_string(),
        })
    })
    .transpose()
}

/// Like `parse_number`, but `NaN` and infinities are rejected.
fn parse_float(field: &'static str, raw: Option<&str>) -> Result<Option<f64>> {
    match parse_number::<f64>(field, raw)? {
        Some(v) if !v.is_finite() => Err(AdsbError::InvalidField {
            field,
            value: raw.unwrap_or_default().to_string(),
        }),
        v => Ok(v),
    }
}

fn parse_date(field: &'static str, raw: Option<&str>) -> Result<Option<NaiveDate>> {
    raw.map(|v| {
        NaiveDate::parse_from_str(v, DATE_FORMAT).map_err(|_| AdsbError::InvalidField {
            field,
            value: v.to_string(),
        })
    })
    .transpose()
}

fn parse_time(field: &'static str, raw: Option<&str>) -> Result<Option<NaiveTime>> {
    raw.map(|v| {
        NaiveTime::parse_from_str(v, TIME_FORMAT_FRACTION)
            .or_else(|_| NaiveTime::parse_from_str(v, TIME_FORMAT_WHOLE))
            .map_err(|_| AdsbError::InvalidField {
                field,
                value: v.to_string(),
            })
    })
    .transpose()
}

/// BaseStation flags: `0` is false, `-1` (or `1`) is true.
fn parse_flag(field: &'static str, raw: Option<&str>) -> Result<Option<bool>> {
    match raw {
        None => Ok(None),
        Some("0") => Ok(Some(false)),
        Some("-1") | Some("1") => Ok(Some(true)),
        Some(other) => Err(AdsbError::InvalidField {
            field,
            value: other.to_string(),
        }),
    }
}

fn format_flag(flag: Option<bool>) -> String {
    match flag {
        Some(true) => "-1".into(),
        Some(false) => "0".into(),
        None => String::new(),
    }
}

/// Millisecond precision like dump1090, unless the value needs more.
fn format_time(time: NaiveTime) -> String {
    if time.nanosecond() % 1_000_000 == 0 {
        time.format(TIME_FORMAT_MS).to_string()
    } else {
        time.format(TIME_FORMAT_FRACTION).to_string()
    }
}

fn opt<T: fmt::Display>(value: Option<T>) -> String {
    value.map(|v| v.to_string()).unwrap_or_default()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
