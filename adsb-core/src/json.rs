//! JSON encoding for `SbsMessage`.
//!
//! Dates and times are ISO-8601 strings, `message_type` is its three
//! letter code and `transmission_type` its integer value:
//!
//! ```text
//! {"message_type":"MSG","transmission_type":6,"session_id":1,...,"squawk":"7220","alert":false,...}
//! ```

use crate::message::SbsMessage;
use crate::types::Result;

/// Serialize a message as compact JSON, fields in wire order.
pub fn to_json(msg: &SbsMessage) -> Result<String> {
    Ok(serde_json::to_string(msg)?)
}

/// Serialize a message as indented JSON.
pub fn to_json_pretty(msg: &SbsMessage) -> Result<String> {
    Ok(serde_json::to_string_pretty(msg)?)
}

/// Serialize a message as compact JSON with keys in sorted order.
pub fn to_json_sorted(msg: &SbsMessage) -> Result<String> {
    // serde_json's default map is a BTreeMap, so going through a Value sorts keys
    let value = serde_json::to_value(msg)?;
    Ok(serde_json::to_string(&value)?)
}

/// Deserialize a message from a JSON string.
pub fn from_json(text: &str) -> Result<SbsMessage> {
    Ok(serde_json::from_str(text)?)
}

/// Deserialize a message from JSON bytes.
pub fn from_json_bytes(data: &[u8]) -> Result<SbsMessage> {
    Ok(serde_json::from_slice(data)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::{MessageType, TransmissionType};
    use crate::testdata::messages_log;
    use crate::types::AdsbError;

    const SQUAWK_LINE: &str =
        "MSG,6,1,1,7C7C76,1,2018/02/18,21:21:06.987,2018/02/18,21:21:07.005,,,,,,,,7220,0,0,0,";

    #[test]
    fn test_json_fields() {
        let msg = SbsMessage::parse(SQUAWK_LINE).unwrap();
        let value: serde_json::Value = serde_json::from_str(&to_json(&msg).unwrap()).unwrap();

        assert_eq!(value["message_type"], "MSG");
        assert_eq!(value["transmission_type"], 6);
        assert_eq!(value["hex_ident"], "7C7C76");
        assert_eq!(value["generated_date"], "2018-02-18");
        assert_eq!(value["generated_time"], "21:21:06.987");
        assert_eq!(value["squawk"], "7220");
        assert_eq!(value["alert"], false);
        assert!(value["callsign"].is_null());
        assert!(value["is_on_ground"].is_null());
    }

    #[test]
    fn test_json_field_order() {
        let msg = SbsMessage::parse(SQUAWK_LINE).unwrap();
        let text = to_json(&msg).unwrap();
        assert!(text.starts_with(r#"{"message_type":"MSG","transmission_type":6"#));

        let sorted = to_json_sorted(&msg).unwrap();
        assert!(sorted.starts_with(r#"{"aircraft_id":1,"alert":false"#));
    }

    #[test]
    fn test_json_roundtrip_messages_log() {
        for line in messages_log() {
            let msg = SbsMessage::parse(&line).unwrap();
            let recovered = from_json(&to_json(&msg).unwrap()).unwrap();
            assert_eq!(recovered, msg, "line: {line}");

            let recovered = from_json_bytes(to_json_pretty(&msg).unwrap().as_bytes()).unwrap();
            assert_eq!(recovered, msg);
        }
    }

    #[test]
    fn test_from_json_rejects_bad_transmission_type() {
        let mut msg = SbsMessage::new(MessageType::Msg, "7C7C76");
        msg.transmission_type = Some(TransmissionType::AllCallReply);
        let text = to_json(&msg)
            .unwrap()
            .replace(r#""transmission_type":8"#, r#""transmission_type":12"#);
        assert!(matches!(from_json(&text), Err(AdsbError::Json(_))));
    }
}
