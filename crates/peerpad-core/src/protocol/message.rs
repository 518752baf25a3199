//! Application messages and their text payloads

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{DecodeError, EncodeError};
use crate::location::{format_location, parse_location, Coordinates};

const LOCATION_TAG: &str = "LOC:";
const APPEND_TAG: &str = "ADD:";
const DELETE_TAG: &str = "DEL";
const REPLACE_TAG: &str = "MSG:";

/// A decoded application-level event
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum Message {
    /// Replace the entire shared buffer
    TextReplace(String),
    /// Append one character to the shared buffer
    TextAppend(char),
    /// Remove the last character of the shared buffer
    TextDeleteLast,
    /// One-shot coordinate report
    Location(Coordinates),
    /// Payload with no recognized tag, passed through verbatim
    Raw(String),
}

impl Message {
    /// Short name used in logs and errors
    pub fn kind(&self) -> &'static str {
        match self {
            Message::TextReplace(_) => "text_replace",
            Message::TextAppend(_) => "text_append",
            Message::TextDeleteLast => "text_delete_last",
            Message::Location(_) => "location",
            Message::Raw(_) => "raw",
        }
    }
}

/// Payload scheme shared by both peers
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Scheme {
    /// Literal prefix selects the message type
    #[default]
    Tagged,
    /// Payload shape selects the message type
    Untagged,
}

impl Scheme {
    /// Whether the scheme has an encoding for this message
    pub fn supports(&self, message: &Message) -> bool {
        match self {
            Scheme::Tagged => true,
            Scheme::Untagged => matches!(
                message,
                Message::TextReplace(_) | Message::Location(_)
            ),
        }
    }
}

impl fmt::Display for Scheme {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Scheme::Tagged => write!(f, "tagged"),
            Scheme::Untagged => write!(f, "untagged"),
        }
    }
}

/// Converts messages to and from frame payloads for one scheme
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WireCodec {
    scheme: Scheme,
}

impl WireCodec {
    pub fn new(scheme: Scheme) -> Self {
        Self { scheme }
    }

    pub fn scheme(&self) -> Scheme {
        self.scheme
    }

    /// Encode a message to its payload text
    ///
    /// Always succeeds for the tagged scheme. The untagged scheme only has
    /// full-text and location payloads; anything else would be read back as
    /// one of those.
    pub fn encode(&self, message: &Message) -> Result<String, EncodeError> {
        if !self.scheme.supports(message) {
            return Err(EncodeError {
                scheme: self.scheme,
                kind: message.kind().to_string(),
            });
        }
        Ok(match self.scheme {
            Scheme::Tagged => encode_tagged(message),
            Scheme::Untagged => encode_untagged(message),
        })
    }

    /// Decode a payload
    pub fn decode(&self, payload: &str) -> Result<Message, DecodeError> {
        match self.scheme {
            Scheme::Tagged => decode_tagged(payload),
            Scheme::Untagged => Ok(decode_untagged(payload)),
        }
    }
}

fn encode_tagged(message: &Message) -> String {
    match message {
        Message::TextReplace(content) => format!("{REPLACE_TAG}{content}"),
        Message::TextAppend(ch) => format!("{APPEND_TAG}{ch}"),
        Message::TextDeleteLast => DELETE_TAG.to_string(),
        Message::Location(coords) => format!(
            "{LOCATION_TAG}{}",
            format_location(coords.latitude(), coords.longitude())
        ),
        Message::Raw(content) => content.clone(),
    }
}

fn decode_tagged(payload: &str) -> Result<Message, DecodeError> {
    if let Some(rest) = payload.strip_prefix(LOCATION_TAG) {
        return Ok(Message::Location(parse_location(rest)?));
    }

    if let Some(rest) = payload.strip_prefix(APPEND_TAG) {
        let mut chars = rest.chars();
        return match (chars.next(), chars.next()) {
            (Some(ch), None) => Ok(Message::TextAppend(ch)),
            _ => Err(DecodeError::AppendLength(rest.chars().count())),
        };
    }

    if payload == DELETE_TAG {
        return Ok(Message::TextDeleteLast);
    }

    if let Some(rest) = payload.strip_prefix(REPLACE_TAG) {
        return Ok(Message::TextReplace(rest.to_string()));
    }

    Ok(Message::Raw(payload.to_string()))
}

fn encode_untagged(message: &Message) -> String {
    match message {
        Message::Location(coords) => format_location(coords.latitude(), coords.longitude()),
        Message::TextReplace(content) => content.clone(),
        // rejected by `encode` through `Scheme::supports`
        Message::TextAppend(_) | Message::TextDeleteLast | Message::Raw(_) => String::new(),
    }
}

fn decode_untagged(payload: &str) -> Message {
    match parse_location(payload) {
        Ok(coords) => Message::Location(coords),
        Err(_) => Message::TextReplace(payload.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::location::InvalidLocationError;

    fn tagged() -> WireCodec {
        WireCodec::new(Scheme::Tagged)
    }

    fn untagged() -> WireCodec {
        WireCodec::new(Scheme::Untagged)
    }

    fn location(lat: f64, lon: f64) -> Message {
        Message::Location(Coordinates::new(lat, lon).unwrap())
    }

    #[test]
    fn test_tagged_encode() {
        let codec = tagged();
        assert_eq!(
            codec.encode(&Message::TextReplace("hello".into())).unwrap(),
            "MSG:hello"
        );
        assert_eq!(codec.encode(&Message::TextAppend('a')).unwrap(), "ADD:a");
        assert_eq!(codec.encode(&Message::TextDeleteLast).unwrap(), "DEL");
        assert_eq!(
            codec.encode(&location(12.5, -0.33)).unwrap(),
            "LOC:12.5,-0.33"
        );
        assert_eq!(codec.encode(&Message::Raw("plain".into())).unwrap(), "plain");
    }

    #[test]
    fn test_tagged_decode() {
        let codec = tagged();
        assert_eq!(
            codec.decode("MSG:hello").unwrap(),
            Message::TextReplace("hello".into())
        );
        assert_eq!(codec.decode("MSG:").unwrap(), Message::TextReplace(String::new()));
        assert_eq!(codec.decode("ADD:ü").unwrap(), Message::TextAppend('ü'));
        assert_eq!(codec.decode("DEL").unwrap(), Message::TextDeleteLast);
        assert_eq!(codec.decode("LOC:12.5,-0.33").unwrap(), location(12.5, -0.33));
    }

    #[test]
    fn test_tagged_unknown_prefix_is_raw() {
        let codec = tagged();
        assert_eq!(codec.decode("hello").unwrap(), Message::Raw("hello".into()));
        assert_eq!(codec.decode("DELETE").unwrap(), Message::Raw("DELETE".into()));
        assert_eq!(codec.decode("msg:lower").unwrap(), Message::Raw("msg:lower".into()));
        assert_eq!(codec.decode("").unwrap(), Message::Raw(String::new()));
    }

    #[test]
    fn test_tagged_malformed_location() {
        let codec = tagged();
        assert_eq!(
            codec.decode("LOC:1,2,3"),
            Err(DecodeError::Location(InvalidLocationError::FieldCount(3)))
        );
        assert!(matches!(
            codec.decode("LOC:north,2"),
            Err(DecodeError::Location(InvalidLocationError::NotANumber(_)))
        ));
    }

    #[test]
    fn test_tagged_malformed_append() {
        let codec = tagged();
        assert_eq!(codec.decode("ADD:"), Err(DecodeError::AppendLength(0)));
        assert_eq!(codec.decode("ADD:ab"), Err(DecodeError::AppendLength(2)));
    }

    #[test]
    fn test_untagged_decode() {
        let codec = untagged();
        assert_eq!(codec.decode("19.43,-99.13").unwrap(), location(19.43, -99.13));
        assert_eq!(
            codec.decode("hello, world").unwrap(),
            Message::TextReplace("hello, world".into())
        );
        assert_eq!(
            codec.decode("1,2,3").unwrap(),
            Message::TextReplace("1,2,3".into())
        );
        assert_eq!(
            codec.decode("MSG:hi").unwrap(),
            Message::TextReplace("MSG:hi".into())
        );
    }

    #[test]
    fn test_untagged_encode() {
        let codec = untagged();
        assert_eq!(
            codec.encode(&Message::TextReplace("typed".into())).unwrap(),
            "typed"
        );
        assert_eq!(codec.encode(&location(1.5, 2.25)).unwrap(), "1.5,2.25");

        let err = codec.encode(&Message::TextAppend('x')).unwrap_err();
        assert_eq!(err.scheme, Scheme::Untagged);
        assert_eq!(err.kind, "text_append");
        assert!(codec.encode(&Message::TextDeleteLast).is_err());

        // "1,2" would be read back as a location
        let err = codec.encode(&Message::Raw("1,2".into())).unwrap_err();
        assert_eq!(err.kind, "raw");
    }

    #[test]
    fn test_scheme_supports() {
        assert!(Scheme::Tagged.supports(&Message::TextDeleteLast));
        assert!(!Scheme::Untagged.supports(&Message::TextAppend('a')));
        assert!(Scheme::Untagged.supports(&Message::TextReplace("a".into())));
        assert!(!Scheme::Untagged.supports(&Message::Raw("a".into())));
        assert!(Scheme::Tagged.supports(&Message::Raw("a".into())));
    }

    #[test]
    fn test_message_kind() {
        assert_eq!(Message::TextDeleteLast.kind(), "text_delete_last");
        assert_eq!(location(0.0, 0.0).kind(), "location");
    }
}
