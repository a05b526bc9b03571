//! Telephony media stream protocol.
//!
//! Telnyx and Twilio both stream call audio over a WebSocket as JSON text
//! frames carrying base64 G.711 mu-law at 8 kHz:
//!
//! - `connected` - socket established
//! - `start` - stream and call identifiers, media format
//! - `media` - one audio chunk (typically 20 ms / 160 bytes)
//! - `stop` - the call's media stream has ended
//! - `dtmf`, `mark` - keypad digits and playback markers

pub mod messages;

pub use messages::{
    MediaFormat, MediaFrame, MediaTrack, OutboundFrame, StreamStart, TelephonyEvent,
};

use std::fmt;

/// Field naming convention of the connected provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TelephonyDialect {
    #[default]
    Telnyx,
    Twilio,
}

impl TelephonyDialect {
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "telnyx" => Some(TelephonyDialect::Telnyx),
            "twilio" => Some(TelephonyDialect::Twilio),
            _ => None,
        }
    }
}

impl fmt::Display for TelephonyDialect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TelephonyDialect::Telnyx => write!(f, "telnyx"),
            TelephonyDialect::Twilio => write!(f, "twilio"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dialect_parse() {
        assert_eq!(TelephonyDialect::parse("Telnyx"), Some(TelephonyDialect::Telnyx));
        assert_eq!(TelephonyDialect::parse("TWILIO"), Some(TelephonyDialect::Twilio));
        assert_eq!(TelephonyDialect::parse("vonage"), None);
        assert_eq!(TelephonyDialect::Twilio.to_string(), "twilio");
    }
}
