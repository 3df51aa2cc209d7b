//! ==============================================================================
//! codec.rs - frame building and parsing
//! ==============================================================================
//!
//! purpose:
//!     pure, stateless translation between radio frames and `Message`.
//!     every field becomes an owned String so nothing borrows the receive buffer.
//!
//! parsing rules:
//!     - the first five fields are split strictly left to right
//!     - the payload absorbs any remaining delimiters verbatim
//!     - a trailing tag is split off first when the profile expects one
//!     - a non-numeric timestamp reads as 0 (logged) unless strict
//!     - never panics: malformed input is always a FormatError
//!
//! ==============================================================================

use crate::error::FormatError;

use super::auth;
use super::{AuthMode, FrameProfile, DELIMITER, EMPTY_PAYLOAD};

/// fields in an untagged frame
pub const BODY_FIELDS: usize = 6;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub sender: String,
    pub command: String,
    pub target: String,
    pub sequence: String,
    pub timestamp: u64,
    pub payload: String,
    pub tag: Option<String>,
}

impl Message {
    /// true for the sentinel payload (or an empty one)
    pub fn has_empty_payload(&self) -> bool {
        self.payload.is_empty() || self.payload == EMPTY_PAYLOAD
    }
}

/// assemble a frame; signed when a secret is supplied
pub fn build(
    sender: &str,
    command: &str,
    target: &str,
    sequence: &str,
    timestamp: u64,
    payload: &str,
    secret: Option<&str>,
) -> Vec<u8> {
    let payload = if payload.is_empty() { EMPTY_PAYLOAD } else { payload };
    let body = format!(
        "{sender}{d}{command}{d}{target}{d}{sequence}{d}{timestamp}{d}{payload}",
        d = DELIMITER
    );
    match secret {
        Some(secret) => {
            let tag = auth::tag(&body, secret);
            format!("{body}{DELIMITER}{tag}").into_bytes()
        }
        None => body.into_bytes(),
    }
}

/// decode a raw radio buffer
pub fn parse(raw: &[u8], profile: &FrameProfile) -> Result<Message, FormatError> {
    let text = frame_text(raw)?;
    let (body, tag) = split_tag(text, profile.auth)?;

    let delimiters = body.matches(DELIMITER).count();
    if delimiters < BODY_FIELDS - 1 {
        return Err(FormatError::TooFewFields {
            expected: BODY_FIELDS,
            found: delimiters + 1,
        });
    }

    let mut fields = body.splitn(BODY_FIELDS, DELIMITER);
    let mut next = || fields.next().unwrap_or_default().to_string();
    let sender = next();
    let command = next();
    let target = next();
    let sequence = next();
    let raw_timestamp = next();
    let payload = next();

    let timestamp = match raw_timestamp.parse::<u64>() {
        Ok(ts) => ts,
        Err(_) if profile.strict_timestamps => {
            return Err(FormatError::InvalidTimestamp(raw_timestamp));
        }
        Err(_) => {
            tracing::warn!(
                "[PROTOCOL] Non-numeric timestamp {:?} from {}, reading as 0",
                raw_timestamp,
                sender
            );
            0
        }
    };

    Ok(Message {
        sender,
        command,
        target,
        sequence,
        timestamp,
        payload,
        tag,
    })
}

/// frame as text with trailing line noise from the radio buffer removed
pub fn frame_text(raw: &[u8]) -> Result<&str, FormatError> {
    let text = std::str::from_utf8(raw).map_err(|_| FormatError::InvalidEncoding)?;
    Ok(text.trim_end_matches(['\0', '\r', '\n']))
}

fn split_tag(text: &str, mode: AuthMode) -> Result<(&str, Option<String>), FormatError> {
    let delimiters = text.matches(DELIMITER).count();
    let trailing = text.rfind(DELIMITER).map(|i| (&text[..i], &text[i + 1..]));

    match (mode, trailing) {
        (AuthMode::Open, _) => Ok((text, None)),
        (AuthMode::Advisory, Some((body, last)))
            if delimiters >= BODY_FIELDS && auth::looks_like_tag(last) =>
        {
            Ok((body, Some(last.to_string())))
        }
        (AuthMode::Advisory, _) => Ok((text, None)),
        (AuthMode::Required, _) if delimiters < BODY_FIELDS => Err(FormatError::TooFewFields {
            expected: BODY_FIELDS + 1,
            found: delimiters + 1,
        }),
        (AuthMode::Required, Some((body, last))) if auth::looks_like_tag(last) => {
            Ok((body, Some(last.to_string())))
        }
        (AuthMode::Required, _) => Err(FormatError::MissingTag),
    }
}

// ==============================================================================
// sequence numbers
// ==============================================================================

/// three-digit rolling sequence, "001" through "999" then back to "001"
#[derive(Debug, Default, Clone)]
pub struct SequenceCounter {
    counter: u16,
}

impl SequenceCounter {
    pub fn next(&mut self) -> String {
        self.counter = if self.counter >= 999 { 1 } else { self.counter + 1 };
        format!("{:03}", self.counter)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::{Rng, RngCore, SeedableRng};

    const SECRET: &str = "0123456789abcdef0123456789abcdef";

    fn open() -> FrameProfile {
        FrameProfile::default()
    }

    fn with(auth: AuthMode) -> FrameProfile {
        FrameProfile {
            auth,
            strict_timestamps: false,
        }
    }

    #[test]
    fn test_build_unsigned() {
        let frame = build("GW01", "POLL", "D1", "001", 1728567890, "null", None);
        assert_eq!(frame, b"GW01:POLL:D1:001:1728567890:null".to_vec());
    }

    #[test]
    fn test_build_empty_payload_uses_sentinel() {
        let frame = build("GW01", "POLL", "D1", "001", 5, "", None);
        assert_eq!(frame, b"GW01:POLL:D1:001:5:null".to_vec());
    }

    #[test]
    fn test_build_signed_appends_tag() {
        let frame = build("GW01", "POLL", "D1", "001", 1728567890, "null", Some(SECRET));
        assert_eq!(
            String::from_utf8(frame).unwrap(),
            "GW01:POLL:D1:001:1728567890:null:7da430cf7f7b866c"
        );
    }

    #[test]
    fn test_round_trip_signed() {
        let cases = [
            ("GW01", "POLL", "ED1-A3F2B", "001", 0u64, "null"),
            ("ED1-A3F2B", "ONLINE", "GW01", "042", 1728567890, "bat_95:rssi_-45:snr_8"),
            (
                "ED2-00FFA",
                "DATA",
                "GW01",
                "999",
                77,
                "BLR-13-IL-01:left:motherboard:40%,led_on:50%:1/5",
            ),
        ];
        for (sender, command, target, seq, ts, payload) in cases {
            let frame = build(sender, command, target, seq, ts, payload, Some(SECRET));
            let msg = parse(&frame, &with(AuthMode::Required)).unwrap();
            assert_eq!(msg.sender, sender);
            assert_eq!(msg.command, command);
            assert_eq!(msg.target, target);
            assert_eq!(msg.sequence, seq);
            assert_eq!(msg.timestamp, ts);
            assert_eq!(msg.payload, payload);
            assert_eq!(msg.tag.as_deref().map(str::len), Some(16));

            let text = String::from_utf8(frame).unwrap();
            assert!(auth::verify(&text, SECRET));
            assert!(!auth::verify(&text, "ffffffffffffffffffffffffffffffff"));
        }
    }

    #[test]
    fn test_open_profile_payload_absorbs_delimiters() {
        let msg = parse(b"ED1-A3F2B:ONLINE:GW01:003:12:bat_95:rssi_-45:snr_8", &open()).unwrap();
        assert_eq!(msg.payload, "bat_95:rssi_-45:snr_8");
        assert_eq!(msg.tag, None);
    }

    #[test]
    fn test_advisory_splits_tag_only_when_present() {
        let tagged = build("D1", "ONLINE", "GW01", "001", 1, "bat_50", Some(SECRET));
        let msg = parse(&tagged, &with(AuthMode::Advisory)).unwrap();
        assert_eq!(msg.payload, "bat_50");
        assert!(msg.tag.is_some());

        let msg = parse(b"D1:DATA:GW01:002:1:T1:left:cup:90%:2/5", &with(AuthMode::Advisory)).unwrap();
        assert_eq!(msg.payload, "T1:left:cup:90%:2/5");
        assert_eq!(msg.tag, None);
    }

    #[test]
    fn test_required_profile_rejects_untagged() {
        let err = parse(b"D1:ONLINE:GW01:001:1:null", &with(AuthMode::Required)).unwrap_err();
        assert_eq!(err, FormatError::TooFewFields { expected: 7, found: 6 });

        let err = parse(b"D1:ONLINE:GW01:001:1:bat_5:snr_3", &with(AuthMode::Required)).unwrap_err();
        assert_eq!(err, FormatError::MissingTag);
    }

    #[test]
    fn test_too_few_fields() {
        let err = parse(b"GW01:POLL:D1:001:5", &open()).unwrap_err();
        assert_eq!(err, FormatError::TooFewFields { expected: 6, found: 5 });
        assert!(parse(b"", &open()).is_err());
        assert!(parse(b":::::", &open()).is_ok());
    }

    #[test]
    fn test_non_numeric_timestamp() {
        let msg = parse(b"D1:ONLINE:GW01:001:soon:null", &open()).unwrap();
        assert_eq!(msg.timestamp, 0);

        let strict = FrameProfile {
            auth: AuthMode::Open,
            strict_timestamps: true,
        };
        let err = parse(b"D1:ONLINE:GW01:001:soon:null", &strict).unwrap_err();
        assert_eq!(err, FormatError::InvalidTimestamp("soon".to_string()));
    }

    #[test]
    fn test_trailing_line_noise_trimmed() {
        let msg = parse(b"D1:ONLINE:GW01:001:9:null\r\n\0", &open()).unwrap();
        assert_eq!(msg.payload, "null");
        assert!(msg.has_empty_payload());
    }

    #[test]
    fn test_invalid_utf8() {
        assert_eq!(
            parse(&[0xff, b':', 0xfe], &open()).unwrap_err(),
            FormatError::InvalidEncoding
        );
    }

    #[test]
    fn test_arbitrary_bytes_never_panic() {
        let mut rng = StdRng::seed_from_u64(0x9e37_79b9_7f4a_7c15);
        let alphabet = b"::::abcXYZ0129/_%-,\0\xff\xc3";
        for round in 0..2000 {
            let len = rng.gen_range(0..40);
            let bytes: Vec<u8> = if round % 4 == 0 {
                let mut raw = vec![0u8; len];
                rng.fill_bytes(&mut raw);
                raw
            } else {
                (0..len).map(|_| alphabet[rng.gen_range(0..alphabet.len())]).collect()
            };
            let delimiters = bytes.iter().filter(|b| **b == b':').count();
            for mode in [AuthMode::Open, AuthMode::Advisory, AuthMode::Required] {
                let result = parse(&bytes, &with(mode));
                if delimiters < 5 {
                    assert!(result.is_err());
                }
            }
        }
    }

    #[test]
    fn test_sequence_counts_and_wraps() {
        let mut seq = SequenceCounter::default();
        let mut previous = String::new();
        for i in 1..=999 {
            let s = seq.next();
            assert_eq!(s, format!("{:03}", i));
            assert!(s > previous);
            previous = s;
        }
        assert_eq!(previous, "999");
        assert_eq!(seq.next(), "001");
    }
}
