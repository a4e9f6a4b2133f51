//! NMEA-0183 frame decoder.
//!
//! Frame format: `$` + talker (2 chars) + type + `,` + comma-separated
//! fields + `*` + two hex checksum digits + CR LF.
//!
//! The decoder is a pure function over one received chunk. Both supported
//! transports deliver whole frames per chunk (UDP preserves datagram
//! boundaries, TCP senders emit whole lines), so no state is kept across
//! calls and an incomplete trailing frame is discarded. Garbage before a
//! `$` is skipped without comment; structurally broken frames between
//! terminators are counted so the session can report them.

use std::time::SystemTime;

use super::sentence::Sentence;

/// Shortest frame worth looking at: `$` + 5 payload bytes.
const MIN_FRAME_LEN: usize = 6;

/// Shortest payload that can hold a talker, a type and a comma.
const MIN_PAYLOAD_LEN: usize = 5;

/// Result of decoding one chunk.
#[derive(Debug, Default)]
pub struct ParsedChunk {
    /// Well-formed sentences in input order. A sentence with a bad or
    /// unparsable checksum is still yielded, flagged invalid.
    pub sentences: Vec<Sentence>,
    /// Count of terminated frames that were structurally unusable (too
    /// short, no comma after the type).
    pub malformed: u64,
}

/// Decode every complete NMEA frame contained in `data`.
///
/// Bytes before the first `$` are dropped. A frame without a CR or LF
/// terminator ends the scan; the incomplete tail is discarded.
pub fn parse_chunk(data: &[u8], received_at: SystemTime) -> ParsedChunk {
    let mut out = ParsedChunk::default();
    let mut pos = 0;

    while pos < data.len() {
        let Some(start_off) = data[pos..].iter().position(|&b| b == b'$') else {
            break;
        };
        let start = pos + start_off;

        let Some(term_off) = data[start..]
            .iter()
            .position(|&b| b == b'\r' || b == b'\n')
        else {
            break;
        };
        let term = start + term_off;
        let frame = &data[start..term];

        // Skip the whole CR/LF run so "\r\n" (and sloppy "\n\n") cost one step.
        pos = term;
        while pos < data.len() && (data[pos] == b'\r' || data[pos] == b'\n') {
            pos += 1;
        }

        if frame.len() < MIN_FRAME_LEN {
            log::trace!("dropping short frame ({} bytes)", frame.len());
            out.malformed += 1;
            continue;
        }

        match decode_frame(frame, received_at) {
            Some(sentence) => out.sentences.push(sentence),
            None => {
                log::trace!("dropping unframeable payload ({} bytes)", frame.len());
                out.malformed += 1;
            }
        }
    }

    out
}

/// Decode one `$`-to-terminator frame into a sentence.
///
/// Returns `None` when the payload has no room for talker + type + comma.
fn decode_frame(frame: &[u8], received_at: SystemTime) -> Option<Sentence> {
    debug_assert!(frame[0] == b'$');

    // The checksum trailer is the last '*' followed by at least two
    // characters. Anything else means the frame carried no usable trailer
    // and the whole remainder is payload.
    let star = frame
        .iter()
        .rposition(|&b| b == b'*')
        .filter(|&idx| frame.len() >= idx + 3);

    let (payload, transmitted, checksum_present, checksum_hex_ok) = match star {
        Some(idx) => match parse_hex_pair(frame[idx + 1], frame[idx + 2]) {
            Some(value) => (&frame[1..idx], value, true, true),
            None => (&frame[1..idx], 0u8, true, false),
        },
        None => (&frame[1..], 0u8, false, false),
    };

    if payload.len() < MIN_PAYLOAD_LEN {
        return None;
    }

    let computed = payload.iter().fold(0u8, |acc, &b| acc ^ b);

    // Talker is the first two characters, type runs to the first comma.
    let comma = payload[2..].iter().position(|&b| b == b',')? + 2;

    let talker = ascii_string(&payload[0..2]);
    let sentence_type = ascii_string(&payload[2..comma]);
    let fields: Vec<String> = payload[comma + 1..]
        .split(|&b| b == b',')
        .map(ascii_string)
        .collect();

    let valid = checksum_present && checksum_hex_ok && transmitted == computed;
    let checksum = if checksum_present { transmitted } else { computed };

    Some(Sentence::new(
        talker,
        sentence_type,
        fields,
        checksum,
        frame.to_vec(),
        received_at,
        valid,
    ))
}

/// Two hex digits to a byte; accepts both `a-f` and `A-F`.
fn parse_hex_pair(hi: u8, lo: u8) -> Option<u8> {
    let hi = (hi as char).to_digit(16)? as u8;
    let lo = (lo as char).to_digit(16)? as u8;
    Some((hi << 4) | lo)
}

/// Bytes to a string one byte per char, preserving non-ASCII values.
fn ascii_string(bytes: &[u8]) -> String {
    bytes.iter().map(|&b| b as char).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    const GGA: &[u8] =
        b"$GNGGA,123519,4807.038,N,01131.000,E,1,08,0.9,545.4,M,47.0,M,,*51\r\n";
    const RMC: &[u8] =
        b"$GNRMC,123519,A,4807.038,N,01131.000,E,022.4,084.4,230394,003.1,W*74\r\n";

    fn now() -> SystemTime {
        SystemTime::now()
    }

    #[test]
    fn test_valid_gga_parse() {
        let parsed = parse_chunk(GGA, now());
        assert_eq!(parsed.sentences.len(), 1);
        assert_eq!(parsed.malformed, 0);

        let s = &parsed.sentences[0];
        assert_eq!(s.talker(), "GN");
        assert_eq!(s.sentence_type(), "GGA");
        assert_eq!(s.full_type(), "GNGGA");
        assert_eq!(s.checksum(), 0x51);
        assert!(s.is_valid());
        assert_eq!(s.field(0), Some("123519"));
        assert_eq!(s.field(1), Some("4807.038"));
        assert_eq!(s.field(2), Some("N"));
    }

    #[test]
    fn test_raw_round_trip_strips_line_ending_only() {
        let parsed = parse_chunk(GGA, now());
        let s = &parsed.sentences[0];
        assert_eq!(s.raw(), &GGA[..GGA.len() - 2]);
        assert_eq!(s.raw()[0], b'$');
        assert!(!s.raw().contains(&b'\r'));
        assert!(!s.raw().contains(&b'\n'));
    }

    #[test]
    fn test_bad_checksum_yields_invalid_sentence() {
        let input =
            b"$GNGGA,123519,4807.038,N,01131.000,E,1,08,0.9,545.4,M,47.0,M,,*99\r\n";
        let parsed = parse_chunk(input, now());
        assert_eq!(parsed.sentences.len(), 1);

        let s = &parsed.sentences[0];
        assert!(!s.is_valid());
        assert_eq!(s.checksum(), 0x99);
        assert_eq!(s.full_type(), "GNGGA");
    }

    #[test]
    fn test_lowercase_checksum_hex_accepted() {
        let input = b"$GNGLL,4916.45,N,12311.12,W,225444,A*2f\r\n";
        let parsed = parse_chunk(input, now());
        assert_eq!(parsed.sentences.len(), 1);
        assert!(parsed.sentences[0].is_valid());
        assert_eq!(parsed.sentences[0].checksum(), 0x2F);
    }

    #[test]
    fn test_non_hex_checksum_reported_as_zero() {
        let input = b"$GNGLL,4916.45,N,12311.12,W,225444,A*ZZ\r\n";
        let parsed = parse_chunk(input, now());
        assert_eq!(parsed.sentences.len(), 1);

        let s = &parsed.sentences[0];
        assert!(!s.is_valid());
        assert_eq!(s.checksum(), 0);
    }

    #[test]
    fn test_missing_checksum_reports_computed_value() {
        let input = b"$GNGLL,4916.45,N,12311.12,W,225444,A\r\n";
        let parsed = parse_chunk(input, now());
        assert_eq!(parsed.sentences.len(), 1);

        let s = &parsed.sentences[0];
        assert!(!s.is_valid());
        assert_eq!(s.checksum(), 0x2F);
        assert_eq!(s.raw(), &input[..input.len() - 2]);
    }

    #[test]
    fn test_concatenated_frames_parse_in_order() {
        let mut input = Vec::new();
        input.extend_from_slice(GGA);
        input.extend_from_slice(RMC);

        let parsed = parse_chunk(&input, now());
        assert_eq!(parsed.sentences.len(), 2);
        assert_eq!(parsed.sentences[0].full_type(), "GNGGA");
        assert_eq!(parsed.sentences[1].full_type(), "GNRMC");
    }

    #[test]
    fn test_incomplete_tail_discarded() {
        let mut input = Vec::new();
        input.extend_from_slice(GGA);
        input.extend_from_slice(b"$GNRMC,1235");

        let parsed = parse_chunk(&input, now());
        assert_eq!(parsed.sentences.len(), 1);
        assert_eq!(parsed.sentences[0].full_type(), "GNGGA");
        assert_eq!(parsed.malformed, 0);
    }

    #[test]
    fn test_garbage_before_start_skipped() {
        let mut input = b"\x00\xffnoise".to_vec();
        input.extend_from_slice(GGA);

        let parsed = parse_chunk(&input, now());
        assert_eq!(parsed.sentences.len(), 1);
        assert_eq!(parsed.malformed, 0);
    }

    #[test]
    fn test_short_frame_counted_malformed() {
        let parsed = parse_chunk(b"$GP\r\n", now());
        assert!(parsed.sentences.is_empty());
        assert_eq!(parsed.malformed, 1);
    }

    #[test]
    fn test_payload_without_comma_counted_malformed() {
        let parsed = parse_chunk(b"$GPXYZ12*00\r\n", now());
        assert!(parsed.sentences.is_empty());
        assert_eq!(parsed.malformed, 1);
    }

    #[test]
    fn test_empty_and_trailing_fields_preserved() {
        let parsed = parse_chunk(GGA, now());
        let s = &parsed.sentences[0];
        // "...,M,47.0,M,," ends with two empty fields.
        let fields = s.fields();
        assert_eq!(fields[fields.len() - 1], "");
        assert_eq!(fields[fields.len() - 2], "");
        assert_eq!(fields.len(), 14);
    }

    #[test]
    fn test_bare_lf_terminator_accepted() {
        let input = b"$GNGLL,4916.45,N,12311.12,W,225444,A*2F\n";
        let parsed = parse_chunk(input, now());
        assert_eq!(parsed.sentences.len(), 1);
        assert!(parsed.sentences[0].is_valid());
    }

    #[test]
    fn test_checksum_determinism() {
        // valid iff transmitted equals the XOR of the payload bytes
        for (trailer, expect_valid) in [("2F", true), ("30", false), ("00", false)] {
            let input = format!("$GNGLL,4916.45,N,12311.12,W,225444,A*{}\r\n", trailer);
            let parsed = parse_chunk(input.as_bytes(), now());
            assert_eq!(parsed.sentences.len(), 1);
            assert_eq!(parsed.sentences[0].is_valid(), expect_valid, "trailer {}", trailer);
        }
    }

    #[test]
    fn test_many_frames_non_destructive() {
        let mut input = Vec::new();
        for _ in 0..20 {
            input.extend_from_slice(GGA);
            input.extend_from_slice(RMC);
        }
        let parsed = parse_chunk(&input, now());
        assert_eq!(parsed.sentences.len(), 40);
        assert!(parsed.sentences.iter().all(|s| s.is_valid()));
    }

    #[test]
    fn test_proprietary_talker_prefix() {
        // Proprietary sentences have a one-letter talker convention; the
        // framer still splits two talker chars and the rest as type.
        let input = b"$PGRME,22.0,M,52.9,M,66.6,M*16\r\n";
        let parsed = parse_chunk(input, now());
        assert_eq!(parsed.sentences.len(), 1);

        let s = &parsed.sentences[0];
        assert!(s.is_valid());
        assert_eq!(s.talker(), "PG");
        assert_eq!(s.sentence_type(), "RME");
    }
}
