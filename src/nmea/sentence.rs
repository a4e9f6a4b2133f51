//! Parsed NMEA sentence record.

use std::time::SystemTime;

/// One parsed NMEA-0183 sentence.
///
/// The record is immutable and keeps the exact byte image it was framed
/// from (`$` through the checksum digits, no CR/LF) so downstream consumers
/// receive frames byte-identical to what the receiver emitted. Only the
/// parser constructs sentences.
#[derive(Debug, Clone)]
pub struct Sentence {
    talker: String,
    sentence_type: String,
    fields: Vec<String>,
    checksum: u8,
    raw: Vec<u8>,
    received_at: SystemTime,
    valid: bool,
}

impl Sentence {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        talker: String,
        sentence_type: String,
        fields: Vec<String>,
        checksum: u8,
        raw: Vec<u8>,
        received_at: SystemTime,
        valid: bool,
    ) -> Self {
        Sentence {
            talker,
            sentence_type,
            fields,
            checksum,
            raw,
            received_at,
            valid,
        }
    }

    /// Talker identifier, e.g. `GN` or `GP`.
    pub fn talker(&self) -> &str {
        &self.talker
    }

    /// Sentence type, e.g. `GGA`.
    pub fn sentence_type(&self) -> &str {
        &self.sentence_type
    }

    /// Canonical identity: talker + type, e.g. `GNGGA`.
    pub fn full_type(&self) -> String {
        format!("{}{}", self.talker, self.sentence_type)
    }

    /// Data fields in wire order; empty fields are preserved.
    pub fn fields(&self) -> &[String] {
        &self.fields
    }

    pub fn field(&self, index: usize) -> Option<&str> {
        self.fields.get(index).map(String::as_str)
    }

    /// Checksum as transmitted, or the computed value when the frame
    /// carried none.
    pub fn checksum(&self) -> u8 {
        self.checksum
    }

    /// Exact original bytes from `$` through the last character before
    /// CR/LF, including the `*HH` trailer when present.
    pub fn raw(&self) -> &[u8] {
        &self.raw
    }

    pub fn received_at(&self) -> SystemTime {
        self.received_at
    }

    /// True iff the transmitted checksum matched the XOR of all bytes
    /// between `$` and `*`.
    pub fn is_valid(&self) -> bool {
        self.valid
    }
}
