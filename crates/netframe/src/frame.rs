//! Pure (no I/O) framing helpers shared by the blocking and resumable
//! workers: building/parsing the length header and the JSON payload codec.

use serde_json::Value;

use crate::{
    error::{NetframeError, Result},
    settings::{HeaderMode, Settings},
};

/// Serializes `value` to JSON, frames it per `settings`, and returns the
/// bytes ready to write to the wire (`header ∥ payload`).
pub fn encode_value(value: &Value, settings: &Settings) -> Result<Vec<u8>> {
    let payload = serde_json::to_vec(value)?;
    encode_frame(&payload, settings)
}

/// Builds `header ∥ payload` for an already-serialized payload.
pub fn encode_frame(payload: &[u8], settings: &Settings) -> Result<Vec<u8>> {
    let len_str = payload.len().to_string();
    let mut out = Vec::with_capacity(len_str.len() + settings.header_terminator().len() + payload.len());

    match settings.header_mode() {
        HeaderMode::FixedLength => {
            if len_str.len() > settings.header_length() {
                return Err(NetframeError::MessageLengthExceedsHeaderCapacity {
                    len: payload.len(),
                    header_length: settings.header_length(),
                });
            }
            out.extend_from_slice(len_str.as_bytes());
            out.resize(settings.header_length(), b' ');
        }
        HeaderMode::DelimiterTerminated => {
            out.extend_from_slice(len_str.as_bytes());
            out.extend_from_slice(settings.header_terminator());
        }
    }

    out.extend_from_slice(payload);
    Ok(out)
}

/// Decodes a payload (`encoding`-decoded text, then a single JSON value).
pub fn decode_payload(bytes: &[u8]) -> Result<Value> {
    Ok(serde_json::from_slice(bytes)?)
}

/// Parses a fixed-length header: strips trailing ASCII spaces, parses the
/// remaining decimal digits. `raw` must be exactly `header_length` bytes.
pub fn parse_fixed_header(raw: &[u8]) -> Result<usize> {
    let trimmed = trim_trailing_spaces(raw);
    parse_length_decimal(trimmed)
}

/// Parses ASCII decimal digits into a byte count. Empty or non-digit
/// content is a malformed header — fatal on that connection per spec.
pub fn parse_length_decimal(bytes: &[u8]) -> Result<usize> {
    if bytes.is_empty() || !bytes.iter().all(u8::is_ascii_digit) {
        return Err(NetframeError::MalformedHeader);
    }
    std::str::from_utf8(bytes).ok().and_then(|s| s.parse().ok()).ok_or(NetframeError::MalformedHeader)
}

fn trim_trailing_spaces(raw: &[u8]) -> &[u8] {
    let end = raw.iter().rposition(|&b| b != b' ').map_or(0, |i| i + 1);
    &raw[..end]
}

/// Finds the first occurrence of `needle` in `haystack`, or `None`.
/// `needle` is never empty in practice (`Settings` invariant).
pub fn find_terminator(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    if needle.is_empty() || haystack.len() < needle.len() {
        return None;
    }
    haystack.windows(needle.len()).position(|w| w == needle)
}
