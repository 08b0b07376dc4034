//! Opaque sync cursor encoding
//!
//! The cursor is a base64 wrapper around a millisecond timestamp. Clients
//! treat it as opaque; the server decodes it for incremental pulls, and
//! decoded values order the same way the underlying sync times do.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;

use crate::error::{Error, Result};

/// Encode a sync timestamp (Unix ms) as an opaque cursor token
#[must_use]
pub fn encode_cursor(at_ms: i64) -> String {
    URL_SAFE_NO_PAD.encode(format!("{at_ms:020}"))
}

/// Decode a cursor token back to its timestamp (Unix ms)
pub fn decode_cursor(cursor: &str) -> Result<i64> {
    let bytes = URL_SAFE_NO_PAD
        .decode(cursor)
        .map_err(|_| Error::InvalidCursor(cursor.to_string()))?;
    let text = std::str::from_utf8(&bytes).map_err(|_| Error::InvalidCursor(cursor.to_string()))?;
    text.parse()
        .map_err(|_| Error::InvalidCursor(cursor.to_string()))
}
