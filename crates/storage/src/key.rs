//! Object keys and payloads
//!
//! The object store has no directories: every path-like input is reduced to
//! its final `/`-delimited segment before it is used as a key.

use bytes::Bytes;
use tuner_core::{Error, Result};

/// Reduce a path to its final segment (`"a/b/c.png"` -> `"c.png"`)
///
/// Idempotent. A trailing slash yields an empty key, which callers reject.
pub fn normalize_key(path: &str) -> &str {
    path.rsplit('/').next().unwrap_or(path)
}

/// Normalized key, rejecting inputs that end in `/`, `.` or `..`
pub fn object_key(path: &str) -> Result<&str> {
    let key = normalize_key(path);
    if matches!(key, "" | "." | "..") {
        return Err(Error::InvalidArgument {
            message: format!("'{}' does not name an object", path),
        });
    }
    Ok(key)
}

/// Data handed to a batch write
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Payload {
    Binary(Bytes),
    Text(String),
}

impl Payload {
    /// Bytes sent over the wire; text is UTF-8 encoded
    pub fn into_bytes(self) -> Bytes {
        match self {
            Payload::Binary(bytes) => bytes,
            Payload::Text(text) => Bytes::from(text.into_bytes()),
        }
    }
}

impl From<Bytes> for Payload {
    fn from(bytes: Bytes) -> Self {
        Payload::Binary(bytes)
    }
}

impl From<Vec<u8>> for Payload {
    fn from(bytes: Vec<u8>) -> Self {
        Payload::Binary(Bytes::from(bytes))
    }
}

impl From<String> for Payload {
    fn from(text: String) -> Self {
        Payload::Text(text)
    }
}

impl From<&str> for Payload {
    fn from(text: &str) -> Self {
        Payload::Text(text.to_string())
    }
}
