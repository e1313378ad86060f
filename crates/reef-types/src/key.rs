//! File identity derivation.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Longest key accepted; keys become file names on storage nodes.
pub const MAX_KEY_LEN: usize = 255;

/// Character substituted for separators when deriving a key.
const FILLER: char = '_';

/// Errors from deriving a [`FileKey`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum KeyError {
    /// No name was supplied.
    #[error("cannot build a storage key without a file name")]
    Empty,

    /// The derived key is too long to be stored.
    #[error("file name too long: {len} bytes (max {MAX_KEY_LEN})")]
    TooLong {
        /// Length of the derived key in bytes.
        len: usize,
    },
}

/// Storage identity of an uploaded file.
///
/// Derived from the uploaded file name by replacing whitespace, path
/// separators and extension dots with `_`. Distinct names may collapse to
/// the same key (`"a b"` and `"a_b"`); the later upload wins.
///
/// Decoding re-applies normalization, so a key received off the wire can
/// never carry a path separator.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct FileKey(String);

impl FileKey {
    /// Derive the key for a file name.
    pub fn resolve(name: &str) -> Result<Self, KeyError> {
        if name.is_empty() {
            return Err(KeyError::Empty);
        }

        let key: String = name
            .chars()
            .map(|c| match c {
                ' ' | '/' | '\\' | '.' => FILLER,
                other => other,
            })
            .collect();

        if key.len() > MAX_KEY_LEN {
            return Err(KeyError::TooLong { len: key.len() });
        }

        Ok(Self(key))
    }

    /// Return the key as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for FileKey {
    type Error = KeyError;

    fn try_from(name: String) -> Result<Self, Self::Error> {
        Self::resolve(&name)
    }
}

impl From<FileKey> for String {
    fn from(key: FileKey) -> Self {
        key.0
    }
}

impl AsRef<str> for FileKey {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for FileKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Debug for FileKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "FileKey({})", self.0)
    }
}
