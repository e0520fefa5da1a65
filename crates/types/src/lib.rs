use std::fmt;

use serde::de::{DeserializeOwned, Error as _};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use thiserror::Error;

/// A record that can live in a fixed-size storage slot.
///
/// `MAX_SIZE` is the largest number of bytes the record can occupy once
/// encoded with bincode's legacy (fixed-int, little endian) configuration.
/// Stores size their slots from it, so an implementation must never report
/// less than the real bound.
pub trait Storable: Serialize + DeserializeOwned + Clone + Default {
    const MAX_SIZE: usize;
}

macro_rules! fixed_width {
    ($($ty:ty => $size:expr),* $(,)?) => {
        $(
            impl Storable for $ty {
                const MAX_SIZE: usize = $size;
            }
        )*
    };
}

fixed_width! {
    () => 0,
    bool => 1,
    u8 => 1,
    i32 => 4,
    u32 => 4,
    i64 => 8,
    u64 => 8,
}

/// Raised when a value cannot be turned into a fixed-width record.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RecordError {
    #[error("string of {len} bytes exceeds the {max}-byte limit")]
    TooLong { len: usize, max: usize },
}

/// A UTF-8 string of at most `N` bytes.
///
/// Ordering is byte-wise lexicographic, which is what the book indexes
/// (ISBN, title, author, keyword) expect.
#[derive(Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct FixedString<const N: usize>(String);

impl<const N: usize> FixedString<N> {
    pub fn new(value: &str) -> Result<Self, RecordError> {
        if value.len() > N {
            return Err(RecordError::TooLong {
                len: value.len(),
                max: N,
            });
        }
        Ok(Self(value.to_owned()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl<const N: usize> fmt::Display for FixedString<N> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl<const N: usize> fmt::Debug for FixedString<N> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self.0)
    }
}

impl<const N: usize> Serialize for FixedString<N> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.0)
    }
}

impl<'de, const N: usize> Deserialize<'de> for FixedString<N> {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Self::new(&raw).map_err(D::Error::custom)
    }
}

impl<const N: usize> Storable for FixedString<N> {
    // u64 length prefix followed by the bytes.
    const MAX_SIZE: usize = 8 + N;
}
