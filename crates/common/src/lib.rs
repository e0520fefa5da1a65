
use serde::{Deserialize, Serialize};
use std::{fmt, io, path::PathBuf};
use thiserror::Error;
use types::{RecordError, Storable};

/// Handle to one slot of a fixed-capacity block store.
///
/// A pointer is only an offset; the store that issued it owns the slot.
/// "Null" is spelled `Option<BlockPointer>::None` wherever a link may be
/// absent, and any offset at or past a store's capacity is rejected by
/// that store.
/// Examples:
/// - `let root = BlockPointer(0);`
/// - `let right_sibling = BlockPointer(17);`
#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct BlockPointer(pub u64);

impl BlockPointer {
    pub fn offset(self) -> u64 {
        self.0
    }
}

impl fmt::Display for BlockPointer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

impl Storable for BlockPointer {
    const MAX_SIZE: usize = 8;
}

/// Canonical error type shared across the storage engine.
#[derive(Error, Debug)]
pub enum DbError {
    #[error("{store}: slot {offset} out of range (capacity {capacity})")]
    OutOfRange {
        store: String,
        offset: u64,
        capacity: u64,
    },
    #[error("{store}: slot {offset} is not allocated")]
    Unallocated { store: String, offset: u64 },
    #[error("{store}: no free slot left")]
    StoreFull { store: String },
    #[error("codec: {0}")]
    Codec(String),
    #[error("layout: {0}")]
    Layout(String),
    #[error("invariant violated: {0}")]
    Invariant(String),
    #[error("invalid record: {0}")]
    InvalidRecord(#[from] RecordError),
    #[error(transparent)]
    Io(#[from] io::Error),
}

/// Result alias that carries a `DbError`.
pub type DbResult<T> = Result<T, DbError>;

/// Runtime configuration for a multimap session.
///
/// # Example
/// ```
/// use common::Config;
/// use std::path::PathBuf;
///
/// let config = Config::builder()
///     .data_dir(PathBuf::from("./bookstore"))
///     .degree(32)
///     .node_capacity(2048)
///     .value_capacity(1 << 16)
///     .cache_capacity(256)
///     .build();
/// assert!(config.validate().is_ok());
/// ```
#[derive(Clone, Debug, Serialize, Deserialize, bon::Builder)]
pub struct Config {
    /// Directory holding the index-node and value-list store files.
    #[builder(default = PathBuf::from("./blink_data"))]
    pub data_dir: PathBuf,
    /// Entries a node may hold before it must split.
    #[builder(default = 64)]
    pub degree: usize,
    /// Slot count of the index-node store.
    #[builder(default = 4096)]
    pub node_capacity: u64,
    /// Slot count of the value-list store.
    #[builder(default = 65536)]
    pub value_capacity: u64,
    /// Entries kept by the value-list head cache; 0 turns it off.
    #[builder(default = 1024)]
    pub cache_capacity: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./blink_data"),
            degree: 64,
            node_capacity: 4096,
            value_capacity: 65536,
            cache_capacity: 1024,
        }
    }
}

impl Config {
    /// Non-root nodes keep at least `degree / 2` entries, which must be 2 or more.
    pub const MIN_DEGREE: usize = 4;

    pub fn validate(&self) -> DbResult<()> {
        if self.degree < Self::MIN_DEGREE {
            return Err(DbError::Layout(format!(
                "degree {} is below the minimum of {}",
                self.degree,
                Self::MIN_DEGREE
            )));
        }
        if self.node_capacity == 0 || self.value_capacity == 0 {
            return Err(DbError::Layout("store capacities must be non-zero".into()));
        }
        Ok(())
    }

    /// Path of the index-node store for the session named `name`.
    pub fn index_path(&self, name: &str) -> PathBuf {
        self.data_dir.join(format!("{name}_index.blk"))
    }

    /// Path of the value-list store for the session named `name`.
    pub fn vlist_path(&self, name: &str) -> PathBuf {
        self.data_dir.join(format!("{name}_vlist.blk"))
    }
}
