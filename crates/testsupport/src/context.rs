//! Isolated on-disk test environments.

use common::{Config, DbResult};
use std::path::Path;
use tempfile::TempDir;

/// A temporary data directory plus the configuration pointing at it.
///
/// Store files created through [`TestContext::config`] are removed when the
/// context is dropped.
///
/// # Example
///
/// ```
/// use testsupport::prelude::*;
///
/// let ctx = TestContext::with_cache(8, 0).unwrap();
/// assert_eq!(ctx.config().cache_capacity, 0);
/// assert!(ctx.config().index_path("test").starts_with(ctx.data_dir()));
/// ```
pub struct TestContext {
    temp_dir: TempDir,
    config: Config,
}

impl TestContext {
    /// Small stores and a small cache, sized for unit tests.
    pub fn new(degree: usize) -> DbResult<Self> {
        Self::with_cache(degree, 16)
    }

    pub fn with_cache(degree: usize, cache_capacity: usize) -> DbResult<Self> {
        let temp_dir = tempfile::tempdir()?;
        let config = Config::builder()
            .data_dir(temp_dir.path().to_path_buf())
            .degree(degree)
            .node_capacity(1024)
            .value_capacity(4096)
            .cache_capacity(cache_capacity)
            .build();
        config.validate()?;
        Ok(Self { temp_dir, config })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn data_dir(&self) -> &Path {
        self.temp_dir.path()
    }
}
