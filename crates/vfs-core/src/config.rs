//! Publish configuration read from the environment.

use std::env;

use crate::defaults;
use crate::error::{Error, Result};

/// Settings of the publish engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PublishConfig {
    /// Number of history entries kept; older ones are purged on publish.
    pub history_size: usize,
}

impl Default for PublishConfig {
    fn default() -> Self {
        Self {
            history_size: defaults::PUBLISH_HISTORY_SIZE,
        }
    }
}

impl PublishConfig {
    /// Read `PUBLISH_HISTORY_SIZE`, falling back to the default when unset.
    ///
    /// A present but unparsable or zero value is a configuration error.
    pub fn from_env() -> Result<Self> {
        match env::var(defaults::ENV_PUBLISH_HISTORY_SIZE) {
            Ok(raw) => Self::default().with_history_size_str(&raw),
            Err(_) => Ok(Self::default()),
        }
    }

    pub fn with_history_size(mut self, history_size: usize) -> Result<Self> {
        if history_size == 0 {
            return Err(Error::Config(
                "publish history size must be at least 1".to_string(),
            ));
        }
        self.history_size = history_size;
        Ok(self)
    }

    fn with_history_size_str(self, raw: &str) -> Result<Self> {
        let size = raw.trim().parse::<usize>().map_err(|e| {
            Error::Config(format!(
                "{}='{}' is not a number: {}",
                defaults::ENV_PUBLISH_HISTORY_SIZE,
                raw,
                e
            ))
        })?;
        self.with_history_size(size)
    }
}
