use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::queue::AutoFlush;

/// Defaults for a new tree. Services passed to the `Reference` constructors
/// override what this selects.
///
/// ```toml
/// root_path = "/"
/// auto_flush = { delay = 10 }
/// push_seed = 7
/// clock_start_millis = 1700000000000
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TreeConfig {
    #[serde(default = "default_root_path")]
    pub root_path: String,
    #[serde(default)]
    pub auto_flush: AutoFlush,
    /// Seed for the random part of push keys.
    #[serde(default)]
    pub push_seed: u64,
    /// Start time of the manual clock used by `Reference::new`.
    #[serde(default)]
    pub clock_start_millis: u64,
}

impl Default for TreeConfig {
    fn default() -> Self {
        Self {
            root_path: default_root_path(),
            auto_flush: AutoFlush::default(),
            push_seed: 0,
            clock_start_millis: 0,
        }
    }
}

impl TreeConfig {
    pub fn from_toml(source: &str) -> Result<Self> {
        let config: Self = toml::from_str(source)?;
        if !config.root_path.starts_with('/') {
            return Err(Error::Config(format!(
                "root_path must start with '/', got {:?}",
                config.root_path
            )));
        }
        Ok(config)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let source = std::fs::read_to_string(path)
            .map_err(|err| Error::Config(format!("reading {}: {err}", path.display())))?;
        Self::from_toml(&source)
    }
}

fn default_root_path() -> String {
    "/".to_string()
}
