//! Index configuration file parsing (fileset.toml)

use std::path::Path;

use crate::chunker::DEFAULT_BLOCK_SIZE;

/// Config file name
pub const CONFIG_FILE: &str = "fileset.toml";

/// Tunables for chunking and the on-disk index
#[derive(Debug, Clone, PartialEq, Eq, serde::Deserialize)]
#[serde(default)]
pub struct IndexConfig {
    /// Block size used when chunking and verifying files
    pub block_size: usize,
    /// Maximum size of the LMDB memory map in bytes
    pub map_size: usize,
    /// Maximum number of concurrent LMDB readers
    pub max_readers: u32,
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            block_size: DEFAULT_BLOCK_SIZE,
            map_size: 1 << 30,
            max_readers: 126,
        }
    }
}

impl IndexConfig {
    /// Load config from a root directory.
    ///
    /// Returns default config if `fileset.toml` doesn't exist.
    ///
    /// # Errors
    /// Returns an error if the file exists but cannot be parsed, or if it
    /// sets a zero block size.
    pub fn load(root: &Path) -> color_eyre::Result<Self> {
        let config_path = root.join(CONFIG_FILE);
        let config = if config_path.exists() {
            let content = std::fs::read_to_string(&config_path)?;
            toml::from_str::<Self>(&content)?
        } else {
            Self::default()
        };

        color_eyre::eyre::ensure!(config.block_size > 0, "block_size must be non-zero");
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_full_config() {
        let toml = r"
block_size = 4096
map_size = 1048576
max_readers = 8
";

        let config: IndexConfig = toml::from_str(toml).unwrap();
        assert_eq!(config.block_size, 4096);
        assert_eq!(config.map_size, 1_048_576);
        assert_eq!(config.max_readers, 8);
    }

    #[test]
    fn test_parse_empty_config() {
        let config: IndexConfig = toml::from_str("").unwrap();
        assert_eq!(config, IndexConfig::default());
        assert_eq!(config.block_size, 128 * 1024);
    }

    #[test]
    fn test_load_missing_file_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = IndexConfig::load(dir.path()).unwrap();
        assert_eq!(config, IndexConfig::default());
    }

    #[test]
    fn test_load_rejects_zero_block_size() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(CONFIG_FILE), "block_size = 0\n").unwrap();
        assert!(IndexConfig::load(dir.path()).is_err());
    }
}
