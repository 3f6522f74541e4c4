//! Host Configuration

use anyhow::Context;
use evm_emulator::{EmulatorConfig, Genesis};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Configuration file of the `evm-emu` host
///
/// ```json
/// {
///   "chain": { "chain_id": 1074, "timestamp": { "mode": "wall_clock" } },
///   "genesis": { "alloc": { "0x...": { "balance": "0x3e8" } } }
/// }
/// ```
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct HostConfig {
    /// Chain parameters
    pub chain: EmulatorConfig,
    /// Genesis allocation; must stay the same for an existing data directory
    pub genesis: Genesis,
}

impl HostConfig {
    /// Load from `path`, or defaults with an empty genesis when absent
    pub fn load(path: Option<&Path>) -> anyhow::Result<Self> {
        let Some(path) = path else {
            return Ok(Self::default());
        };
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("reading config {}", path.display()))?;
        serde_json::from_str(&contents).with_context(|| format!("parsing config {}", path.display()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_load_missing_path_gives_defaults() {
        let config = HostConfig::load(None).unwrap();
        assert!(config.genesis.alloc.is_empty());
        assert_eq!(config.chain.chain_id, evm_emulator::DEFAULT_CHAIN_ID);
    }

    #[test]
    fn test_load_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{
                "chain": {{ "chain_id": 31337 }},
                "genesis": {{ "alloc": {{ "0x00000000000000000000000000000000000000aa": {{ "balance": "0x10" }} }} }}
            }}"#
        )
        .unwrap();

        let config = HostConfig::load(Some(file.path())).unwrap();
        assert_eq!(config.chain.chain_id, 31337);
        assert_eq!(config.genesis.alloc.len(), 1);
    }
}
