//! `fault.toml` project configuration.
//!
//! ```toml
//! [synthesis]
//! num_tests = 8
//! seed = 42
//!
//! [process]
//! cwd = "build"
//! inherit_env = true
//! env = { VERILATOR_ROOT = "/opt/verilator" }
//!
//! [[circuit]]
//! name = "Adder"
//! ports = [
//!     { name = "a", width = 4, direction = "in" },
//!     { name = "out", width = 5, direction = "out" },
//! ]
//! ```

use crate::circuit::Circuit;
use crate::synth::SynthesisOptions;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use thiserror::Error;

pub const CONFIG_FILE: &str = "fault.toml";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("cannot read {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("invalid configuration in {}: {source}", .path.display())]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SynthesisSection {
    pub num_tests: Option<usize>,
    pub seed: Option<u64>,
}

/// Defaults for the subprocess utility.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ProcessSection {
    pub cwd: Option<PathBuf>,
    pub env: BTreeMap<String, String>,
    /// Start from the parent process environment and overlay `env`.
    pub inherit_env: bool,
}

impl Default for ProcessSection {
    fn default() -> Self {
        Self {
            cwd: None,
            env: BTreeMap::new(),
            inherit_env: true,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FaultConfig {
    pub synthesis: SynthesisSection,
    pub process: ProcessSection,
    #[serde(rename = "circuit")]
    pub circuits: Vec<Circuit>,
}

impl FaultConfig {
    pub fn parse(text: &str, path: &Path) -> Result<Self, ConfigError> {
        let mut config: Self = toml::from_str(text).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        // A relative cwd is relative to the file, not to wherever we run.
        if let (Some(cwd), Some(dir)) = (&config.process.cwd, path.parent()) {
            if cwd.is_relative() {
                config.process.cwd = Some(dir.join(cwd));
            }
        }
        Ok(config)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::parse(&text, path)
    }

    /// Loads the nearest `fault.toml` in `dir` or one of its ancestors.
    pub fn search_from(dir: impl AsRef<Path>) -> Result<Option<(PathBuf, Self)>, ConfigError> {
        for ancestor in dir.as_ref().ancestors() {
            let candidate = ancestor.join(CONFIG_FILE);
            if candidate.is_file() {
                let config = Self::load(&candidate)?;
                log::debug!("using {}", candidate.display());
                return Ok(Some((candidate, config)));
            }
        }
        Ok(None)
    }

    /// Synthesis options with the configured values applied over the defaults.
    pub fn synthesis_options(&self) -> SynthesisOptions {
        let defaults = SynthesisOptions::default();
        SynthesisOptions {
            num_tests: self.synthesis.num_tests.unwrap_or(defaults.num_tests),
            seed: self.synthesis.seed.or(defaults.seed),
            ..defaults
        }
    }
}
