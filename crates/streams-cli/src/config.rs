use std::fs;
use std::path::{Path, PathBuf};

use anyhow::Context;
use serde::{Deserialize, Serialize};
use streams_ingest::UpstreamConfig;
use streams_server::ServerConfig;
use streams_store::StoreOptions;

use crate::cli::RunArgs;

/// Everything `streams run` needs, as read from the optional TOML file.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeConfig {
    pub root: RootDir,
    pub store: StoreOptions,
    pub upstream: UpstreamConfig,
    pub server: ServerConfig,
}

/// Storage root; one database directory per stream lives beneath it.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RootDir(pub PathBuf);

impl Default for RootDir {
    fn default() -> Self {
        Self(PathBuf::from("binance.d"))
    }
}

impl NodeConfig {
    /// Read `path`, or fall back to defaults when no file is given.
    pub fn load(path: Option<&Path>) -> anyhow::Result<Self> {
        let Some(path) = path else {
            return Ok(Self::default());
        };
        let text = fs::read_to_string(path)
            .with_context(|| format!("read config {}", path.display()))?;
        toml::from_str(&text).with_context(|| format!("parse config {}", path.display()))
    }

    /// Command-line flags win over the file.
    pub fn apply_overrides(&mut self, args: &RunArgs) {
        if let Some(root) = &args.root {
            self.root = RootDir(root.clone());
        }
        if let Some(bind) = args.bind {
            self.server.bind_addr = bind;
        }
    }

    pub fn root(&self) -> &Path {
        &self.root.0
    }
}
