// Licensed to the Apache Software Foundation (ASF) under one
// or more contributor license agreements.  See the NOTICE file
// distributed with this work for additional information
// regarding copyright ownership.  The ASF licenses this file
// to you under the Apache License, Version 2.0 (the
// "License"); you may not use this file except in compliance
// with the License.  You may obtain a copy of the License at
//
//   http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing,
// software distributed under the License is distributed on an
// "AS IS" BASIS, WITHOUT WARRANTIES OR CONDITIONS OF ANY
// KIND, either express or implied.  See the License for the
// specific language governing permissions and limitations
// under the License.
use anyhow::{Context, Result, anyhow};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

static CONFIG: OnceLock<NovaRocksRemoteConfig> = OnceLock::new();

const CONFIG_ENV: &str = "NOVAROCKS_REMOTE_CONFIG";
const DEFAULT_CONFIG_FILE: &str = "novarocks_remote.toml";

fn default_log_level() -> String {
    "info".to_string()
}

pub fn init_from_path(path: impl AsRef<Path>) -> Result<&'static NovaRocksRemoteConfig> {
    if let Some(cfg) = CONFIG.get() {
        return Ok(cfg);
    }
    let path = path.as_ref().to_path_buf();
    let cfg = NovaRocksRemoteConfig::load_from_file(&path)?;
    let _ = CONFIG.set(cfg);
    Ok(CONFIG.get().expect("CONFIG set"))
}

pub fn init_from_env_or_default() -> Result<&'static NovaRocksRemoteConfig> {
    if let Some(cfg) = CONFIG.get() {
        return Ok(cfg);
    }
    let path = config_path_from_env_or_default()?;
    let cfg = NovaRocksRemoteConfig::load_from_file(&path)?;
    let _ = CONFIG.set(cfg);
    Ok(CONFIG.get().expect("CONFIG set"))
}

pub fn config() -> Result<&'static NovaRocksRemoteConfig> {
    init_from_env_or_default()
}

fn config_path_from_env_or_default() -> Result<PathBuf> {
    if let Ok(p) = std::env::var(CONFIG_ENV) {
        if !p.trim().is_empty() {
            return Ok(PathBuf::from(p));
        }
    }

    let candidate = PathBuf::from(DEFAULT_CONFIG_FILE);
    if candidate.exists() {
        return Ok(candidate);
    }

    Err(anyhow!(
        "missing config file: set ${CONFIG_ENV} or create ./{DEFAULT_CONFIG_FILE}"
    ))
}

#[derive(Clone, Debug, Deserialize)]
pub struct NovaRocksRemoteConfig {
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Optional full tracing EnvFilter expression.
    /// If set, this takes precedence over `log_level`.
    /// Example: "novarocks_remote=debug"
    #[serde(default)]
    pub log_filter: Option<String>,

    #[serde(default)]
    pub remote: RemoteConfig,

    #[serde(default)]
    pub debug: DebugConfig,
}

impl NovaRocksRemoteConfig {
    pub fn load_from_file(path: &Path) -> Result<Self> {
        let s = std::fs::read_to_string(path)
            .with_context(|| format!("read config file: {}", path.display()))?;
        Self::parse(&s).with_context(|| format!("parse toml: {}", path.display()))
    }

    pub fn parse(s: &str) -> Result<Self> {
        let cfg: NovaRocksRemoteConfig = toml::from_str(s)?;
        cfg.remote.validate()?;
        Ok(cfg)
    }
}

impl Default for NovaRocksRemoteConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            log_filter: None,
            remote: RemoteConfig::default(),
            debug: DebugConfig::default(),
        }
    }
}

/// Knobs for remote source processors and the reference pipe driver.
#[derive(Clone, Debug, Deserialize)]
pub struct RemoteConfig {
    /// Default read mode for pipes built without an explicit choice.
    #[serde(default = "default_async_read")]
    pub async_read: bool,
    /// Upper bound on one wait for a remote descriptor before the driver gives up.
    #[serde(default = "default_async_wait_timeout_ms")]
    pub async_wait_timeout_ms: u64,
    /// Granularity of descriptor polling; cancellation is observed at this period.
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
}

fn default_async_read() -> bool {
    true
}
fn default_async_wait_timeout_ms() -> u64 {
    300_000
}
fn default_poll_interval_ms() -> u64 {
    100
}

impl RemoteConfig {
    fn validate(&self) -> Result<()> {
        if self.poll_interval_ms == 0 {
            return Err(anyhow!("remote.poll_interval_ms must be positive"));
        }
        if self.async_wait_timeout_ms < self.poll_interval_ms {
            return Err(anyhow!(
                "remote.async_wait_timeout_ms ({}) must not be smaller than remote.poll_interval_ms ({})",
                self.async_wait_timeout_ms,
                self.poll_interval_ms
            ));
        }
        Ok(())
    }
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            async_read: default_async_read(),
            async_wait_timeout_ms: default_async_wait_timeout_ms(),
            poll_interval_ms: default_poll_interval_ms(),
        }
    }
}

#[derive(Clone, Debug, Default, Deserialize)]
pub struct DebugConfig {
    /// Log every chunk handed out by a remote source.
    #[serde(default)]
    pub log_remote_chunks: bool,
}
