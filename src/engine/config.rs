// Assembly configuration

//! Engine settings for one assembly, layered from defaults, an optional
//! file and `CONCERTO__*` environment variables.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::Result;

/// What happens to a transition whose action failed
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FailurePolicy {
    /// The transition stays active and never delivers its token
    #[default]
    Hold,
    /// The failure is reported and the token moves on as if it succeeded
    Proceed,
}

/// Checkpoint-and-exit policy for intermittently active deployments
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SleepPolicy {
    pub enabled: bool,
    /// Sleep once this much time has passed without any active transition
    pub initial_timeout_ms: u64,
    /// Sleep once a pass made no progress this long after the last one that did
    pub waiting_rate_ms: u64,
    pub exit_code: i32,
}

impl Default for SleepPolicy {
    fn default() -> Self {
        Self {
            enabled: false,
            initial_timeout_ms: 60_000,
            waiting_rate_ms: 10_000,
            exit_code: 50,
        }
    }
}

impl SleepPolicy {
    pub fn initial_timeout(&self) -> Duration {
        Duration::from_millis(self.initial_timeout_ms)
    }

    pub fn waiting_rate(&self) -> Duration {
        Duration::from_millis(self.waiting_rate_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssemblyConfig {
    /// Assembly id, used in `wait/` and `barrier/` keys and as the
    /// checkpoint file name
    pub name: String,
    pub checkpoint_dir: String,
    /// Sleep between two passes of the control loop
    pub poll_interval_ms: u64,
    /// How long one handshake poll waits for the peer's marker
    pub handshake_interval_ms: u64,
    /// Run actions on the control thread instead of spawning them
    pub dry_run: bool,
    pub failure_policy: FailurePolicy,
    pub sleep_policy: SleepPolicy,
}

impl Default for AssemblyConfig {
    fn default() -> Self {
        Self {
            name: "assembly".to_string(),
            checkpoint_dir: "~/.concerto/checkpoints".to_string(),
            poll_interval_ms: 50,
            handshake_interval_ms: 100,
            dry_run: false,
            failure_policy: FailurePolicy::Hold,
            sleep_policy: SleepPolicy::default(),
        }
    }
}

impl AssemblyConfig {
    pub fn named<S: Into<String>>(name: S) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    /// Loads the configuration: defaults, then `path` if given, then
    /// `CONCERTO__*` variables (`CONCERTO__SLEEP_POLICY__ENABLED=true`)
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut builder = config::Config::builder();

        builder = builder.add_source(config::Config::try_from(&AssemblyConfig::default())?);

        if let Some(path) = path {
            builder = builder.add_source(config::File::from(path.to_path_buf()));
        }

        builder = builder.add_source(
            config::Environment::with_prefix("CONCERTO")
                .prefix_separator("__")
                .separator("__")
                .try_parsing(true),
        );

        Ok(builder.build()?.try_deserialize()?)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn handshake_interval(&self) -> Duration {
        Duration::from_millis(self.handshake_interval_ms)
    }

    /// Checkpoint directory with `~` and variables expanded
    pub fn checkpoint_path(&self) -> PathBuf {
        match shellexpand::full(&self.checkpoint_dir) {
            Ok(expanded) => PathBuf::from(expanded.into_owned()),
            Err(_) => PathBuf::from(&self.checkpoint_dir),
        }
    }
}
