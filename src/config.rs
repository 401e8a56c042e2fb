//! Startup configuration: spec §4.6/§6. Read once, eagerly, before the
//! listener binds; any failure is Configuration-fatal (§7).

use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{bail, Context};
use env_flags::env_flags;

env_flags! {
    /// Mandatory shared secret; the service refuses to start without it.
    pub PYSESSION_TOKEN: Option<&str> = None;

    pub PYSESSION_PORT: u16 = 8000;

    /// Defaults to the process's startup cwd when unset.
    pub PYSESSION_WORKDIR: Option<&str> = None;

    /// Seconds; 0 disables per-call timeouts.
    pub PYSESSION_EXEC_TIMEOUT_SECS: u64 = 30;

    /// Not part of the distilled HTTP-facing config surface; a test-tooling
    /// knob for the history ring's capacity (§3 names 100 as the default).
    pub PYSESSION_HISTORY_CAPACITY: usize = 100;
}

#[derive(Clone)]
pub struct Config {
    pub token: String,
    pub port: u16,
    pub workdir: PathBuf,
    pub default_timeout: Option<Duration>,
    pub history_capacity: usize,
}

impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field("token", &"<redacted>")
            .field("port", &self.port)
            .field("workdir", &self.workdir)
            .field("default_timeout", &self.default_timeout)
            .field("history_capacity", &self.history_capacity)
            .finish()
    }
}

impl Config {
    /// Loads and validates configuration from the environment. Every failure
    /// path here is Configuration-fatal (spec §7): the caller is expected to
    /// log the error and exit non-zero rather than attempt to run degraded.
    pub fn load() -> anyhow::Result<Self> {
        let token = (*PYSESSION_TOKEN)
            .filter(|t| !t.is_empty())
            .map(str::to_owned)
            .context("PYSESSION_TOKEN must be set to a non-empty secret")?;

        let workdir = match *PYSESSION_WORKDIR {
            Some(raw) => PathBuf::from(raw),
            None => std::env::current_dir().context("could not resolve process startup cwd")?,
        };
        let workdir = workdir
            .canonicalize()
            .with_context(|| format!("configured workdir {} does not exist", workdir.display()))?;
        if !workdir.is_dir() {
            bail!("configured workdir {} is not a directory", workdir.display());
        }

        let default_timeout = match *PYSESSION_EXEC_TIMEOUT_SECS {
            0 => None,
            secs => Some(Duration::from_secs(secs)),
        };

        if *PYSESSION_PORT == 0 {
            bail!("PYSESSION_PORT must be a non-zero port number");
        }

        Ok(Config {
            token,
            port: *PYSESSION_PORT,
            workdir,
            default_timeout,
            history_capacity: *PYSESSION_HISTORY_CAPACITY,
        })
    }
}
