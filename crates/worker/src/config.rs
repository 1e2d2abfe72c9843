//! Environment-driven run configuration.

use std::env;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{bail, Context};

/// One backend endpoint, parsed from `DROVER_TARGETS`.
#[derive(Debug, Clone)]
pub struct TargetConfig {
    /// Model name sent on the wire and used as the result-map key.
    pub name: String,
    pub url: String,
}

/// Immutable run configuration, assembled once at startup. Workers
/// receive shared references and never mutate it.
#[derive(Debug, Clone)]
pub struct RunConfig {
    /// JSON file holding the job list: `[{"id", "title"}, ...]`.
    pub jobs_path: PathBuf,
    /// Plain-text system instruction; its hash is the dedup key.
    pub instruction_path: PathBuf,
    pub out_dir: PathBuf,
    pub targets: Vec<TargetConfig>,
    pub request_timeout: Duration,
    pub retry_limit: u32,
    pub max_batch_size: usize,
    pub max_turns: usize,
    /// Automatic compliance-reminder cadence; zero disables it.
    pub reminder_interval: usize,
    /// Per-target task cap for smoke runs.
    pub task_cap: Option<usize>,
}

impl RunConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        Ok(Self {
            jobs_path: PathBuf::from(required("DROVER_JOBS")?),
            instruction_path: PathBuf::from(required("DROVER_INSTRUCTION")?),
            out_dir: PathBuf::from(
                env::var("DROVER_OUT_DIR").unwrap_or_else(|_| "results".to_string()),
            ),
            targets: parse_targets(&required("DROVER_TARGETS")?)?,
            request_timeout: Duration::from_secs(parsed_or("DROVER_REQUEST_TIMEOUT_SECS", 90)?),
            retry_limit: parsed_or("DROVER_RETRY_LIMIT", 2)?,
            max_batch_size: parsed_or("DROVER_MAX_BATCH_SIZE", 4)?,
            max_turns: parsed_or("DROVER_MAX_TURNS", 20)?,
            reminder_interval: parsed_or("DROVER_REMINDER_INTERVAL", 0)?,
            task_cap: optional_parsed("DROVER_TASK_CAP")?,
        })
    }
}

fn required(name: &str) -> anyhow::Result<String> {
    env::var(name).with_context(|| format!("Missing required environment variable {name}"))
}

fn parsed_or<T: std::str::FromStr>(name: &str, default: T) -> anyhow::Result<T>
where
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match env::var(name) {
        Ok(raw) => raw
            .parse()
            .with_context(|| format!("Invalid value for {name}: {raw}")),
        Err(_) => Ok(default),
    }
}

fn optional_parsed<T: std::str::FromStr>(name: &str) -> anyhow::Result<Option<T>>
where
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match env::var(name) {
        Ok(raw) => Ok(Some(
            raw.parse()
                .with_context(|| format!("Invalid value for {name}: {raw}"))?,
        )),
        Err(_) => Ok(None),
    }
}

/// Parse `name=url[,name=url...]`.
fn parse_targets(raw: &str) -> anyhow::Result<Vec<TargetConfig>> {
    let mut targets = Vec::new();
    for entry in raw.split(',').map(str::trim).filter(|e| !e.is_empty()) {
        let Some((name, url)) = entry.split_once('=') else {
            bail!("Invalid DROVER_TARGETS entry (expected name=url): {entry}");
        };
        let (name, url) = (name.trim(), url.trim());
        if name.is_empty() || url.is_empty() {
            bail!("Invalid DROVER_TARGETS entry (empty name or url): {entry}");
        }
        targets.push(TargetConfig {
            name: name.to_string(),
            url: url.to_string(),
        });
    }
    if targets.is_empty() {
        bail!("DROVER_TARGETS defined no targets");
    }
    Ok(targets)
}
