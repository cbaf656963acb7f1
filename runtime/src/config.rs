//! Run configuration from `WAITLINE_*` environment variables.
//!
//! Unset or unparsable values fall back to defaults. CLI flags are applied
//! on top by the binary.

use std::path::PathBuf;

pub const DEFAULT_CONCURRENCY: usize = 8;
pub const DEFAULT_FETCH_TIMEOUT_MS: u64 = 10_000;
pub const DEFAULT_RENDER_TIMEOUT_MS: u64 = 30_000;
pub const DEFAULT_RUN_BUDGET_MS: u64 = 300_000;

/// Downstream endpoint told about each finished run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NotifyConfig {
    pub url: String,
    /// Sent as a bearer token.
    pub secret: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunConfig {
    pub db_path: PathBuf,
    /// Read targets from this JSON file instead of the database.
    pub targets_file: Option<PathBuf>,
    /// Targets processed at once.
    pub concurrency: usize,
    pub fetch_timeout_ms: u64,
    pub render_timeout_ms: u64,
    /// Total time for a run; targets still pending afterwards time out.
    pub run_budget_ms: u64,
    pub notify: Option<NotifyConfig>,
    pub chromium_path: Option<PathBuf>,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            db_path: default_db_path(),
            targets_file: None,
            concurrency: DEFAULT_CONCURRENCY,
            fetch_timeout_ms: DEFAULT_FETCH_TIMEOUT_MS,
            render_timeout_ms: DEFAULT_RENDER_TIMEOUT_MS,
            run_budget_ms: DEFAULT_RUN_BUDGET_MS,
            notify: None,
            chromium_path: None,
        }
    }
}

impl RunConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let string = |name: &str| {
            lookup(name)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };
        let number = |name: &str, default_value: u64| {
            string(name)
                .and_then(|v| v.parse::<u64>().ok())
                .unwrap_or(default_value)
                .max(1)
        };

        let notify = string("WAITLINE_NOTIFY_URL").map(|url| NotifyConfig {
            url,
            secret: string("WAITLINE_NOTIFY_SECRET"),
        });

        Self {
            db_path: string("WAITLINE_DB_PATH")
                .map(PathBuf::from)
                .unwrap_or_else(default_db_path),
            targets_file: string("WAITLINE_TARGETS_FILE").map(PathBuf::from),
            concurrency: number("WAITLINE_CONCURRENCY", DEFAULT_CONCURRENCY as u64) as usize,
            fetch_timeout_ms: number("WAITLINE_FETCH_TIMEOUT_MS", DEFAULT_FETCH_TIMEOUT_MS),
            render_timeout_ms: number("WAITLINE_RENDER_TIMEOUT_MS", DEFAULT_RENDER_TIMEOUT_MS),
            run_budget_ms: number("WAITLINE_RUN_BUDGET_MS", DEFAULT_RUN_BUDGET_MS),
            notify,
            chromium_path: string("WAITLINE_CHROMIUM_PATH").map(PathBuf::from),
        }
    }
}

/// `~/.waitline/waitline.db`, or under `/tmp` without a home directory.
pub fn default_db_path() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("/tmp"))
        .join(".waitline")
        .join("waitline.db")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config(vars: &[(&str, &str)]) -> RunConfig {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        RunConfig::from_lookup(|name| map.get(name).cloned())
    }

    #[test]
    fn test_defaults() {
        let cfg = config(&[]);
        assert_eq!(cfg, RunConfig::default());
        assert!(cfg.db_path.ends_with(".waitline/waitline.db"));
        assert!(cfg.notify.is_none());
    }

    #[test]
    fn test_overrides() {
        let cfg = config(&[
            ("WAITLINE_DB_PATH", "/var/lib/waitline/status.db"),
            ("WAITLINE_TARGETS_FILE", "targets.json"),
            ("WAITLINE_CONCURRENCY", "3"),
            ("WAITLINE_FETCH_TIMEOUT_MS", "2500"),
            ("WAITLINE_NOTIFY_URL", "https://cache.example.org/revalidate"),
            ("WAITLINE_NOTIFY_SECRET", " s3cret "),
        ]);
        assert_eq!(cfg.db_path, PathBuf::from("/var/lib/waitline/status.db"));
        assert_eq!(cfg.targets_file, Some(PathBuf::from("targets.json")));
        assert_eq!(cfg.concurrency, 3);
        assert_eq!(cfg.fetch_timeout_ms, 2500);
        assert_eq!(cfg.render_timeout_ms, DEFAULT_RENDER_TIMEOUT_MS);
        let notify = cfg.notify.unwrap();
        assert_eq!(notify.secret.as_deref(), Some("s3cret"));
    }

    #[test]
    fn test_bad_values_fall_back() {
        let cfg = config(&[
            ("WAITLINE_CONCURRENCY", "0"),
            ("WAITLINE_RUN_BUDGET_MS", "soon"),
            ("WAITLINE_NOTIFY_SECRET", "orphan"),
        ]);
        assert_eq!(cfg.concurrency, 1);
        assert_eq!(cfg.run_budget_ms, DEFAULT_RUN_BUDGET_MS);
        assert!(cfg.notify.is_none());
    }
}
