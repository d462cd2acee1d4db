use anyhow::{anyhow, Context, Result};
use std::collections::HashMap;
use crate::parsing::parse_interval;
use crate::schedule::{parse_clock_time, parse_weekday};
use crate::types::Config;

const DEFAULT_EXCLUDED_NAMESPACES: &str = "kube-system,kube-public,kube-node-lease";

/// Trait for abstracting environment variable access
pub trait EnvironmentProvider {
    fn get_var(&self, key: &str) -> Option<String>;
}

/// Production implementation using std::env
pub struct SystemEnvironment;

impl EnvironmentProvider for SystemEnvironment {
    fn get_var(&self, key: &str) -> Option<String> {
        std::env::var(key).ok()
    }
}

/// Mock implementation for testing
#[derive(Debug, Default)]
pub struct MockEnvironment {
    vars: HashMap<String, String>,
}

impl MockEnvironment {
    pub fn new() -> Self {
        Self {
            vars: HashMap::new(),
        }
    }

    pub fn set_var<K, V>(&mut self, key: K, value: V) -> &mut Self
    where
        K: Into<String>,
        V: Into<String>,
    {
        self.vars.insert(key.into(), value.into());
        self
    }

    pub fn with_var<K, V>(mut self, key: K, value: V) -> Self
    where
        K: Into<String>,
        V: Into<String>,
    {
        self.set_var(key, value);
        self
    }
}

impl EnvironmentProvider for MockEnvironment {
    fn get_var(&self, key: &str) -> Option<String> {
        self.vars.get(key).cloned()
    }
}

pub fn load_config() -> Result<Config> {
    load_config_with_env(&SystemEnvironment)
}

/// Empty values count as unset, so `FOO=` falls back to the default.
fn var_or<E: EnvironmentProvider>(env: &E, key: &str, default: &str) -> String {
    env.get_var(key)
        .filter(|v| !v.trim().is_empty())
        .unwrap_or_else(|| default.to_string())
}

pub fn parse_comma_separated(s: &str) -> Vec<String> {
    s.split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

pub fn load_config_with_env<E: EnvironmentProvider>(env: &E) -> Result<Config> {
    let cluster_name = var_or(env, "CLUSTER_NAME", "default");

    // An explicitly empty list disables exclusion entirely.
    let namespaces_exclude = match env.get_var("NAMESPACES_EXCLUDE") {
        Some(v) => parse_comma_separated(&v),
        None => parse_comma_separated(DEFAULT_EXCLUDED_NAMESPACES),
    };

    let interval_raw = var_or(env, "SNAPSHOT_INTERVAL", "3h");
    let snapshot_interval = parse_interval(&interval_raw)
        .filter(|d| !d.is_zero())
        .ok_or_else(|| anyhow!("Invalid SNAPSHOT_INTERVAL: {}", interval_raw))?;

    let retention_weeks: u32 = var_or(env, "RETENTION_WEEKS", "2")
        .trim()
        .parse()
        .context("Invalid RETENTION_WEEKS")?;
    if retention_weeks < 1 {
        return Err(anyhow!("RETENTION_WEEKS must be at least 1"));
    }

    let report_day = var_or(env, "REPORT_DAY", "monday").trim().to_lowercase();
    parse_weekday(&report_day).context("Invalid REPORT_DAY")?;

    let report_time = var_or(env, "REPORT_TIME", "09:00").trim().to_string();
    parse_clock_time(&report_time).context("Invalid REPORT_TIME (expected HH:MM)")?;

    let database_path = var_or(env, "DATABASE_PATH", "/data/kube-observer.db");
    let log_level = var_or(env, "LOG_LEVEL", "info").to_lowercase();

    let metrics_enabled = env.get_var("METRICS_ENABLED")
        .filter(|v| !v.trim().is_empty())
        .map(|v| matches!(v.trim(), "1" | "true" | "TRUE" | "True"))
        .unwrap_or(true);

    Ok(Config {
        cluster_name,
        namespaces_exclude,
        snapshot_interval,
        report_day,
        report_time,
        retention_weeks,
        database_path,
        log_level,
        metrics_enabled,
    })
}
