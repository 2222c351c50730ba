use std::env;

use anyhow::{Context, Result, bail};

const DEFAULT_PORT: u16 = 5000;
const DEFAULT_MAX_CONNECTIONS: u32 = 10;
const DEFAULT_ANALYSIS_MODEL: &str = "gemini/gemini-1.5-flash";
const DEFAULT_TEMPERATURE: f32 = 0.7;
const DEFAULT_MAX_OUTPUT_TOKENS: u32 = 1024;

/// Process-wide settings resolved once at start-up.
#[derive(Clone, Debug)]
pub struct AppConfig {
    pub database_url: String,
    pub port: u16,
    pub max_connections: u32,
    pub analysis: AnalysisSettings,
}

/// Generation parameters used for every journal analysis call.
#[derive(Clone, Debug, PartialEq)]
pub struct AnalysisSettings {
    pub model: String,
    pub temperature: f32,
    pub max_output_tokens: u32,
}

impl Default for AnalysisSettings {
    fn default() -> Self {
        Self {
            model: DEFAULT_ANALYSIS_MODEL.to_string(),
            temperature: DEFAULT_TEMPERATURE,
            max_output_tokens: DEFAULT_MAX_OUTPUT_TOKENS,
        }
    }
}

impl AppConfig {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let database_url = non_blank(lookup("DATABASE_URL")).context("DATABASE_URL env var is missing")?;

        let port = parse_or(&lookup, "PORT", DEFAULT_PORT)?;
        let max_connections = parse_or(&lookup, "DATABASE_MAX_CONNECTIONS", DEFAULT_MAX_CONNECTIONS)?;
        if max_connections == 0 {
            bail!("DATABASE_MAX_CONNECTIONS must be greater than zero");
        }

        Ok(Self {
            database_url,
            port,
            max_connections,
            analysis: AnalysisSettings::from_lookup(&lookup)?,
        })
    }
}

impl AnalysisSettings {
    fn from_lookup(lookup: &impl Fn(&str) -> Option<String>) -> Result<Self> {
        let defaults = Self::default();

        let model = non_blank(lookup("JOURNAL_ANALYSIS_MODEL")).unwrap_or(defaults.model);
        let temperature = parse_or(lookup, "JOURNAL_ANALYSIS_TEMPERATURE", defaults.temperature)?;
        if !(0.0..=2.0).contains(&temperature) {
            bail!("JOURNAL_ANALYSIS_TEMPERATURE must be between 0.0 and 2.0, got {temperature}");
        }

        let max_output_tokens =
            parse_or(lookup, "JOURNAL_ANALYSIS_MAX_TOKENS", defaults.max_output_tokens)?;
        if max_output_tokens == 0 {
            bail!("JOURNAL_ANALYSIS_MAX_TOKENS must be greater than zero");
        }

        Ok(Self {
            model,
            temperature,
            max_output_tokens,
        })
    }
}

fn non_blank(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn parse_or<T>(lookup: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> Result<T>
where
    T: std::str::FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match non_blank(lookup(key)) {
        Some(raw) => raw
            .parse::<T>()
            .with_context(|| format!("invalid value for {key}: {raw:?}")),
        None => Ok(default),
    }
}
