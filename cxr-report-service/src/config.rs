//! Service configuration, read once from the environment at startup.

use cxr_flow::{PhraseMatch, QualityGate, quality};
use std::path::PathBuf;
use thiserror::Error;

pub const DEFAULT_MODEL: &str = "openai/gpt-4o-mini";
pub const DEFAULT_PORT: u16 = 3000;
pub const DEFAULT_RECORDS_PATH: &str = "records.yaml";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{0} environment variable is required")]
    Missing(&'static str),

    #[error("invalid value for {name}: {value:?} ({reason})")]
    Invalid {
        name: &'static str,
        value: String,
        reason: String,
    },
}

#[derive(Debug, Clone)]
pub struct Config {
    pub api_key: String,
    pub port: u16,
    pub records_path: PathBuf,
    pub patient_filter: Option<i64>,
    pub reader_model: String,
    pub anchor_model: String,
    pub max_attempts: u32,
    pub min_report_chars: usize,
    pub phrase_match: PhraseMatch,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Builds the config from any variable lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());

        let api_key = var("OPENROUTER_API_KEY").ok_or(ConfigError::Missing("OPENROUTER_API_KEY"))?;

        Ok(Self {
            api_key,
            port: parse_or("PORT", var("PORT"), DEFAULT_PORT)?,
            records_path: var("CXR_RECORDS_PATH")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from(DEFAULT_RECORDS_PATH)),
            patient_filter: var("CXR_PATIENT_ID")
                .map(|v| parse("CXR_PATIENT_ID", &v))
                .transpose()?,
            reader_model: var("CXR_READER_MODEL").unwrap_or_else(|| DEFAULT_MODEL.to_string()),
            anchor_model: var("CXR_ANCHOR_MODEL").unwrap_or_else(|| DEFAULT_MODEL.to_string()),
            max_attempts: parse_or(
                "CXR_MAX_ATTEMPTS",
                var("CXR_MAX_ATTEMPTS"),
                quality::MAX_ANALYSIS_ATTEMPTS,
            )?,
            min_report_chars: parse_or(
                "CXR_MIN_REPORT_CHARS",
                var("CXR_MIN_REPORT_CHARS"),
                quality::MIN_REPORT_CHARS,
            )?,
            phrase_match: match var("CXR_PHRASE_MATCH") {
                None => PhraseMatch::default(),
                Some(v) => parse_phrase_match(&v)?,
            },
        })
    }

    pub fn quality_gate(&self) -> QualityGate {
        QualityGate::default()
            .with_min_chars(self.min_report_chars)
            .with_match_mode(self.phrase_match)
    }
}

fn parse<T>(name: &'static str, value: &str) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    value.trim().parse::<T>().map_err(|e| ConfigError::Invalid {
        name,
        value: value.to_string(),
        reason: e.to_string(),
    })
}

fn parse_or<T>(name: &'static str, value: Option<String>, default: T) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match value {
        Some(v) => parse(name, &v),
        None => Ok(default),
    }
}

fn parse_phrase_match(value: &str) -> Result<PhraseMatch, ConfigError> {
    match value.trim().to_lowercase().as_str() {
        "substring" => Ok(PhraseMatch::Substring),
        "word" | "whole_word" => Ok(PhraseMatch::WholeWord),
        _ => Err(ConfigError::Invalid {
            name: "CXR_PHRASE_MATCH",
            value: value.to_string(),
            reason: "expected `substring` or `word`".to_string(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name: &str| map.get(name).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = Config::from_lookup(lookup(&[("OPENROUTER_API_KEY", "key")])).unwrap();
        assert_eq!(config.port, 3000);
        assert_eq!(config.records_path, PathBuf::from("records.yaml"));
        assert_eq!(config.patient_filter, None);
        assert_eq!(config.reader_model, "openai/gpt-4o-mini");
        assert_eq!(config.max_attempts, 15);
        assert_eq!(config.min_report_chars, 500);
        assert_eq!(config.phrase_match, PhraseMatch::Substring);
    }

    #[test]
    fn test_missing_api_key() {
        let err = Config::from_lookup(lookup(&[("PORT", "8080")])).unwrap_err();
        assert_eq!(err, ConfigError::Missing("OPENROUTER_API_KEY"));
    }

    #[test]
    fn test_overrides() {
        let config = Config::from_lookup(lookup(&[
            ("OPENROUTER_API_KEY", "key"),
            ("PORT", "8080"),
            ("CXR_PATIENT_ID", "2"),
            ("CXR_MAX_ATTEMPTS", "3"),
            ("CXR_MIN_REPORT_CHARS", "200"),
            ("CXR_PHRASE_MATCH", "Word"),
        ]))
        .unwrap();
        assert_eq!(config.port, 8080);
        assert_eq!(config.patient_filter, Some(2));
        assert_eq!(config.max_attempts, 3);
        let gate = config.quality_gate();
        assert_eq!(gate.min_chars, 200);
        assert_eq!(gate.match_mode, PhraseMatch::WholeWord);
    }

    #[test]
    fn test_invalid_number() {
        let err = Config::from_lookup(lookup(&[
            ("OPENROUTER_API_KEY", "key"),
            ("CXR_MAX_ATTEMPTS", "many"),
        ]))
        .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { name: "CXR_MAX_ATTEMPTS", .. }));
    }

    #[test]
    fn test_invalid_phrase_match() {
        let err = Config::from_lookup(lookup(&[
            ("OPENROUTER_API_KEY", "key"),
            ("CXR_PHRASE_MATCH", "regex"),
        ]))
        .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { name: "CXR_PHRASE_MATCH", .. }));
    }
}
