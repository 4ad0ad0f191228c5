use std::{str::FromStr, time::Duration};

use chrono::{Days, NaiveDate};
use encoding_rs::Encoding;
use reqwest::Url;

use crate::{error::EtlError, sink::WriteMode};

pub const DEFAULT_DYNAMIC_URL: &str = "https://www.cbr.ru/scripts/XML_dynamic.asp";
pub const DEFAULT_CATALOG_URL: &str = "https://www.cbr.ru/scripts/XML_valFull.asp";

/// USD and EUR in the CBR registry.
pub const DEFAULT_TRACKED_CURRENCIES: [&str; 2] = ["R01235", "R01239"];
pub const DEFAULT_DAYS_BACK: u64 = 30;
/// A century of history, far below what `NaiveDate` can subtract.
pub const MAX_DAYS_BACK: u64 = 36_525;

/// What to do with a single record that fails conversion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ParseFailurePolicy {
    /// Log the record and keep going with the rest of the document.
    #[default]
    Skip,
    /// Reject the whole document.
    FailFast,
}

impl FromStr for ParseFailurePolicy {
    type Err = EtlError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "skip" => Ok(ParseFailurePolicy::Skip),
            "fail-fast" | "fail_fast" => Ok(ParseFailurePolicy::FailFast),
            other => Err(EtlError::config(format!(
                "unknown parse failure policy {other:?}, expected skip or fail-fast"
            ))),
        }
    }
}

/// Everything a run needs, built once at start-up and passed by reference.
#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub force_reference_refresh: bool,
    pub days_back: u64,
    pub tracked_currencies: Vec<String>,
    pub rates_write_mode: WriteMode,
    pub parse_failure_policy: ParseFailurePolicy,
    pub dynamic_url: Url,
    pub catalog_url: Url,
    pub source_encoding: &'static Encoding,
    pub http_timeout: Option<Duration>,
    pub db_schema: String,
    pub rates_table: String,
    pub reference_table: String,
}

impl Config {
    pub fn from_env() -> Result<Self, EtlError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, EtlError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |key: &str| {
            lookup(key)
                .map(|value| value.trim().to_string())
                .filter(|value| !value.is_empty())
        };

        let database_url =
            var("DATABASE_URL").ok_or_else(|| EtlError::config("DATABASE_URL is not set"))?;

        let force_reference_refresh = var("INIT_LOAD").is_some_and(|value| value == "1");

        let days_back = match var("DAYS_BACK") {
            Some(value) => value
                .parse::<u64>()
                .map_err(|e| EtlError::config(format!("DAYS_BACK={value:?}: {e}")))?,
            None => DEFAULT_DAYS_BACK,
        };
        if days_back > MAX_DAYS_BACK {
            return Err(EtlError::config(format!(
                "DAYS_BACK={days_back} is above the {MAX_DAYS_BACK} day limit"
            )));
        }

        let tracked_currencies = match var("TRACKED_CURRENCIES") {
            Some(value) => parse_tracked(&value)?,
            None => DEFAULT_TRACKED_CURRENCIES
                .iter()
                .map(|id| id.to_string())
                .collect(),
        };

        let rates_write_mode = var("RATES_WRITE_MODE")
            .map(|value| value.parse::<WriteMode>())
            .transpose()?
            .unwrap_or(WriteMode::Replace);

        let parse_failure_policy = var("PARSE_FAILURE_POLICY")
            .map(|value| value.parse::<ParseFailurePolicy>())
            .transpose()?
            .unwrap_or_default();

        let encoding_label = var("SOURCE_ENCODING").unwrap_or_else(|| "windows-1251".to_string());
        let source_encoding = Encoding::for_label(encoding_label.as_bytes()).ok_or_else(|| {
            EtlError::config(format!("unknown SOURCE_ENCODING {encoding_label:?}"))
        })?;

        let http_timeout = match var("HTTP_TIMEOUT_SECS") {
            Some(value) => Some(Duration::from_secs(value.parse::<u64>().map_err(|e| {
                EtlError::config(format!("HTTP_TIMEOUT_SECS={value:?}: {e}"))
            })?)),
            None => None,
        };

        let db_schema = var("DB_SCHEMA").unwrap_or_else(|| "public".to_string());
        let rates_table = var("RATES_TABLE").unwrap_or_else(|| "exchange_rates".to_string());
        let reference_table =
            var("REFERENCE_TABLE").unwrap_or_else(|| "currency_reference".to_string());

        let dynamic_url = parse_url("CBR_DYNAMIC_URL", var("CBR_DYNAMIC_URL"), DEFAULT_DYNAMIC_URL)?;
        let catalog_url = parse_url("CBR_CATALOG_URL", var("CBR_CATALOG_URL"), DEFAULT_CATALOG_URL)?;

        for name in [&db_schema, &rates_table, &reference_table] {
            if !is_identifier(name) {
                return Err(EtlError::config(format!("{name:?} is not a valid SQL identifier")));
            }
        }

        Ok(Config {
            database_url,
            force_reference_refresh,
            days_back,
            tracked_currencies,
            rates_write_mode,
            parse_failure_policy,
            dynamic_url,
            catalog_url,
            source_encoding,
            http_timeout,
            db_schema,
            rates_table,
            reference_table,
        })
    }

    /// First day of the trailing rate window ending at `today`.
    pub fn window_start(&self, today: NaiveDate) -> NaiveDate {
        today
            .checked_sub_days(Days::new(self.days_back))
            .unwrap_or(NaiveDate::MIN)
    }

    pub fn rates_table_name(&self) -> String {
        self.qualified(&self.rates_table)
    }

    pub fn reference_table_name(&self) -> String {
        self.qualified(&self.reference_table)
    }

    fn qualified(&self, table: &str) -> String {
        format!("{}.{}", self.db_schema, table)
    }
}

fn parse_url(key: &str, value: Option<String>, default: &str) -> Result<Url, EtlError> {
    let value = value.unwrap_or_else(|| default.to_string());
    let url = Url::parse(&value).map_err(|e| EtlError::config(format!("{key}={value:?}: {e}")))?;

    if !matches!(url.scheme(), "http" | "https") {
        return Err(EtlError::config(format!("{key}={value:?} is not an http(s) url")));
    }

    Ok(url)
}

fn parse_tracked(value: &str) -> Result<Vec<String>, EtlError> {
    let mut ids: Vec<String> = Vec::new();
    for id in value.split(',').map(str::trim).filter(|id| !id.is_empty()) {
        if !ids.iter().any(|known| known == id) {
            ids.push(id.to_string());
        }
    }

    if ids.is_empty() {
        return Err(EtlError::config("TRACKED_CURRENCIES lists no currency ids"));
    }

    Ok(ids)
}

pub(crate) fn is_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}
