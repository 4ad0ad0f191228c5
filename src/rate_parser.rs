use std::{ops::RangeInclusive, str::FromStr};

use chrono::NaiveDate;
use log::warn;
use rust_decimal::Decimal;

use crate::{
    config::ParseFailurePolicy,
    error::EtlError,
    exchange_rate::ExchangeRate,
    val_curs::{self, Record, ValCurs},
};

/// Date format of the `Date` attribute, e.g. `05.08.2025`.
const RECORD_DATE_FORMAT: &str = "%d.%m.%Y";

/// Converts the daily records of one currency into rates tagged with
/// `currency_id`. Records dated outside `window` are dropped.
pub fn parse_rates(
    val_curs: &ValCurs,
    currency_id: &str,
    window: &RangeInclusive<NaiveDate>,
    policy: ParseFailurePolicy,
) -> Result<Vec<ExchangeRate>, EtlError> {
    if let Some(document_id) = val_curs::text(&val_curs.id) {
        if document_id != currency_id {
            warn!("Asked for {currency_id} rates, upstream answered for {document_id}");
        }
    }

    let mut rates = Vec::with_capacity(val_curs.records.len());

    for record in &val_curs.records {
        if let Some(record_id) = val_curs::text(&record.id) {
            if record_id != currency_id {
                warn!("{currency_id} record dated {:?} is marked {record_id}", record.date);
            }
        }

        let rate = match parse_record(record, currency_id) {
            Ok(rate) => rate,
            Err(e) if policy == ParseFailurePolicy::Skip => {
                warn!("Skipping {currency_id} record dated {:?}: {e}", record.date);
                continue;
            }
            Err(e) => return Err(e),
        };

        if !window.contains(&rate.date) {
            warn!(
                "Dropping {currency_id} rate for {}, outside {}..={}",
                rate.date,
                window.start(),
                window.end()
            );
            continue;
        }

        rates.push(rate);
    }

    Ok(rates)
}

fn parse_record(record: &Record, currency_id: &str) -> Result<ExchangeRate, EtlError> {
    let date = parse_date(&record.date)?;
    let value = val_curs::text(&record.value).ok_or_else(|| EtlError::parse("Value", "", "missing"))?;
    let rate = parse_rate(value)?;

    Ok(ExchangeRate {
        date,
        currency_code: currency_id.to_string(),
        rate,
    })
}

pub fn parse_date(s: &str) -> Result<NaiveDate, EtlError> {
    NaiveDate::parse_from_str(s.trim(), RECORD_DATE_FORMAT).map_err(|e| EtlError::parse("Date", s, e))
}

pub fn parse_rate(s: &str) -> Result<Decimal, EtlError> {
    let normalized_string = normalize_decimal_string(s.trim());
    let value = Decimal::from_str(&normalized_string).map_err(|e| EtlError::parse("Value", s, e))?;

    if value <= Decimal::ZERO {
        return Err(EtlError::parse("Value", s, "rate must be positive"));
    }

    Ok(value)
}

fn normalize_decimal_string(s: &str) -> String {
    s.replace(',', ".")
}
