use chrono::NaiveDate;
use rust_decimal::Decimal;

/// Rate of one nominal unit of `currency_code` in roubles on `date`.
#[derive(Debug, Clone, PartialEq)]
pub struct ExchangeRate {
    pub date: NaiveDate,
    pub currency_code: String,
    pub rate: Decimal,
}

/// A row of the currency catalog, keyed by the upstream registry id.
#[derive(Debug, Clone, PartialEq)]
pub struct CurrencyReference {
    pub id: String,
    pub name: Option<String>,
    pub eng_name: Option<String>,
    pub nominal: Option<i32>,
    pub iso_char_code: Option<String>,
}
