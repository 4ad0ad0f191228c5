use std::{collections::HashMap, str::FromStr};

use async_trait::async_trait;
use log::info;
use sqlx::{
    PgPool, Postgres, QueryBuilder,
    postgres::PgPoolOptions,
    query_builder::Separated,
};

use crate::{
    config::is_identifier,
    error::EtlError,
    exchange_rate::{CurrencyReference, ExchangeRate},
};

/// Rows per INSERT, keeps the statement under the 65535 bind limit.
const INSERT_CHUNK: usize = 1000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteMode {
    /// Add the rows to what the table already holds.
    Append,
    /// Swap the table contents for the rows in one transaction.
    Replace,
    /// Insert the rows, overwriting existing rows with the same key.
    Upsert,
}

impl FromStr for WriteMode {
    type Err = EtlError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "append" => Ok(WriteMode::Append),
            "replace" => Ok(WriteMode::Replace),
            "upsert" => Ok(WriteMode::Upsert),
            other => Err(EtlError::config(format!(
                "unknown write mode {other:?}, expected append, replace or upsert"
            ))),
        }
    }
}

/// A row type the sink knows how to lay out in a table.
pub trait Record: Send + Sync + 'static {
    /// `(name, sql type)` in insert order.
    const COLUMNS: &'static [(&'static str, &'static str)];
    const KEY: &'static [&'static str];

    fn key(&self) -> String;

    fn push_binds(&self, row: Separated<'_, '_, Postgres, &'static str>);
}

impl Record for ExchangeRate {
    const COLUMNS: &'static [(&'static str, &'static str)] = &[
        ("date", "DATE NOT NULL"),
        ("currency_code", "TEXT NOT NULL"),
        ("rate", "NUMERIC NOT NULL"),
    ];
    const KEY: &'static [&'static str] = &["date", "currency_code"];

    fn key(&self) -> String {
        format!("{}/{}", self.date, self.currency_code)
    }

    fn push_binds(&self, mut row: Separated<'_, '_, Postgres, &'static str>) {
        row.push_bind(self.date)
            .push_bind(self.currency_code.clone())
            .push_bind(self.rate);
    }
}

impl Record for CurrencyReference {
    const COLUMNS: &'static [(&'static str, &'static str)] = &[
        ("id", "TEXT NOT NULL"),
        ("name", "TEXT"),
        ("eng_name", "TEXT"),
        ("nominal", "INTEGER"),
        ("iso_char_code", "TEXT"),
    ];
    const KEY: &'static [&'static str] = &["id"];

    fn key(&self) -> String {
        self.id.clone()
    }

    fn push_binds(&self, mut row: Separated<'_, '_, Postgres, &'static str>) {
        row.push_bind(self.id.clone())
            .push_bind(self.name.clone())
            .push_bind(self.eng_name.clone())
            .push_bind(self.nominal)
            .push_bind(self.iso_char_code.clone());
    }
}

#[async_trait]
pub trait Sink: Send + Sync {
    /// Writes `records` into `table`, returning the number of rows written.
    async fn save<R: Record>(
        &self,
        records: &[R],
        table: &str,
        mode: WriteMode,
    ) -> Result<u64, EtlError>;
}

pub struct PgSink {
    pool: PgPool,
}

impl PgSink {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// The connection is opened on first write, so an unreachable database
    /// only fails the writes, not the whole run.
    pub fn connect_lazy(database_url: &str) -> Result<Self, EtlError> {
        let pool = PgPoolOptions::new()
            .max_connections(1)
            .connect_lazy(database_url)
            .map_err(|e| EtlError::config(format!("bad DATABASE_URL: {e}")))?;

        Ok(Self::new(pool))
    }
}

#[async_trait]
impl Sink for PgSink {
    async fn save<R: Record>(
        &self,
        records: &[R],
        table: &str,
        mode: WriteMode,
    ) -> Result<u64, EtlError> {
        check_table_name(table)?;
        let records = dedup_by_key(records);

        let mut tx = self.pool.begin().await?;

        sqlx::query(&create_table_sql::<R>(table))
            .execute(&mut *tx)
            .await?;

        match mode {
            WriteMode::Replace => {
                sqlx::query(&format!("DELETE FROM {table}"))
                    .execute(&mut *tx)
                    .await?;
            }
            WriteMode::Upsert => {
                sqlx::query(&create_key_index_sql::<R>(table))
                    .execute(&mut *tx)
                    .await?;
            }
            WriteMode::Append => {}
        }

        let mut written = 0;
        for chunk in records.chunks(INSERT_CHUNK) {
            let mut query = insert_query(chunk, table, mode);
            written += query.build().execute(&mut *tx).await?.rows_affected();
        }

        tx.commit().await?;
        info!("Saved {written} rows into {table} ({mode:?})");

        Ok(written)
    }
}

/// Keeps the last record of every key, in first-seen order.
pub fn dedup_by_key<R: Record>(records: &[R]) -> Vec<&R> {
    let mut positions: HashMap<String, usize> = HashMap::new();
    let mut unique: Vec<&R> = Vec::with_capacity(records.len());

    for record in records {
        match positions.get(&record.key()) {
            Some(&i) => unique[i] = record,
            None => {
                positions.insert(record.key(), unique.len());
                unique.push(record);
            }
        }
    }

    unique
}

fn check_table_name(table: &str) -> Result<(), EtlError> {
    let valid = !table.is_empty() && table.split('.').count() <= 2 && table.split('.').all(is_identifier);
    if !valid {
        return Err(EtlError::config(format!("{table:?} is not a valid table name")));
    }
    Ok(())
}

/// Plain table without a key constraint: append may repeat keys across runs.
fn create_table_sql<R: Record>(table: &str) -> String {
    let columns: Vec<String> = R::COLUMNS
        .iter()
        .map(|(name, sql_type)| format!("{name} {sql_type}"))
        .collect();

    format!("CREATE TABLE IF NOT EXISTS {table} ({})", columns.join(", "))
}

/// Unique index `ON CONFLICT` needs. Fails if appended rows already repeat a key.
fn create_key_index_sql<R: Record>(table: &str) -> String {
    let bare = table.rsplit('.').next().unwrap_or(table);

    format!(
        "CREATE UNIQUE INDEX IF NOT EXISTS {bare}_key_idx ON {table} ({})",
        R::KEY.join(", ")
    )
}

fn insert_query<'a, R: Record>(
    records: &[&'a R],
    table: &str,
    mode: WriteMode,
) -> QueryBuilder<'a, Postgres> {
    let names: Vec<&'static str> = R::COLUMNS.iter().map(|(name, _)| *name).collect();
    let mut query = QueryBuilder::new(format!("INSERT INTO {table} ({}) ", names.join(", ")));

    query.push_values(records, |row, record| record.push_binds(row));

    if mode == WriteMode::Upsert {
        let updates: Vec<String> = names
            .iter()
            .copied()
            .filter(|name| !R::KEY.contains(name))
            .map(|name| format!("{name} = EXCLUDED.{name}"))
            .collect();

        query.push(format!(" ON CONFLICT ({}) ", R::KEY.join(", ")));
        if updates.is_empty() {
            query.push("DO NOTHING");
        } else {
            query.push(format!("DO UPDATE SET {}", updates.join(", ")));
        }
    }

    query
}

#[cfg(test)]
mod tests {
    use chrono::NaiveDate;
    use rust_decimal::Decimal;

    use super::*;
    use crate::error::ErrorKind;

    fn rate(day: u32, code: &str, value: i64) -> ExchangeRate {
        ExchangeRate {
            date: NaiveDate::from_ymd_opt(2025, 8, day).unwrap(),
            currency_code: code.to_string(),
            rate: Decimal::new(value, 2),
        }
    }

    #[test]
    fn parses_write_mode() {
        assert_eq!("replace".parse::<WriteMode>().unwrap(), WriteMode::Replace);
        assert_eq!(" Append ".parse::<WriteMode>().unwrap(), WriteMode::Append);
        assert_eq!("UPSERT".parse::<WriteMode>().unwrap(), WriteMode::Upsert);
        assert_eq!(
            "overwrite".parse::<WriteMode>().unwrap_err().kind(),
            ErrorKind::ConfigurationError
        );
    }

    #[test]
    fn creates_rate_table() {
        assert_eq!(
            create_table_sql::<ExchangeRate>("public.exchange_rates"),
            "CREATE TABLE IF NOT EXISTS public.exchange_rates (date DATE NOT NULL, \
             currency_code TEXT NOT NULL, rate NUMERIC NOT NULL)"
        );
    }

    #[test]
    fn key_index_only_names_the_bare_table() {
        assert_eq!(
            create_key_index_sql::<ExchangeRate>("public.exchange_rates"),
            "CREATE UNIQUE INDEX IF NOT EXISTS exchange_rates_key_idx \
             ON public.exchange_rates (date, currency_code)"
        );
    }

    #[test]
    fn creates_reference_table() {
        assert_eq!(
            create_table_sql::<CurrencyReference>("currency_reference"),
            "CREATE TABLE IF NOT EXISTS currency_reference (id TEXT NOT NULL, name TEXT, \
             eng_name TEXT, nominal INTEGER, iso_char_code TEXT)"
        );
    }

    #[test]
    fn builds_multi_row_insert() {
        let rates = [rate(4, "R01235", 8010), rate(5, "R01235", 7456)];
        let refs: Vec<&ExchangeRate> = rates.iter().collect();

        let query = insert_query(&refs, "public.exchange_rates", WriteMode::Replace);

        assert_eq!(
            query.sql(),
            "INSERT INTO public.exchange_rates (date, currency_code, rate) VALUES ($1, $2, $3), ($4, $5, $6)"
        );
    }

    #[test]
    fn upsert_updates_non_key_columns() {
        let rates = [rate(5, "R01239", 9012)];
        let refs: Vec<&ExchangeRate> = rates.iter().collect();

        let query = insert_query(&refs, "exchange_rates", WriteMode::Upsert);

        assert!(
            query
                .sql()
                .ends_with(" ON CONFLICT (date, currency_code) DO UPDATE SET rate = EXCLUDED.rate"),
            "{}",
            query.sql()
        );
    }

    #[test]
    fn dedup_keeps_last_value_per_key() {
        let rates = [
            rate(4, "R01235", 8010),
            rate(4, "R01239", 9010),
            rate(4, "R01235", 8020),
        ];

        let unique = dedup_by_key(&rates);

        assert_eq!(unique.len(), 2);
        assert_eq!(unique[0].rate, Decimal::new(8020, 2));
        assert_eq!(unique[1].currency_code, "R01239");
    }

    const TABLE: &str = "public.exchange_rates";

    async fn count(pool: &PgPool, table: &str) -> sqlx::Result<i64> {
        sqlx::query_scalar(&format!("SELECT COUNT(*) FROM {table}"))
            .fetch_one(pool)
            .await
    }

    async fn dates(pool: &PgPool) -> sqlx::Result<Vec<NaiveDate>> {
        sqlx::query_scalar(&format!("SELECT DISTINCT date FROM {TABLE} ORDER BY date"))
            .fetch_all(pool)
            .await
    }

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 8, d).unwrap()
    }

    #[sqlx::test]
    async fn replace_twice_keeps_row_count(pool: PgPool) -> sqlx::Result<()> {
        let sink = PgSink::new(pool.clone());
        let window = [rate(4, "R01235", 8010), rate(5, "R01235", 7456)];

        assert_eq!(sink.save(&window, TABLE, WriteMode::Replace).await.unwrap(), 2);
        assert_eq!(sink.save(&window, TABLE, WriteMode::Replace).await.unwrap(), 2);

        assert_eq!(count(&pool, TABLE).await?, 2);
        Ok(())
    }

    #[sqlx::test]
    async fn replace_drops_rows_outside_new_window(pool: PgPool) -> sqlx::Result<()> {
        let sink = PgSink::new(pool.clone());

        sink.save(&[rate(4, "R01235", 8010), rate(5, "R01235", 7456)], TABLE, WriteMode::Replace)
            .await
            .unwrap();
        sink.save(&[rate(5, "R01235", 7456), rate(6, "R01235", 7512)], TABLE, WriteMode::Replace)
            .await
            .unwrap();

        assert_eq!(dates(&pool).await?, vec![day(5), day(6)]);
        Ok(())
    }

    #[sqlx::test]
    async fn append_accepts_overlapping_window(pool: PgPool) -> sqlx::Result<()> {
        let sink = PgSink::new(pool.clone());

        sink.save(&[rate(4, "R01235", 8010), rate(5, "R01235", 7456)], TABLE, WriteMode::Replace)
            .await
            .unwrap();
        let written = sink
            .save(&[rate(5, "R01235", 7456), rate(6, "R01235", 7512)], TABLE, WriteMode::Append)
            .await
            .unwrap();

        assert_eq!(written, 2);
        assert_eq!(count(&pool, TABLE).await?, 4);
        assert_eq!(dates(&pool).await?, vec![day(4), day(5), day(6)]);
        Ok(())
    }

    #[sqlx::test]
    async fn upsert_overwrites_overlapping_rows(pool: PgPool) -> sqlx::Result<()> {
        let sink = PgSink::new(pool.clone());

        sink.save(&[rate(4, "R01235", 8010), rate(5, "R01235", 7456)], TABLE, WriteMode::Replace)
            .await
            .unwrap();
        sink.save(&[rate(5, "R01235", 7499), rate(6, "R01235", 7512)], TABLE, WriteMode::Upsert)
            .await
            .unwrap();

        assert_eq!(count(&pool, TABLE).await?, 3);
        let rate_on_fifth: Decimal = sqlx::query_scalar(&format!(
            "SELECT rate FROM {TABLE} WHERE date = $1 AND currency_code = $2"
        ))
        .bind(day(5))
        .bind("R01235")
        .fetch_one(&pool)
        .await?;
        assert_eq!(rate_on_fifth, Decimal::new(7499, 2));
        Ok(())
    }

    #[sqlx::test]
    async fn upsert_refuses_table_with_repeated_keys(pool: PgPool) -> sqlx::Result<()> {
        let sink = PgSink::new(pool.clone());
        let window = [rate(5, "R01235", 7456)];

        sink.save(&window, TABLE, WriteMode::Append).await.unwrap();
        sink.save(&window, TABLE, WriteMode::Append).await.unwrap();
        let err = sink.save(&window, TABLE, WriteMode::Upsert).await.unwrap_err();

        assert_eq!(err.kind(), ErrorKind::PersistenceFailure);
        assert_eq!(count(&pool, TABLE).await?, 2);
        Ok(())
    }

    #[sqlx::test]
    async fn failed_replace_keeps_previous_rows(pool: PgPool) -> sqlx::Result<()> {
        sqlx::query(&format!(
            "CREATE TABLE {TABLE} (date DATE NOT NULL, currency_code TEXT NOT NULL, \
             rate NUMERIC NOT NULL CHECK (rate < 100))"
        ))
        .execute(&pool)
        .await?;
        let sink = PgSink::new(pool.clone());
        sink.save(&[rate(4, "R01235", 8010)], TABLE, WriteMode::Append)
            .await
            .unwrap();

        let err = sink
            .save(&[rate(5, "R01235", 15000)], TABLE, WriteMode::Replace)
            .await
            .unwrap_err();

        assert_eq!(err.kind(), ErrorKind::PersistenceFailure);
        assert_eq!(dates(&pool).await?, vec![day(4)]);
        Ok(())
    }

    #[sqlx::test]
    async fn writes_more_rows_than_one_insert_holds(pool: PgPool) -> sqlx::Result<()> {
        let start = NaiveDate::from_ymd_opt(2015, 1, 1).unwrap();
        let rates: Vec<ExchangeRate> = (0..2500u64)
            .map(|i| ExchangeRate {
                date: start + chrono::Days::new(i),
                currency_code: "R01235".to_string(),
                rate: Decimal::new(6000 + i as i64, 2),
            })
            .collect();
        let sink = PgSink::new(pool.clone());

        let written = sink.save(&rates, TABLE, WriteMode::Replace).await.unwrap();

        assert_eq!(written, 2500);
        assert_eq!(count(&pool, TABLE).await?, 2500);
        Ok(())
    }

    #[sqlx::test]
    async fn creates_reference_table_with_nulls(pool: PgPool) -> sqlx::Result<()> {
        let table = "public.currency_reference";
        let references = [CurrencyReference {
            id: "R01235".to_string(),
            name: Some("Доллар США".to_string()),
            eng_name: None,
            nominal: None,
            iso_char_code: Some("USD".to_string()),
        }];
        let sink = PgSink::new(pool.clone());

        sink.save(&references, table, WriteMode::Replace).await.unwrap();

        let (name, nominal): (Option<String>, Option<i32>) =
            sqlx::query_as(&format!("SELECT name, nominal FROM {table} WHERE id = $1"))
                .bind("R01235")
                .fetch_one(&pool)
                .await?;
        assert_eq!(name.as_deref(), Some("Доллар США"));
        assert_eq!(nominal, None);
        Ok(())
    }

    #[test]
    fn rejects_unsafe_table_names() {
        assert!(check_table_name("public.exchange_rates").is_ok());
        assert!(check_table_name("exchange_rates").is_ok());
        for name in ["", "a.b.c", "rates; DROP TABLE x", "public.", "1rates"] {
            assert!(check_table_name(name).is_err(), "{name}");
        }
    }
}
