use std::ops::RangeInclusive;

use chrono::{Datelike, NaiveDate};
use log::{error, info, warn};
use uuid::Uuid;

use crate::{
    catalog_parser::parse_catalog,
    config::Config,
    error::{ErrorKind, EtlError},
    exchange_rate::ExchangeRate,
    rate_parser::parse_rates,
    sink::{Record, Sink, WriteMode},
    source::RateSource,
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StageOutcome {
    /// Rows landed in the table.
    Saved(u64),
    /// Nothing to write, the table was left untouched.
    NoData,
    /// The stage was not due this run.
    Skipped,
    Failed(ErrorKind),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CurrencyOutcome {
    pub currency_id: String,
    /// Number of parsed rates, or why the currency produced none.
    pub result: Result<usize, ErrorKind>,
}

#[derive(Debug, Clone)]
pub struct RunReport {
    pub run_id: Uuid,
    pub today: NaiveDate,
    pub currencies: Vec<CurrencyOutcome>,
    pub rates: StageOutcome,
    pub reference: StageOutcome,
}

/// The catalog is refreshed on the first day of every month, or on demand.
pub fn should_refresh_reference(today: NaiveDate, force: bool) -> bool {
    force || today.day() == 1
}

pub struct Pipeline<'a, S, K> {
    config: &'a Config,
    source: &'a S,
    sink: &'a K,
}

impl<'a, S: RateSource, K: Sink> Pipeline<'a, S, K> {
    pub fn new(config: &'a Config, source: &'a S, sink: &'a K) -> Self {
        Self {
            config,
            source,
            sink,
        }
    }

    /// Runs the rate stage, then the reference stage. Failures of one unit of
    /// work never stop the next one.
    pub async fn run(&self, today: NaiveDate) -> RunReport {
        let run_id = Uuid::new_v4();
        info!("Starting ETL run {run_id} for {today}");

        let (currencies, rates) = self.refresh_rates(today).await;

        let reference = if should_refresh_reference(today, self.config.force_reference_refresh) {
            info!("Refreshing currency reference");
            self.refresh_reference().await
        } else {
            info!("Currency reference is not due: not the 1st and INIT_LOAD != 1");
            StageOutcome::Skipped
        };

        info!("ETL run {run_id} finished: rates {rates:?}, reference {reference:?}");

        RunReport {
            run_id,
            today,
            currencies,
            rates,
            reference,
        }
    }

    async fn refresh_rates(&self, today: NaiveDate) -> (Vec<CurrencyOutcome>, StageOutcome) {
        let start_date = self.config.window_start(today);
        let window = start_date..=today;

        let mut outcomes = Vec::with_capacity(self.config.tracked_currencies.len());
        let mut all_rates: Vec<ExchangeRate> = Vec::new();

        for currency_id in &self.config.tracked_currencies {
            info!("Loading {currency_id} rates for {start_date}..={today}");
            let result = match self.load_rates(currency_id, start_date, today, &window).await {
                Ok(rates) => {
                    info!("Got {} {currency_id} rates", rates.len());
                    let count = rates.len();
                    all_rates.extend(rates);
                    Ok(count)
                }
                Err(e) => {
                    warn!("Can't load {currency_id} rates: {e}");
                    Err(e.kind())
                }
            };

            outcomes.push(CurrencyOutcome {
                currency_id: currency_id.clone(),
                result,
            });
        }

        if all_rates.is_empty() {
            warn!("No rates to save");
            return (outcomes, StageOutcome::NoData);
        }

        let table = self.config.rates_table_name();
        let outcome = self
            .save(&all_rates, &table, self.config.rates_write_mode)
            .await;

        (outcomes, outcome)
    }

    async fn load_rates(
        &self,
        currency_id: &str,
        start_date: NaiveDate,
        end_date: NaiveDate,
        window: &RangeInclusive<NaiveDate>,
    ) -> Result<Vec<ExchangeRate>, EtlError> {
        let val_curs = self
            .source
            .fetch_rates(currency_id, start_date, end_date)
            .await?;

        parse_rates(
            &val_curs,
            currency_id,
            window,
            self.config.parse_failure_policy,
        )
    }

    async fn refresh_reference(&self) -> StageOutcome {
        let references = match self.source.fetch_reference_catalog().await.and_then(|valuta| {
            parse_catalog(
                &valuta,
                &self.config.tracked_currencies,
                self.config.parse_failure_policy,
            )
        }) {
            Ok(references) => references,
            Err(e) => {
                warn!("Can't load currency reference: {e}");
                return StageOutcome::Failed(e.kind());
            }
        };

        if references.is_empty() {
            warn!("Currency reference has none of the tracked currencies");
            return StageOutcome::NoData;
        }

        info!("Currency reference filtered to {} entries", references.len());

        let table = self.config.reference_table_name();
        self.save(&references, &table, WriteMode::Replace).await
    }

    async fn save<R: Record>(
        &self,
        records: &[R],
        table: &str,
        mode: WriteMode,
    ) -> StageOutcome {
        match self.sink.save(records, table, mode).await {
            Ok(written) => StageOutcome::Saved(written),
            Err(e) => {
                error!("Can't save into {table}: {e}");
                StageOutcome::Failed(e.kind())
            }
        }
    }
}
