use anyhow::Result;
use chrono::Local;
use env_logger::Env;
use log::info;

use config::Config;
use pipeline::{Pipeline, StageOutcome};
use sink::PgSink;
use source::CbrClient;

mod catalog_parser;
mod config;
mod error;
mod exchange_rate;
mod pipeline;
mod rate_parser;
mod sink;
mod source;
mod val_curs;

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    env_logger::Builder::from_env(Env::default().default_filter_or("info")).init();

    let config = Config::from_env()?;
    let source = CbrClient::new(&config)?;
    let sink = PgSink::connect_lazy(&config.database_url)?;

    let today = Local::now().date_naive();
    let report = Pipeline::new(&config, &source, &sink).run(today).await;

    for currency in &report.currencies {
        info!("{}: {:?}", currency.currency_id, currency.result);
    }
    if report.rates == StageOutcome::NoData {
        info!("No rates were saved by run {} ({})", report.run_id, report.today);
    }
    if let StageOutcome::Failed(kind) = report.reference {
        info!("Currency reference of run {} did not land: {kind}", report.run_id);
    }

    Ok(())
}
