use async_trait::async_trait;
use chrono::NaiveDate;
use encoding_rs::Encoding;
use log::debug;
use reqwest::{Client, Url};
use serde::de::DeserializeOwned;

use crate::{
    config::Config,
    error::EtlError,
    val_curs::{ValCurs, Valuta},
};

/// Date format of the `date_req1`/`date_req2` query parameters.
const QUERY_DATE_FORMAT: &str = "%d/%m/%Y";

/// Upstream of both data streams. A failed call is never retried.
#[async_trait]
pub trait RateSource: Send + Sync {
    async fn fetch_rates(
        &self,
        currency_id: &str,
        start_date: NaiveDate,
        end_date: NaiveDate,
    ) -> Result<ValCurs, EtlError>;

    async fn fetch_reference_catalog(&self) -> Result<Valuta, EtlError>;
}

pub struct CbrClient {
    client: Client,
    dynamic_url: Url,
    catalog_url: Url,
    encoding: &'static Encoding,
}

impl CbrClient {
    pub fn new(config: &Config) -> Result<Self, EtlError> {
        let mut builder = Client::builder();
        if let Some(timeout) = config.http_timeout {
            builder = builder.timeout(timeout);
        }

        Ok(Self {
            client: builder.build()?,
            dynamic_url: config.dynamic_url.clone(),
            catalog_url: config.catalog_url.clone(),
            encoding: config.source_encoding,
        })
    }

    async fn get_xml<T: DeserializeOwned>(&self, url: Url) -> Result<T, EtlError> {
        let text = self.load_xml(url).await?;
        let document = quick_xml::de::from_str(&text)?;

        Ok(document)
    }

    async fn load_xml(&self, url: Url) -> Result<String, EtlError> {
        debug!("GET {url}");
        let resp = self.client.get(url.clone()).send().await?;
        if !resp.status().is_success() {
            return Err(EtlError::UpstreamStatus {
                url: url.to_string(),
                status: resp.status(),
            });
        }

        let bytes = resp.bytes().await?;
        let (text, _, _) = self.encoding.decode(&bytes);

        Ok(text.into_owned())
    }
}

#[async_trait]
impl RateSource for CbrClient {
    async fn fetch_rates(
        &self,
        currency_id: &str,
        start_date: NaiveDate,
        end_date: NaiveDate,
    ) -> Result<ValCurs, EtlError> {
        let url = get_url(&self.dynamic_url, currency_id, start_date, end_date);
        self.get_xml(url).await
    }

    async fn fetch_reference_catalog(&self) -> Result<Valuta, EtlError> {
        self.get_xml(self.catalog_url.clone()).await
    }
}

fn get_url(base: &Url, currency_id: &str, start_date: NaiveDate, end_date: NaiveDate) -> Url {
    let mut url = base.clone();
    url.query_pairs_mut()
        .append_pair("date_req1", &start_date.format(QUERY_DATE_FORMAT).to_string())
        .append_pair("date_req2", &end_date.format(QUERY_DATE_FORMAT).to_string())
        .append_pair("VAL_NM_RQ", currency_id);

    url
}
