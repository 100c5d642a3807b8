use base64::Engine as _;
use reqwest::{header::AUTHORIZATION, Url};

use super::ImpressionEvent;
use crate::{Error, Result};

/// Destination of impression batches.
pub trait ImpressionSink {
    /// Deliver one batch. Called from the analytics worker thread only.
    fn deliver(&self, events: &[ImpressionEvent]) -> Result<()>;
}

impl<T: Fn(&[ImpressionEvent]) -> Result<()>> ImpressionSink for T {
    fn deliver(&self, events: &[ImpressionEvent]) -> Result<()> {
        self(events)
    }
}

/// Posts impression batches as a JSON array.
pub struct HttpImpressionSink {
    client: reqwest::blocking::Client,
    url: Url,
    authorization: String,
}

impl HttpImpressionSink {
    /// Create a sink posting to `url`, authenticating with `write_key` as the basic auth user.
    pub fn new(client: reqwest::blocking::Client, url: &str, write_key: &str) -> Result<Self> {
        let url = Url::parse(url).map_err(Error::InvalidBaseUrl)?;
        let credentials = base64::engine::general_purpose::STANDARD.encode(format!("{write_key}:"));
        Ok(HttpImpressionSink {
            client,
            url,
            authorization: format!("Basic {credentials}"),
        })
    }
}

impl ImpressionSink for HttpImpressionSink {
    fn deliver(&self, events: &[ImpressionEvent]) -> Result<()> {
        let response = self
            .client
            .post(self.url.clone())
            .header(AUTHORIZATION, &self.authorization)
            .json(events)
            .send()?;

        let status = response.status();
        if !status.is_success() {
            return Err(Error::Delivery(format!("ingestion responded with {status}")));
        }
        Ok(())
    }
}
