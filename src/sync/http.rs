//! HTTP configuration sources.
use reqwest::Url;
use serde_json::json;

use super::{ConfigurationSource, SourceKind};
use crate::{configuration_store::ConfigurationDocument, Error, Result};

const API_ENDPOINT: &str = "/device/get_configuration";
const ROXY_ENDPOINT: &str = "/device/request_configuration";

/// A configuration source reached over HTTP.
pub struct HttpSource {
    kind: SourceKind,
    // Client holds a connection pool internally, so it is shared between sources and requests.
    client: reqwest::blocking::Client,
    url: Url,
    /// Request body. `Some` means the source is queried with `POST`.
    body: Option<serde_json::Value>,
}

impl HttpSource {
    /// The CDN: `GET {base_url}/{app_key}`.
    pub fn cdn(
        client: reqwest::blocking::Client,
        base_url: &str,
        app_key: &str,
    ) -> Result<HttpSource> {
        Ok(HttpSource {
            kind: SourceKind::Cdn,
            client,
            url: endpoint(base_url, &format!("/{app_key}"))?,
            body: None,
        })
    }

    /// The configuration API: `POST {base_url}/device/get_configuration/{app_key}` with device
    /// properties as the JSON body.
    pub fn api(
        client: reqwest::blocking::Client,
        base_url: &str,
        app_key: &str,
    ) -> Result<HttpSource> {
        Ok(HttpSource {
            kind: SourceKind::Api,
            client,
            url: endpoint(base_url, &format!("{API_ENDPOINT}/{app_key}"))?,
            body: Some(json!({
                "app_key": app_key,
                "platform": "Rust",
                "lib_version": env!("CARGO_PKG_VERSION"),
            })),
        })
    }

    /// A Roxy proxy: `GET {base_url}/device/request_configuration`.
    pub fn roxy(client: reqwest::blocking::Client, base_url: &str) -> Result<HttpSource> {
        Ok(HttpSource {
            kind: SourceKind::Roxy,
            client,
            url: endpoint(base_url, ROXY_ENDPOINT)?,
            body: None,
        })
    }

    /// Request URL.
    pub fn url(&self) -> &Url {
        &self.url
    }
}

impl ConfigurationSource for HttpSource {
    fn kind(&self) -> SourceKind {
        self.kind
    }

    fn fetch(&self) -> Result<ConfigurationDocument> {
        let request = match &self.body {
            Some(body) => self.client.post(self.url.clone()).json(body),
            None => self.client.get(self.url.clone()),
        };

        let response = request.send()?;
        let response = response.error_for_status().map_err(|err| {
            log::warn!(target: "rox",
                       source:display = self.kind;
                       "received non-200 response while fetching configuration: {:?}", err.status());
            Error::from(err)
        })?;

        let body = response.bytes()?;
        parse_document(self.kind, &body)
    }
}

/// Parse a configuration response body.
///
/// # Errors
///
/// - [`Error::NotFound`] for the CDN's `{"result": 404}` marker.
/// - [`Error::ConfigurationParse`] if the body is not a configuration document.
pub fn parse_document(kind: SourceKind, body: &[u8]) -> Result<ConfigurationDocument> {
    let value: serde_json::Value = serde_json::from_slice(body)?;
    if value.get("result").and_then(serde_json::Value::as_u64) == Some(404) {
        return Err(Error::NotFound(kind));
    }
    Ok(serde_json::from_value(value)?)
}

pub(super) fn endpoint(base_url: &str, path: &str) -> Result<Url> {
    Url::parse(&format!("{}{}", base_url.trim_end_matches('/'), path))
        .map_err(Error::InvalidBaseUrl)
}
