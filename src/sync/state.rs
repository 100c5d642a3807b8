//! Uploading the registered-flag state to the state store.
use std::{collections::HashMap, sync::Arc};

use reqwest::{StatusCode, Url};
use serde_json::json;

use super::{endpoint, SourceKind};
use crate::{repositories::FlagSetting, Error, Result};

const API_ENDPOINT: &str = "/device/update_state_store";

/// The registered flags as reported to the state store, together with their digest.
#[derive(Debug, Clone, PartialEq)]
pub struct State {
    md5: String,
    body: serde_json::Value,
}

impl State {
    /// Describe `flags`. Flags are sorted by name, so the digest does not depend on the order
    /// they were registered in.
    pub fn new(app_key: &str, flags: &HashMap<String, Arc<FlagSetting>>) -> State {
        let mut settings: Vec<&FlagSetting> = flags.values().map(|setting| &**setting).collect();
        settings.sort_by(|a, b| a.name.cmp(&b.name));

        let feature_flags: Vec<serde_json::Value> = settings
            .iter()
            .map(|setting| {
                json!({
                    "name": setting.name,
                    "defaultValue": setting.default_value,
                    "options": setting.options,
                })
            })
            .collect();
        let body = json!({
            "app_key": app_key,
            "platform": "Rust",
            "feature_flags": feature_flags,
            "custom_properties": [],
            "remote_variables": [],
        });
        let md5 = format!("{:X}", md5::compute(body.to_string()));

        State { md5, body }
    }

    /// Uppercase hex MD5 of the state.
    pub fn md5(&self) -> &str {
        &self.md5
    }

    /// The JSON document uploaded to the API.
    pub fn body(&self) -> &serde_json::Value {
        &self.body
    }
}

/// Reports registered flags to the state store.
///
/// The CDN is asked first whether it already holds a state with the same digest. When it does
/// not, the state is posted to the API.
pub struct StateSender {
    client: reqwest::blocking::Client,
    app_key: String,
    cdn_url: Url,
    api_url: Url,
}

impl StateSender {
    /// Create a sender using `state_url` for the CDN state store and `api_url` for the API.
    ///
    /// # Errors
    ///
    /// [`Error::InvalidBaseUrl`] if either URL is invalid.
    pub fn new(
        client: reqwest::blocking::Client,
        state_url: &str,
        api_url: &str,
        app_key: impl Into<String>,
    ) -> Result<StateSender> {
        let app_key = app_key.into();
        Ok(StateSender {
            client,
            cdn_url: endpoint(state_url, &format!("/{app_key}/"))?,
            api_url: endpoint(api_url, &format!("{API_ENDPOINT}/{app_key}/"))?,
            app_key,
        })
    }

    /// CDN URL for `state`: `{state_url}/{app_key}/{md5}`.
    pub fn cdn_url(&self, state: &State) -> Url {
        self.with_md5(&self.cdn_url, state)
    }

    /// API URL for `state`: `{api_url}/device/update_state_store/{app_key}/{md5}`.
    pub fn api_url(&self, state: &State) -> Url {
        self.with_md5(&self.api_url, state)
    }

    /// Send the state of `flags`. Returns where the state ended up.
    ///
    /// # Errors
    ///
    /// - [`Error::Network`] if a request failed or the API rejected the state.
    /// - [`Error::StateResponseParse`] if the CDN answered with something that is not JSON.
    pub fn send(&self, flags: &HashMap<String, Arc<FlagSetting>>) -> Result<SourceKind> {
        let state = State::new(&self.app_key, flags);

        let result = match self.send_to_cdn(&state) {
            Ok(true) => Ok(SourceKind::Cdn),
            Ok(false) => {
                log::debug!(target: "rox",
                            md5 = state.md5();
                            "state not found on cdn, sending to api");
                self.send_to_api(&state).map(|()| SourceKind::Api)
            }
            Err(err) => Err(err),
        };

        match &result {
            Ok(source) => {
                log::debug!(target: "rox",
                            source:display = source,
                            md5 = state.md5();
                            "sent state");
            }
            Err(err) => {
                log::warn!(target: "rox", md5 = state.md5(); "failed to send state: {}", err);
            }
        }
        result
    }

    /// `Ok(false)` if the CDN does not know the state.
    fn send_to_cdn(&self, state: &State) -> Result<bool> {
        let response = self.client.get(self.cdn_url(state)).send()?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(false);
        }
        let body = response.error_for_status()?.bytes()?;
        let value: serde_json::Value = serde_json::from_slice(&body)
            .map_err(|err| Error::StateResponseParse(Arc::new(err)))?;
        Ok(value.get("result").and_then(serde_json::Value::as_u64) != Some(404))
    }

    fn send_to_api(&self, state: &State) -> Result<()> {
        self.client
            .post(self.api_url(state))
            .json(state.body())
            .send()?
            .error_for_status()?;
        Ok(())
    }

    fn with_md5(&self, base: &Url, state: &State) -> Url {
        let mut url = base.clone();
        url.set_path(&format!("{}{}", base.path(), state.md5()));
        url
    }
}
