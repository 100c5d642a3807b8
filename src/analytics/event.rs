use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::Context;

/// Experiment that produced an impression.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ImpressionExperiment {
    /// Experiment id.
    pub id: String,
    /// Experiment name.
    pub name: String,
}

/// Record of a flag value served to an entity.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ImpressionEvent {
    /// Full flag name.
    pub flag_name: String,
    /// Served value. Flags serve `"true"` or `"false"`.
    pub value: String,
    /// Experiment bound to the flag.
    pub experiment: Option<ImpressionExperiment>,
    /// Merged context the flag was evaluated with.
    pub context: Context,
    /// When the value was served.
    pub timestamp: DateTime<Utc>,
}

/// Receives every impression synchronously, on the evaluating thread.
///
/// Use it to forward impressions to your own analytics. It is implemented for closures:
/// ```
/// # use rox::{EngineConfig, ImpressionEvent};
/// EngineConfig::from_app_key("app-key").impression_handler(|event: ImpressionEvent| {
///     println!("{} = {}", event.flag_name, event.value);
/// });
/// ```
pub trait ImpressionHandler {
    /// Handle a single impression. Must not block for long.
    fn on_impression(&self, event: ImpressionEvent);
}

pub(crate) struct NoopImpressionHandler;
impl ImpressionHandler for NoopImpressionHandler {
    fn on_impression(&self, _event: ImpressionEvent) {}
}

impl<T: Fn(ImpressionEvent)> ImpressionHandler for T {
    fn on_impression(&self, event: ImpressionEvent) {
        self(event);
    }
}

#[cfg(test)]
mod tests {
    use chrono::{TimeZone, Utc};

    use super::{ImpressionEvent, ImpressionExperiment};
    use crate::Context;

    #[test]
    fn serializes_camel_case() {
        let event = ImpressionEvent {
            flag_name: "app.checkout".to_owned(),
            value: "true".to_owned(),
            experiment: Some(ImpressionExperiment {
                id: "e1".to_owned(),
                name: "Checkout".to_owned(),
            }),
            context: Context::from([("uid".to_owned(), "user-3".into())]),
            timestamp: Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap(),
        };

        let json = serde_json::to_value(&event).unwrap();

        assert_eq!(
            json,
            serde_json::json!({
                "flagName": "app.checkout",
                "value": "true",
                "experiment": {"id": "e1", "name": "Checkout"},
                "context": {"uid": "user-3"},
                "timestamp": "2024-05-01T12:00:00Z",
            })
        );
    }
}
