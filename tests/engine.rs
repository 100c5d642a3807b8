use std::{
    sync::{
        atomic::{AtomicU64, AtomicUsize, Ordering},
        Arc, Mutex,
    },
    time::Duration,
};

use serde_json::json;

use rox::{
    analytics::AnalyticsConfig, configuration_store::ConfigurationDocument,
    sync::ConfigurationSource, Context, DefaultEntityProvider, EngineConfig, EntityProvider, Error,
    FetchOutcome, FetchStatus, ImpressionEvent, SourceKind,
};

fn init() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn context(pairs: &[(&str, &str)]) -> Context {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), (*v).into()))
        .collect()
}

/// Serves a fixed document (or fails) and counts requests.
struct FixedSource {
    kind: SourceKind,
    document: Option<serde_json::Value>,
    calls: Arc<AtomicUsize>,
}

impl FixedSource {
    fn new(
        kind: SourceKind,
        document: Option<serde_json::Value>,
    ) -> (FixedSource, Arc<AtomicUsize>) {
        let calls = Arc::new(AtomicUsize::new(0));
        (
            FixedSource {
                kind,
                document,
                calls: Arc::clone(&calls),
            },
            calls,
        )
    }
}

impl ConfigurationSource for FixedSource {
    fn kind(&self) -> SourceKind {
        self.kind
    }

    fn fetch(&self) -> rox::Result<ConfigurationDocument> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match &self.document {
            Some(document) => Ok(serde_json::from_value(document.clone())?),
            None => Err(Error::NotFound(self.kind)),
        }
    }
}

/// Serves a new generation on every request. Odd and even generations bind the flag through
/// different target groups, so mixing two generations would turn the flag off.
struct AlternatingSource {
    generation: AtomicU64,
}

impl ConfigurationSource for AlternatingSource {
    fn kind(&self) -> SourceKind {
        SourceKind::Api
    }

    fn fetch(&self) -> rox::Result<ConfigurationDocument> {
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        let group = if generation % 2 == 0 { "even" } else { "odd" };
        Ok(serde_json::from_value(json!({
            "generation": generation,
            "experiments": [{
                "id": "e",
                "name": "E",
                "flags": ["app.consistent"],
                "condition": format!("isInTargetGroup(\"{group}\")"),
            }],
            "targetGroups": [{"id": group, "condition": "true"}],
        }))?)
    }
}

fn rollout_document() -> serde_json::Value {
    json!({
        "generation": 7,
        "experiments": [{
            "id": "e-checkout",
            "name": "Checkout rollout",
            "flags": ["app.checkout"],
            "condition": "lt(bucket([\"uid\"]), 10)",
        }],
        "targetGroups": [],
    })
}

#[test]
fn bucketed_rollout() {
    init();

    let (source, _) = FixedSource::new(SourceKind::Cdn, Some(rollout_document()));
    let engine = EngineConfig::from_app_key("app-key")
        .configuration_source(source)
        .to_engine()
        .unwrap();
    let app = engine
        .register("app", [("checkout", DefaultEntityProvider.create_flag(false))])
        .unwrap();
    let checkout = app.flag("checkout").unwrap();

    engine.fetch().unwrap();

    // bucket("user-3") = 6, bucket("user-7") = 21
    assert!(checkout.is_enabled(&context(&[("uid", "user-3")])));
    assert!(!checkout.is_enabled(&context(&[("uid", "user-7")])));
    // Same input, same answer.
    for _ in 0..10 {
        assert!(checkout.is_enabled(&context(&[("uid", "user-3")])));
    }
    assert_eq!(engine.configuration().generation, 7);
}

#[test]
fn sources_are_tried_in_order() {
    init();

    let (cdn, cdn_calls) = FixedSource::new(SourceKind::Cdn, None);
    let (api, api_calls) = FixedSource::new(SourceKind::Api, Some(rollout_document()));
    let (roxy, roxy_calls) = FixedSource::new(SourceKind::Roxy, Some(rollout_document()));
    let outcomes = Arc::new(Mutex::new(Vec::new()));
    let engine = EngineConfig::from_app_key("app-key")
        .configuration_source(cdn)
        .configuration_source(api)
        .configuration_source(roxy)
        .configuration_fetched_handler({
            let outcomes = Arc::clone(&outcomes);
            move |outcome: &FetchOutcome| outcomes.lock().unwrap().push(*outcome)
        })
        .to_engine()
        .unwrap();

    let outcome = engine.fetch().unwrap();

    assert_eq!(outcome.source, Some(SourceKind::Api));
    assert_eq!(cdn_calls.load(Ordering::SeqCst), 1);
    assert_eq!(api_calls.load(Ordering::SeqCst), 1);
    assert_eq!(roxy_calls.load(Ordering::SeqCst), 0);
    assert_eq!(engine.configuration().source, Some(SourceKind::Api));
    assert_eq!(*outcomes.lock().unwrap(), vec![outcome]);
}

#[test]
fn failed_sync_keeps_defaults() {
    init();

    let (cdn, _) = FixedSource::new(SourceKind::Cdn, None);
    let (api, _) = FixedSource::new(SourceKind::Api, None);
    let outcomes = Arc::new(Mutex::new(Vec::new()));
    let engine = EngineConfig::from_app_key("app-key")
        .configuration_source(cdn)
        .configuration_source(api)
        .configuration_fetched_handler({
            let outcomes = Arc::clone(&outcomes);
            move |outcome: &FetchOutcome| outcomes.lock().unwrap().push(outcome.status)
        })
        .to_engine()
        .unwrap();
    let app = engine
        .register("", [("checkout", DefaultEntityProvider.create_flag(true))])
        .unwrap();

    assert!(matches!(engine.fetch(), Err(Error::AllSourcesFailed(_))));
    assert!(app.flag("checkout").unwrap().is_enabled(&Context::new()));
    assert_eq!(*outcomes.lock().unwrap(), vec![FetchStatus::FetchFailed]);
}

#[test]
fn broken_conditions_fail_closed() {
    init();

    let document = json!({
        "experiments": [
            {"id": "a", "name": "A", "flags": ["app.unknown"], "condition": "frobnicate(1)"},
            {"id": "b", "name": "B", "flags": ["app.underflow"], "condition": "ifThen(true)"},
            {"id": "c", "name": "C", "flags": ["app.number"], "condition": "42"},
            {"id": "d", "name": "D", "flags": ["app.missing"], "condition": "gte(property(\"age\"), 18)"},
        ],
    });
    let (source, _) = FixedSource::new(SourceKind::Cdn, Some(document));
    let engine = EngineConfig::from_app_key("app-key")
        .configuration_source(source)
        .to_engine()
        .unwrap();
    let app = engine
        .register(
            "app",
            [
                ("unknown", DefaultEntityProvider.create_flag(true)),
                ("underflow", DefaultEntityProvider.create_flag(true)),
                ("number", DefaultEntityProvider.create_flag(true)),
                ("missing", DefaultEntityProvider.create_flag(false)),
            ],
        )
        .unwrap();
    engine.fetch().unwrap();

    for name in ["unknown", "underflow", "number"] {
        assert!(app.flag(name).unwrap().is_enabled(&Context::new()), "{name}");
    }
    assert!(!app.flag("missing").unwrap().is_enabled(&Context::new()));
}

#[test]
fn registration_errors() {
    let engine = EngineConfig::from_app_key("app-key").to_engine().unwrap();

    engine
        .register("app", [("a", DefaultEntityProvider.create_flag(false))])
        .unwrap();

    assert!(matches!(
        engine.register("app", [("b", DefaultEntityProvider.create_flag(false))]),
        Err(Error::NamespaceAlreadyRegistered(_))
    ));
    assert!(matches!(
        engine.register("", [("app.a", DefaultEntityProvider.create_flag(false))]),
        Err(Error::FlagAlreadyRegistered(_))
    ));
    assert!(matches!(
        engine.register(
            "ui",
            [("color", DefaultEntityProvider.create_variant("pink", &["red"]))]
        ),
        Err(Error::InvalidDefaultValue { .. })
    ));
}

#[test]
fn poller_stops() {
    init();

    let (source, calls) = FixedSource::new(SourceKind::Cdn, Some(rollout_document()));
    let engine = EngineConfig::from_app_key("app-key")
        .configuration_source(source)
        .poll_interval(Duration::from_millis(10))
        .poll_jitter(Duration::ZERO)
        .to_engine()
        .unwrap();

    let poller = engine.start_poller_thread().unwrap();
    poller.wait_for_configuration().unwrap();
    std::thread::sleep(Duration::from_millis(50));
    poller.stop();
    let at_stop = calls.load(Ordering::SeqCst);
    poller.shutdown().unwrap();
    std::thread::sleep(Duration::from_millis(50));

    assert!(at_stop >= 2, "poller should have cycled, got {at_stop}");
    assert!(calls.load(Ordering::SeqCst) <= at_stop + 1);
}

#[test]
fn evaluation_never_mixes_generations() {
    init();

    let engine = Arc::new(
        EngineConfig::from_app_key("app-key")
            .configuration_source(AlternatingSource {
                generation: AtomicU64::new(0),
            })
            .to_engine()
            .unwrap(),
    );
    let app = engine
        .register("app", [("consistent", DefaultEntityProvider.create_flag(false))])
        .unwrap();
    let flag = app.flag("consistent").unwrap().clone();
    engine.fetch().unwrap();

    let writer = {
        let engine = Arc::clone(&engine);
        std::thread::spawn(move || {
            for _ in 0..200 {
                engine.fetch().unwrap();
            }
        })
    };
    let readers: Vec<_> = (0..4)
        .map(|_| {
            let flag = flag.clone();
            std::thread::spawn(move || {
                for _ in 0..2000 {
                    assert!(flag.is_enabled(&Context::new()));
                }
            })
        })
        .collect();

    writer.join().unwrap();
    for reader in readers {
        reader.join().unwrap();
    }
    assert_eq!(engine.configuration().generation, 201);
}

#[test]
fn impressions_are_reported() {
    init();

    let handled = Arc::new(Mutex::new(Vec::<ImpressionEvent>::new()));
    let delivered = Arc::new(Mutex::new(Vec::<String>::new()));
    let (source, _) = FixedSource::new(SourceKind::Cdn, Some(rollout_document()));
    let engine = EngineConfig::from_app_key("app-key")
        .configuration_source(source)
        .global_context(context(&[("platform", "ios")]))
        .impression_handler({
            let handled = Arc::clone(&handled);
            move |event: ImpressionEvent| handled.lock().unwrap().push(event)
        })
        .analytics(AnalyticsConfig::new("http://localhost/batch", "write-key").with_batch_size(2))
        .impression_sink({
            let delivered = Arc::clone(&delivered);
            move |events: &[ImpressionEvent]| -> rox::Result<()> {
                delivered
                    .lock()
                    .unwrap()
                    .extend(events.iter().map(|event| event.value.clone()));
                Ok(())
            }
        })
        .to_engine()
        .unwrap();
    let app = engine
        .register("app", [("checkout", DefaultEntityProvider.create_flag(false))])
        .unwrap();
    engine.fetch().unwrap();

    let checkout = app.flag("checkout").unwrap();
    checkout.is_enabled(&context(&[("uid", "user-3")]));
    checkout.is_enabled(&context(&[("uid", "user-7")]));
    checkout.is_enabled(&context(&[("uid", "user-3")]));
    assert!(engine.shutdown(Duration::from_secs(5)));

    let handled = handled.lock().unwrap();
    assert_eq!(handled.len(), 3);
    assert_eq!(handled[0].flag_name, "app.checkout");
    assert_eq!(handled[0].context.get("platform"), Some(&"ios".into()));
    assert_eq!(handled[0].experiment.as_ref().unwrap().id, "e-checkout");
    assert_eq!(*delivered.lock().unwrap(), vec!["true", "false", "true"]);
    // Release the guard: the evaluation below runs the impression handler, which locks `handled`.
    drop(handled);

    // Evaluation keeps working after shutdown.
    assert!(checkout.is_enabled(&context(&[("uid", "user-3")])));
    assert_eq!(delivered.lock().unwrap().len(), 3);
}
