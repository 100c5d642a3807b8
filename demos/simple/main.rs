use std::time::Duration;

use rox::{Context, DefaultEntityProvider, EngineConfig, EntityProvider, ImpressionEvent};

pub fn main() -> rox::Result<()> {
    // Configure env_logger to see engine logs.
    env_logger::Builder::from_env(env_logger::Env::new().default_filter_or("rox")).init();

    let app_key =
        std::env::var("ROX_APP_KEY").expect("ROX_APP_KEY env variable should contain app key");
    let engine = EngineConfig::from_app_key(app_key)
        .impression_handler(|event: ImpressionEvent| {
            println!("Impression: {:?}", event);
        })
        .to_engine()?;

    let app = engine.register(
        "app",
        [
            ("checkout", DefaultEntityProvider.create_flag(false)),
            (
                "buttonColor",
                DefaultEntityProvider.create_variant("red", &["red", "green", "blue"]),
            ),
        ],
    )?;
    if let Err(err) = engine.send_state() {
        println!("error sending state: {:?}", err);
    }

    // Start a poller thread to fetch configuration. Until the first sync, every flag returns its
    // default value.
    let poller = engine.start_poller_thread()?;
    if let Err(err) = poller.wait_for_configuration() {
        println!("error requesting configuration: {:?}", err);
    }

    let context: Context = [("uid".to_owned(), "user-3".into())].into_iter().collect();
    if let (Some(checkout), Some(color)) = (app.flag("checkout"), app.variant("buttonColor")) {
        println!("checkout enabled: {}", checkout.is_enabled(&context));
        println!("button color: {}", color.value(&context));
    }

    poller.shutdown()?;
    engine.shutdown(Duration::from_secs(5));

    Ok(())
}
