use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tracing_subscriber::{EnvFilter, fmt};

use daybreak::core::EngineConfig;
use daybreak::engine::Engine;
use daybreak::host::ReplayFeed;
use daybreak::journal::{EventSink, Journal};
use daybreak::monitor::{
    IncidentMonitor, LogOnlySink, NotificationGate, NotificationSink, WebhookSink,
};
use daybreak::stream::{InertFactory, RegistryProbe, StreamRegistry};
use daybreak::tradespec::TradeSpec;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();

    // 1. Logger
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,daybreak=debug"));
    fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_level(true)
        .init();

    // 2. Config and trading spec
    let config_path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "daybreak.toml".to_string());
    let cfg = EngineConfig::load(Path::new(&config_path))?;
    let spec = TradeSpec::load(&cfg.app.spec_path)?;
    let bar_period_secs = cfg.exchange.bar_period_secs;

    // 3. Journal and notification plumbing, owned here and stopped here
    let journal = Journal::start(&cfg.app.journal_path).await?;
    let journal_sink: Arc<dyn EventSink> = journal.clone();

    let webhook_sink = cfg.notify.webhook_url.clone().map(WebhookSink::start);
    let sink: Arc<dyn NotificationSink> = match &webhook_sink {
        Some(s) => s.clone(),
        None => Arc::new(LogOnlySink),
    };
    let gate = Arc::new(NotificationGate::new(
        cfg.notify.min_interval_secs,
        sink,
        journal_sink.clone(),
    ));

    // 4. Registry, monitor, engine
    let registry = Arc::new(Mutex::new(StreamRegistry::new(Box::new(InertFactory))));
    let monitor = Arc::new(IncidentMonitor::new(
        cfg.monitor.clone(),
        gate.clone(),
        journal_sink.clone(),
        Arc::new(RegistryProbe(registry.clone())),
    ));
    monitor.clone().spawn_loop();

    let engine = Engine::new(cfg, spec, registry, monitor, gate, journal_sink)?;
    if let Err(e) = engine.start(chrono::Utc::now()) {
        journal.stop().await;
        return Err(e.into());
    }

    // 5. Drive: deterministic replay when requested, otherwise the host tick
    //    loop until ctrl-c
    if let Ok(replay_path) = std::env::var("DAYBREAK_REPLAY") {
        tracing::info!("replaying bars from {}", replay_path);
        let feed = ReplayFeed::from_jsonl(Path::new(&replay_path), bar_period_secs)?;
        feed.run(&engine);
    } else {
        let mut ticker = tokio::time::interval(Duration::from_secs(1));
        loop {
            tokio::select! {
                _ = ticker.tick() => engine.tick(chrono::Utc::now()),
                _ = tokio::signal::ctrl_c() => {
                    tracing::info!("shutdown requested");
                    break;
                }
            }
        }
    }

    engine.stop(chrono::Utc::now()).await?;
    if let Some(s) = webhook_sink {
        s.stop().await;
    }
    journal.stop().await;
    Ok(())
}
