// tests/pipeline.rs

mod common;

use std::{sync::Arc, time::Duration};

use tokio::{sync::oneshot, time::timeout};

use alertyx::analysis::{AnalysisConfig, Analyzers};
use alertyx::config::{CatalogConfig, MonitorConfig};
use alertyx::events::sources::Source;
use alertyx::monitor::run_monitor;
use alertyx::output::{Note, Notifier, RecordingNotifier};
use alertyx::policy::Policy;
use alertyx::techs::Catalog;

use common::{ScriptedSource, readline};

fn analyzers() -> Analyzers {
    let catalog = Catalog::builtin(&CatalogConfig::default());
    let cfg = AnalysisConfig {
        dedup_window: Duration::from_secs(60),
        dedup_capacity: 16,
        shadow_path: "/etc/shadow".into(),
        cron_dirs: vec![],
        bind_tools: vec![],
    };
    Analyzers::builtin(&catalog, &cfg)
}

async fn wait_until(rec: &RecordingNotifier, pred: impl Fn(&[Note]) -> bool) {
    timeout(Duration::from_secs(3), async {
        while !pred(&rec.notes()) {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("condition not reached in time");
}

#[tokio::test]
async fn one_failing_source_does_not_stop_the_others() {
    let sources: Vec<Arc<dyn Source>> = ["a", "b", "c", "d"]
        .into_iter()
        .enumerate()
        .map(|(i, name)| {
            Arc::new(ScriptedSource {
                name,
                fail: name == "b",
                events: vec![readline(i as u32 + 10, &format!("echo {name}"))],
            }) as Arc<dyn Source>
        })
        .collect();

    let rec = Arc::new(RecordingNotifier::new());
    let notifier: Arc<dyn Notifier> = rec.clone();
    let settings = MonitorConfig { channel_capacity: 1, ..MonitorConfig::default() };
    let (stop_tx, stop_rx) = oneshot::channel::<()>();

    let driver = tokio::spawn(async move {
        run_monitor(sources, analyzers(), Arc::new(Policy::passive()), notifier, &settings, async {
            let _ = stop_rx.await;
        })
        .await
    });

    wait_until(&rec, |notes| {
        notes.iter().filter(|n| matches!(n, Note::Event { .. })).count() == 3
            && notes.iter().any(|n| n.text() == "All modules loaded!")
    })
    .await;

    let notes = rec.notes();
    let loaded: Vec<_> = notes.iter().filter(|n| n.text().starts_with("Loaded module:")).collect();
    assert_eq!(loaded.len(), 3, "{notes:?}");
    assert!(!notes.iter().any(|n| n.text() == "Loaded module: b"));
    assert_eq!(notes.iter().filter(|n| n.text() == "All modules loaded!").count(), 1);
    assert!(notes.iter().any(|n| matches!(n, Note::Err(m) if m.starts_with("Error: b: failed to load"))));

    stop_tx.send(()).unwrap();
    let stats = timeout(Duration::from_secs(3), driver).await.unwrap().unwrap().unwrap();
    assert_eq!(stats.events, 3);
    assert_eq!(stats.errors, 1);
    assert_eq!(rec.notes().iter().filter(|n| n.text() == "All modules loaded!").count(), 1);
}

#[tokio::test]
async fn loop_waits_for_shutdown_when_every_source_is_gone() {
    let sources: Vec<Arc<dyn Source>> = vec![Arc::new(ScriptedSource { name: "broken", fail: true, events: vec![] })];
    let rec = Arc::new(RecordingNotifier::new());
    let settings = MonitorConfig::default();
    let (stop_tx, stop_rx) = oneshot::channel::<()>();

    let driver = run_monitor(
        sources,
        analyzers(),
        Arc::new(Policy::passive()),
        rec.clone(),
        &settings,
        async {
            let _ = stop_rx.await;
        },
    );
    tokio::pin!(driver);

    // the only source failed, yet the monitor keeps running
    assert!(timeout(Duration::from_millis(300), &mut driver).await.is_err());
    assert!(rec.saw("Error: broken: failed to load"));
    assert!(rec.saw("No event sources left"));

    stop_tx.send(()).unwrap();
    let stats = timeout(Duration::from_secs(3), driver).await.unwrap().unwrap();
    assert_eq!(stats.events, 0);
    assert_eq!(stats.errors, 1);
}

#[tokio::test]
async fn monitor_without_sources_runs_until_shutdown() {
    let rec = Arc::new(RecordingNotifier::new());
    let settings = MonitorConfig::default();
    let (stop_tx, stop_rx) = oneshot::channel::<()>();

    let driver = run_monitor(vec![], analyzers(), Arc::new(Policy::passive()), rec.clone(), &settings, async {
        let _ = stop_rx.await;
    });
    tokio::pin!(driver);

    assert!(timeout(Duration::from_millis(300), &mut driver).await.is_err());
    stop_tx.send(()).unwrap();
    let stats = timeout(Duration::from_secs(3), driver).await.unwrap().unwrap();
    assert_eq!(stats.events, 0);
}

#[tokio::test]
async fn stuck_source_is_bounded_by_shutdown_timeout() {
    struct Stubborn;

    #[async_trait::async_trait]
    impl Source for Stubborn {
        fn name(&self) -> &str {
            "stubborn"
        }
        async fn run(
            self: Arc<Self>,
            _tx: tokio::sync::mpsc::Sender<alertyx::events::Event>,
            handle: alertyx::events::context::SourceHandle,
        ) {
            handle.ticket.loaded("stubborn");
            // ignores quit entirely
            std::future::pending::<()>().await;
        }
    }

    let sources: Vec<Arc<dyn Source>> = vec![Arc::new(Stubborn)];
    let rec = Arc::new(RecordingNotifier::new());
    let settings = MonitorConfig { shutdown_timeout: Duration::from_millis(200), ..MonitorConfig::default() };
    let result = timeout(
        Duration::from_secs(3),
        run_monitor(
            sources,
            analyzers(),
            Arc::new(Policy::passive()),
            rec,
            &settings,
            tokio::time::sleep(Duration::from_millis(50)),
        ),
    )
    .await
    .expect("driver must return within the shutdown bound");

    // the aborted source drops its sender, so the loop still drains
    assert!(result.is_ok(), "{result:?}");
}
