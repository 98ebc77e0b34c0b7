//! Live-mode dispatch through a channel watcher

use std::sync::Arc;
use std::time::Duration;

use logtally_metrics::Store;
use logtally_runtime::{ChannelWatcher, Error, LogLine, Runtime, RuntimeConfig, RuntimeOptions};

fn runtime(capacity: usize) -> Arc<Runtime> {
    let config = RuntimeConfig {
        channel_capacity: capacity,
        ..RuntimeConfig::default()
    };
    Arc::new(Runtime::new(RuntimeOptions::new(
        config,
        Arc::new(Store::new()),
    )))
}

#[tokio::test]
async fn test_live_run_drains_watcher() {
    let rt = runtime(2);
    rt.load("lines", "counter total_lines\n/./ { total_lines++ }\n")
        .unwrap();
    rt.load(
        "bytes",
        "counter bytes by user\n/user=(\\w+) bytes=(\\d+)/ { bytes[$1] += $2 }\n",
    )
    .unwrap();

    let (handle, watcher) = ChannelWatcher::new(4);
    let feeder = tokio::spawn(async move {
        let lines = [
            "user=alice bytes=10",
            "user=bob bytes=20",
            "user=alice bytes=5",
        ];
        for (i, text) in lines.iter().enumerate() {
            assert!(handle.send_line(LogLine::new("app.log", i as u64 + 1, *text)).await);
        }
        assert!(handle.send_error("gone.log", "permission denied").await);
    });

    let report = rt.run(watcher).await.unwrap();
    feeder.await.unwrap();

    assert_eq!(report.lines, 3);
    assert_eq!(report.source_errors, 1);

    let snapshot = rt.store().snapshot();
    assert_eq!(snapshot.value("total_lines", &[]), Some(3.0));
    assert_eq!(snapshot.value("bytes", &["alice"]), Some(15.0));
    assert_eq!(snapshot.value("bytes", &["bob"]), Some(20.0));
}

#[tokio::test]
async fn test_live_line_order_per_program() {
    let rt = runtime(1);
    rt.load("last", "gauge last\n/n=(\\d+)/ { last = $1 }\n")
        .unwrap();

    let (handle, watcher) = ChannelWatcher::new(1);
    let feeder = tokio::spawn(async move {
        for n in 1..=50u64 {
            handle.send_line(LogLine::new("seq.log", n, format!("n={n}"))).await;
        }
    });

    rt.run(watcher).await.unwrap();
    feeder.await.unwrap();

    assert_eq!(rt.store().snapshot().value("last", &[]), Some(50.0));
    assert_eq!(rt.program_stats()[0].lines, 50);
}

#[tokio::test]
async fn test_close_stops_live_run() {
    let rt = runtime(8);
    rt.load("p", "counter c\n/./ { c++ }\n").unwrap();

    let (handle, watcher) = ChannelWatcher::new(8);
    let runner = {
        let rt = Arc::clone(&rt);
        tokio::spawn(async move { rt.run(watcher).await })
    };

    handle.send_line(LogLine::new("app.log", 1, "hello")).await;
    tokio::time::sleep(Duration::from_millis(50)).await;
    rt.close();

    let report = tokio::time::timeout(Duration::from_secs(5), runner)
        .await
        .expect("run did not stop after close")
        .unwrap()
        .unwrap();
    assert_eq!(report.lines, 1);
    assert_eq!(rt.store().snapshot().value("c", &[]), Some(1.0));

    // The watcher was closed by the runtime.
    assert!(!handle.send_line(LogLine::new("app.log", 2, "late")).await);
}

#[tokio::test]
async fn test_live_run_needs_programs() {
    let rt = runtime(8);
    let (_handle, watcher) = ChannelWatcher::new(1);
    assert!(matches!(rt.run(watcher).await, Err(Error::NoPrograms)));
}
