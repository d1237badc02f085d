use std::fs;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use runtime::{ConfigOptions, ConfigProvider};
use tempfile::tempdir;

fn wait_until(deadline: Duration, mut cond: impl FnMut() -> bool) -> bool {
    let start = Instant::now();
    while start.elapsed() < deadline {
        if cond() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(25));
    }
    cond()
}

#[test]
fn file_change_reloads_and_fires_callbacks() {
    let tmp = tempdir().unwrap();
    let path = tmp.path().join("watched.yaml");
    fs::write(&path, "hello:\n  greeting: hi\n").unwrap();

    let cfg = ConfigProvider::from_options(ConfigOptions {
        file: Some(path.clone()),
        ..Default::default()
    })
    .unwrap();

    let fired = Arc::new(AtomicUsize::new(0));
    let other = Arc::new(AtomicUsize::new(0));
    {
        let fired = fired.clone();
        cfg.on_change(move |_| {
            fired.fetch_add(1, Ordering::SeqCst);
        })
        .unwrap();
    }
    {
        let other = other.clone();
        cfg.sub("hello")
            .on_change(move |view| {
                assert_eq!(view.scope(), "hello");
                if view.get("greeting").string() == "hey" {
                    other.fetch_add(1, Ordering::SeqCst);
                }
            })
            .unwrap();
    }

    // Give the OS watcher a moment to register.
    std::thread::sleep(Duration::from_millis(100));
    fs::write(&path, "hello:\n  greeting: hey\n").unwrap();

    assert!(
        wait_until(Duration::from_secs(5), || fired.load(Ordering::SeqCst) > 0),
        "on_change callback was not invoked"
    );
    assert!(wait_until(Duration::from_secs(5), || other.load(Ordering::SeqCst) > 0));
    assert_eq!(cfg.get("hello.greeting").string(), "hey");
}

#[test]
fn broken_edit_keeps_previous_configuration() {
    let tmp = tempdir().unwrap();
    let path = tmp.path().join("keep.yaml");
    fs::write(&path, "value: 1\n").unwrap();

    let cfg = ConfigProvider::from_options(ConfigOptions {
        file: Some(path.clone()),
        ..Default::default()
    })
    .unwrap();

    let fired = Arc::new(AtomicUsize::new(0));
    {
        let fired = fired.clone();
        cfg.on_change(move |_| {
            fired.fetch_add(1, Ordering::SeqCst);
        })
        .unwrap();
    }

    std::thread::sleep(Duration::from_millis(100));
    fs::write(&path, "value: [unclosed\n").unwrap();
    std::thread::sleep(Duration::from_millis(500));

    assert_eq!(cfg.get("value").int(), 1);
    assert_eq!(fired.load(Ordering::SeqCst), 0);
}

#[test]
fn on_change_without_file_is_accepted() {
    let cfg = ConfigProvider::empty();
    cfg.on_change(|_| {}).unwrap();
    assert!(cfg.config_file().is_none());
}
