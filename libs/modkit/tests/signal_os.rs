//! Real OS signal delivery. Kept in its own test binary since the signal goes
//! to the whole process.
#![cfg(unix)]

use std::time::Duration;

use modkit::{Signal, SignalNotifier};
use tokio_util::sync::CancellationToken;

#[tokio::test]
async fn sigterm_wakes_the_notifier() {
    let notifier = SignalNotifier::new().expect("signal listeners");
    notifier.on_signal(|_, signal| signal == Signal::Terminate);

    let status = std::process::Command::new("kill")
        .args(["-TERM", &std::process::id().to_string()])
        .status()
        .expect("kill is available");
    assert!(status.success());

    let received = tokio::time::timeout(Duration::from_secs(5), notifier.wait(&CancellationToken::new()))
        .await
        .expect("signal should arrive");
    assert_eq!(received, Some(Signal::Terminate));
}
