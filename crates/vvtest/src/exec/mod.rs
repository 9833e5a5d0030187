pub mod direct;
pub mod launcher;

use std::time::Duration;

/// Sleeps for `duration`; returns true when the sleep was cut short by Ctrl-C.
pub(crate) async fn sleep_or_interrupt(duration: Duration) -> bool {
    tokio::select! {
        _ = tokio::time::sleep(duration) => false,
        result = tokio::signal::ctrl_c() => {
            if let Err(error) = result {
                log::warn!("Cannot listen for Ctrl-C: {error}");
                tokio::time::sleep(duration).await;
                return false;
            }
            true
        }
    }
}

pub(crate) fn format_progress(done: usize, total: usize) -> String {
    let percent = if total == 0 {
        100.0
    } else {
        100.0 * done as f64 / total as f64
    };
    format!("{done}/{total} = {percent:.1}%")
}

pub(crate) fn format_elapsed(elapsed: Duration) -> String {
    humantime::format_duration(Duration::from_secs(elapsed.as_secs())).to_string()
}
