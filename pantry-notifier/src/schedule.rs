use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Days, Local, NaiveTime, TimeZone, Utc};
use tokio::task::JoinHandle;
use tracing::info;

use health::HealthHandle;

use crate::notifier::{ExpiryNotifier, RunOutcome};

/// The first instant strictly after `now` whose wall-clock time in `now`'s
/// zone is `at`. Days where `at` falls in a DST gap are skipped; on days where
/// it happens twice, the earlier instant wins.
pub fn next_trigger<Tz: TimeZone>(now: &DateTime<Tz>, at: NaiveTime) -> DateTime<Tz> {
    let zone = now.timezone();
    let today = now.date_naive();

    (0..=2)
        .filter_map(|offset| today.checked_add_days(Days::new(offset)))
        .filter_map(|day| zone.from_local_datetime(&day.and_time(at)).earliest())
        .find(|candidate| candidate > now)
        .unwrap_or_else(|| now.clone() + chrono::Duration::days(1))
}

/// Sleep until `deadline`, waking at least every `heartbeat` to report liveness.
async fn sleep_until(deadline: DateTime<Utc>, liveness: &HealthHandle, heartbeat: Duration) {
    loop {
        liveness.report_healthy();

        let remaining = match (deadline - Utc::now()).to_std() {
            Ok(remaining) if !remaining.is_zero() => remaining,
            _ => return,
        };
        tokio::time::sleep(remaining.min(heartbeat)).await;
    }
}

/// Trigger a scan every day at `at` local time. Each scan runs on its own
/// task, so a scan still going at the next trigger is skipped by the notifier.
pub async fn run_daily(
    notifier: Arc<ExpiryNotifier>,
    at: NaiveTime,
    liveness: HealthHandle,
    heartbeat: Duration,
) {
    loop {
        let next = next_trigger(&Local::now(), at);
        info!("next expiry scan at {}", next);

        sleep_until(next.with_timezone(&Utc), &liveness, heartbeat).await;

        trigger_once(&notifier);
    }
}

/// Start a run on its own task without waiting for it.
pub fn trigger_once(notifier: &Arc<ExpiryNotifier>) -> JoinHandle<RunOutcome> {
    let notifier = notifier.clone();
    tokio::spawn(async move { notifier.run(Utc::now()).await })
}
