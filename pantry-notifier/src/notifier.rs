use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};
use futures::stream::{self, StreamExt};
use tokio::sync::Semaphore;
use tracing::{error, info, warn};

use pantry_common::notification::{NotificationTransport, PushMessage};
use pantry_common::store::{ProductOrder, Store, StoreError, StoreResult};

use crate::expiry::{alert_message, eligible_products};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// The push transport was not set up at start-up.
    TransportUnavailable,
    /// A previous run still holds the guard.
    AlreadyRunning,
}

/// Counts from one completed run.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct RunSummary {
    pub products: usize,
    pub devices: usize,
    pub eligible: usize,
    pub attempted: usize,
    pub delivered: usize,
    pub failed: usize,
}

#[derive(Debug)]
pub enum RunOutcome {
    Skipped(SkipReason),
    Failed(StoreError),
    Completed(RunSummary),
}

impl RunOutcome {
    fn label(&self) -> &'static str {
        match self {
            RunOutcome::Skipped(SkipReason::TransportUnavailable) => "skipped_transport",
            RunOutcome::Skipped(SkipReason::AlreadyRunning) => "skipped_running",
            RunOutcome::Failed(_) => "failed",
            RunOutcome::Completed(_) => "completed",
        }
    }
}

/// Scans products for upcoming expiries and alerts every registered device.
pub struct ExpiryNotifier {
    store: Arc<dyn Store>,
    transport: Arc<dyn NotificationTransport>,
    dispatch_concurrency: usize,
    running: Semaphore,
}

impl ExpiryNotifier {
    /// `dispatch_concurrency` of 1 sends one message at a time.
    pub fn new(
        store: Arc<dyn Store>,
        transport: Arc<dyn NotificationTransport>,
        dispatch_concurrency: usize,
    ) -> Self {
        Self {
            store,
            transport,
            dispatch_concurrency: dispatch_concurrency.max(1),
            running: Semaphore::new(1),
        }
    }

    /// Run one scan at `now`. Never returns an error: failures are logged and
    /// reflected in the outcome. A run that starts while another is in progress
    /// is skipped.
    pub async fn run(&self, now: DateTime<Utc>) -> RunOutcome {
        let start_time = Instant::now();

        let outcome = match self.running.try_acquire() {
            Err(_) => {
                warn!("previous expiry scan is still running, skipping this one");
                RunOutcome::Skipped(SkipReason::AlreadyRunning)
            }
            Ok(_permit) if !self.transport.initialized() => {
                info!("notification transport is not initialized, skipping expiry scan");
                RunOutcome::Skipped(SkipReason::TransportUnavailable)
            }
            Ok(_permit) => match self.scan_and_dispatch(now).await {
                Ok(summary) => {
                    info!(
                        "expiry scan done: products={} devices={} eligible={} attempted={} delivered={} failed={}",
                        summary.products,
                        summary.devices,
                        summary.eligible,
                        summary.attempted,
                        summary.delivered,
                        summary.failed
                    );
                    RunOutcome::Completed(summary)
                }
                Err(e) => {
                    error!("expiry scan failed: {}", e);
                    RunOutcome::Failed(e)
                }
            },
        };

        let labels = [("outcome", outcome.label())];
        metrics::counter!("expiry_runs_total", &labels).increment(1);
        metrics::histogram!("expiry_run_duration_seconds", &labels)
            .record(start_time.elapsed().as_secs_f64());

        outcome
    }

    async fn scan_and_dispatch(&self, now: DateTime<Utc>) -> StoreResult<RunSummary> {
        self.store.ensure_connected().await?;

        let products = self.store.list_products(ProductOrder::Insertion).await?;
        let devices = self.store.list_devices().await?;

        let mut eligible = 0;
        let mut messages: Vec<PushMessage> = Vec::new();
        for (product, days) in eligible_products(&products, now) {
            eligible += 1;
            messages.extend(
                devices
                    .iter()
                    .map(|device| alert_message(product, days, &device.fcm_token)),
            );
        }
        let attempted = messages.len();

        let outcomes: Vec<bool> = stream::iter(messages)
            .map(|message| async move { self.dispatch(&message).await })
            .buffered(self.dispatch_concurrency)
            .collect()
            .await;
        let delivered = outcomes.into_iter().filter(|delivered| *delivered).count();

        Ok(RunSummary {
            products: products.len(),
            devices: devices.len(),
            eligible,
            attempted,
            delivered,
            failed: attempted - delivered,
        })
    }

    /// One delivery attempt. Failures are logged and counted, never propagated.
    async fn dispatch(&self, message: &PushMessage) -> bool {
        match self.transport.send(message).await {
            Ok(()) => {
                metrics::counter!("expiry_notifications_total", &[("outcome", "delivered")])
                    .increment(1);
                true
            }
            Err(e) => {
                metrics::counter!("expiry_notifications_total", &[("outcome", "failed")])
                    .increment(1);
                error!("failed to send expiry alert \"{}\": {}", message.body, e);
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::sync::Mutex;

    use async_trait::async_trait;
    use chrono::{Duration, TimeZone};
    use pantry_common::memstore::MemoryStore;
    use pantry_common::notification::TransportError;
    use pantry_common::product::{Device, NewProduct, Product, ProductUpdate};
    use pantry_common::store::{DeviceRegistration, DeviceStore, ProductStore};
    use tokio::sync::Notify;

    /// Records every message and fails sends to the listed tokens.
    #[derive(Default)]
    struct RecordingTransport {
        uninitialized: bool,
        failing_tokens: HashSet<String>,
        sent: Mutex<Vec<PushMessage>>,
        // When set, the first send parks until `release` is notified.
        gate: Option<(Arc<Notify>, Arc<Notify>)>,
    }

    impl RecordingTransport {
        fn sent(&self) -> Vec<PushMessage> {
            self.sent.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl NotificationTransport for RecordingTransport {
        fn initialized(&self) -> bool {
            !self.uninitialized
        }

        async fn send(&self, message: &PushMessage) -> Result<(), TransportError> {
            if let Some((entered, release)) = &self.gate {
                entered.notify_one();
                release.notified().await;
            }

            self.sent.lock().unwrap().push(message.clone());

            if self.failing_tokens.contains(&message.token) {
                return Err(TransportError::Rejected {
                    status: 404,
                    body: "unregistered token".to_owned(),
                });
            }
            Ok(())
        }
    }

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 1, 9, 0, 0).unwrap()
    }

    fn new_product(name: &str, expires_in: Duration, notify_before_days: i32) -> NewProduct {
        NewProduct {
            name: name.to_owned(),
            category: "Dairy".to_owned(),
            subcategory: String::new(),
            quantity: 1.0,
            weight: None,
            price: 1.0,
            expiry_date: now() + expires_in,
            notify_before_days,
        }
    }

    async fn seeded_store(products: Vec<NewProduct>, tokens: &[&str]) -> Arc<MemoryStore> {
        let store = Arc::new(MemoryStore::new());
        for product in products {
            store.insert_product(product).await.unwrap();
        }
        for token in tokens {
            store.register_device(token).await.unwrap();
        }
        store
    }

    fn completed(outcome: RunOutcome) -> RunSummary {
        match outcome {
            RunOutcome::Completed(summary) => summary,
            other => panic!("expected a completed run, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_alerts_inside_lead_window() {
        let store = seeded_store(
            vec![
                new_product("Yogurt", Duration::hours(60), 3),
                new_product("Cheese", Duration::hours(60), 2),
            ],
            &["device-1"],
        )
        .await;
        let transport = Arc::new(RecordingTransport::default());
        let notifier = ExpiryNotifier::new(store, transport.clone(), 1);

        let summary = completed(notifier.run(now()).await);

        assert_eq!(summary.products, 2);
        assert_eq!(summary.eligible, 1);
        assert_eq!(summary.attempted, 1);

        let sent = transport.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].token, "device-1");
        assert_eq!(sent[0].title, "Expiry Alert");
        assert_eq!(sent[0].body, "Yogurt expires in 3 days");
    }

    #[tokio::test]
    async fn test_expired_products_are_not_alerted() {
        let store = seeded_store(
            vec![
                new_product("Expired", -Duration::hours(1), 365),
                new_product("Expiring now", Duration::zero(), 365),
            ],
            &["device-1"],
        )
        .await;
        let transport = Arc::new(RecordingTransport::default());
        let notifier = ExpiryNotifier::new(store, transport.clone(), 1);

        let summary = completed(notifier.run(now()).await);

        assert_eq!(summary.eligible, 0);
        assert!(transport.sent().is_empty());
    }

    #[tokio::test]
    async fn test_every_device_gets_every_alert() {
        let store = seeded_store(
            vec![
                new_product("Milk", Duration::hours(20), 1),
                new_product("Bread", Duration::days(30), 1),
                new_product("Eggs", Duration::hours(36), 2),
            ],
            &["a", "b", "c"],
        )
        .await;
        let transport = Arc::new(RecordingTransport::default());
        let notifier = ExpiryNotifier::new(store, transport.clone(), 1);

        let summary = completed(notifier.run(now()).await);

        assert_eq!(
            summary,
            RunSummary {
                products: 3,
                devices: 3,
                eligible: 2,
                attempted: 6,
                delivered: 6,
                failed: 0,
            }
        );

        let sent: Vec<(String, String)> = transport
            .sent()
            .into_iter()
            .map(|m| (m.body, m.token))
            .collect();
        assert_eq!(
            sent,
            vec![
                ("Milk expires in 1 day".to_owned(), "a".to_owned()),
                ("Milk expires in 1 day".to_owned(), "b".to_owned()),
                ("Milk expires in 1 day".to_owned(), "c".to_owned()),
                ("Eggs expires in 2 days".to_owned(), "a".to_owned()),
                ("Eggs expires in 2 days".to_owned(), "b".to_owned()),
                ("Eggs expires in 2 days".to_owned(), "c".to_owned()),
            ]
        );
    }

    #[tokio::test]
    async fn test_failed_sends_do_not_stop_the_run() {
        let store = seeded_store(
            vec![
                new_product("Milk", Duration::hours(20), 1),
                new_product("Eggs", Duration::hours(36), 2),
            ],
            &["a", "stale", "c"],
        )
        .await;
        let transport = Arc::new(RecordingTransport {
            failing_tokens: HashSet::from(["stale".to_owned()]),
            ..Default::default()
        });
        let notifier = ExpiryNotifier::new(store, transport.clone(), 1);

        let summary = completed(notifier.run(now()).await);

        assert_eq!(summary.attempted, 6);
        assert_eq!(summary.delivered, 4);
        assert_eq!(summary.failed, 2);
        assert_eq!(transport.sent().len(), 6);
    }

    #[tokio::test]
    async fn test_bounded_fan_out_sends_everything() {
        let store = seeded_store(
            vec![
                new_product("Milk", Duration::hours(20), 1),
                new_product("Eggs", Duration::hours(36), 2),
            ],
            &["a", "b", "stale"],
        )
        .await;
        let transport = Arc::new(RecordingTransport {
            failing_tokens: HashSet::from(["stale".to_owned()]),
            ..Default::default()
        });
        let notifier = ExpiryNotifier::new(store, transport.clone(), 4);

        let summary = completed(notifier.run(now()).await);

        assert_eq!(summary.attempted, 6);
        assert_eq!(summary.delivered, 4);
        assert_eq!(transport.sent().len(), 6);
    }

    #[tokio::test]
    async fn test_uninitialized_transport_skips_run() {
        let store = seeded_store(
            vec![new_product("Milk", Duration::hours(20), 1)],
            &["a"],
        )
        .await;
        let transport = Arc::new(RecordingTransport {
            uninitialized: true,
            ..Default::default()
        });
        let notifier = ExpiryNotifier::new(store, transport.clone(), 1);

        assert!(matches!(
            notifier.run(now()).await,
            RunOutcome::Skipped(SkipReason::TransportUnavailable)
        ));
        assert!(transport.sent().is_empty());
    }

    #[tokio::test]
    async fn test_no_devices_sends_nothing() {
        let store = seeded_store(vec![new_product("Milk", Duration::hours(20), 1)], &[]).await;
        let transport = Arc::new(RecordingTransport::default());
        let notifier = ExpiryNotifier::new(store, transport.clone(), 1);

        let summary = completed(notifier.run(now()).await);

        assert_eq!(summary.eligible, 1);
        assert_eq!(summary.attempted, 0);
        assert!(transport.sent().is_empty());
    }

    #[tokio::test]
    async fn test_overlapping_run_is_skipped() {
        let store = seeded_store(
            vec![new_product("Milk", Duration::hours(20), 1)],
            &["a"],
        )
        .await;
        let entered = Arc::new(Notify::new());
        let release = Arc::new(Notify::new());
        let transport = Arc::new(RecordingTransport {
            gate: Some((entered.clone(), release.clone())),
            ..Default::default()
        });
        let notifier = Arc::new(ExpiryNotifier::new(store, transport.clone(), 1));

        let first = tokio::spawn({
            let notifier = notifier.clone();
            async move { notifier.run(now()).await }
        });
        entered.notified().await;

        assert!(matches!(
            notifier.run(now()).await,
            RunOutcome::Skipped(SkipReason::AlreadyRunning)
        ));

        release.notify_one();
        let summary = completed(first.await.unwrap());
        assert_eq!(summary.delivered, 1);
        assert_eq!(transport.sent().len(), 1);
    }

    struct UnreachableStore;

    #[async_trait]
    impl ProductStore for UnreachableStore {
        async fn insert_product(&self, _: NewProduct) -> StoreResult<Product> {
            unreachable!()
        }

        async fn find_product_by_name(&self, _: &str) -> StoreResult<Option<Product>> {
            unreachable!()
        }

        async fn list_products(&self, _: ProductOrder) -> StoreResult<Vec<Product>> {
            unreachable!()
        }

        async fn get_product(&self, _: i64) -> StoreResult<Option<Product>> {
            unreachable!()
        }

        async fn update_product(&self, _: i64, _: ProductUpdate) -> StoreResult<Option<Product>> {
            unreachable!()
        }

        async fn delete_product(&self, _: i64) -> StoreResult<bool> {
            unreachable!()
        }
    }

    #[async_trait]
    impl DeviceStore for UnreachableStore {
        async fn register_device(&self, _: &str) -> StoreResult<DeviceRegistration> {
            unreachable!()
        }

        async fn list_devices(&self) -> StoreResult<Vec<Device>> {
            unreachable!()
        }
    }

    #[async_trait]
    impl Store for UnreachableStore {
        async fn ensure_connected(&self) -> StoreResult<()> {
            Err(StoreError::Connection {
                error: sqlx::Error::PoolTimedOut,
            })
        }
    }

    #[tokio::test]
    async fn test_unreachable_store_fails_run() {
        let transport = Arc::new(RecordingTransport::default());
        let notifier = ExpiryNotifier::new(Arc::new(UnreachableStore), transport.clone(), 1);

        assert!(matches!(
            notifier.run(now()).await,
            RunOutcome::Failed(StoreError::Connection { .. })
        ));
        assert!(transport.sent().is_empty());

        // The guard is released after a failed run.
        assert!(matches!(
            notifier.run(now()).await,
            RunOutcome::Failed(_)
        ));
    }
}
