//! End-to-end processing of one login
//!
//! validate -> resolve location -> find neighbors -> classify -> persist -> respond.
//! Any failing step aborts the rest; nothing is retried.

use std::sync::Arc;
use std::time::{Duration, Instant};

use super::error::{DetectionError, InternalError};
use super::neighbors::{NeighborSearch, Side};
use super::travel::TravelClassifier;
use crate::alerting::{AlertQueue, TravelAlert};
use crate::geolocation::LocationCache;
use crate::models::{ClassifiedNeighbor, DetectionResult, GeoLocation, LoginEvent, StoredLogin};
use crate::persistence::{EventStore, PersistenceError};

/// Runs logins through impossible-travel detection
///
/// Holds no per-request state; one instance serves concurrent requests and
/// shares its location cache among them.
#[derive(Clone)]
pub struct DetectionPipeline {
    cache: Arc<LocationCache>,
    store: Arc<dyn EventStore>,
    search: NeighborSearch,
    classifier: TravelClassifier,
    timeout: Option<Duration>,
    alerts: Option<AlertQueue>,
}

impl DetectionPipeline {
    pub fn new(cache: Arc<LocationCache>, store: Arc<dyn EventStore>) -> Self {
        DetectionPipeline {
            cache,
            search: NeighborSearch::new(Arc::clone(&store)),
            store,
            classifier: TravelClassifier::new(),
            timeout: None,
            alerts: None,
        }
    }

    pub fn with_classifier(mut self, classifier: TravelClassifier) -> Self {
        self.classifier = classifier;
        self
    }

    /// Bound the resolve, search and persist steps of each request
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Queue an alert for every suspicious neighbor
    pub fn with_alerts(mut self, alerts: AlertQueue) -> Self {
        self.alerts = Some(alerts);
        self
    }

    pub fn cache(&self) -> &LocationCache {
        &self.cache
    }

    /// Process one login
    pub async fn detect(&self, event: &LoginEvent) -> Result<DetectionResult, DetectionError> {
        event.validate().map_err(DetectionError::Validation)?;

        let result = match self.timeout {
            Some(limit) => tokio::time::timeout(limit, self.run(event))
                .await
                .map_err(|_| InternalError::Timeout(limit))??,
            None => self.run(event).await?,
        };

        if result.is_suspicious() {
            log::info!(
                "Suspicious travel for user {} (event {}) from {}",
                event.user,
                event.event_id,
                event.ip
            );
            self.queue_alerts(event, &result);
        }

        Ok(result)
    }

    async fn run(&self, event: &LoginEvent) -> Result<DetectionResult, InternalError> {
        let current_geo = self.cache.resolve(&event.ip)?;
        let neighbors = self.search.find_neighbors(&event.user, event.timestamp).await?;

        let preceding = neighbors
            .preceding
            .map(|n| self.classify(event, &current_geo, n));
        let subsequent = neighbors
            .subsequent
            .map(|n| self.classify(event, &current_geo, n));

        self.persist(StoredLogin::from_event(event, current_geo)).await?;

        Ok(DetectionResult {
            current_geo,
            preceding,
            subsequent,
        })
    }

    fn classify(
        &self,
        event: &LoginEvent,
        location: &GeoLocation,
        neighbor: StoredLogin,
    ) -> ClassifiedNeighbor {
        let (implied_speed, suspicious) = self.classifier.classify(
            location,
            event.timestamp,
            &neighbor.location,
            neighbor.timestamp,
        );
        ClassifiedNeighbor {
            event: neighbor,
            implied_speed,
            suspicious,
        }
    }

    async fn persist(&self, login: StoredLogin) -> Result<(), PersistenceError> {
        let store = Arc::clone(&self.store);
        let start = Instant::now();
        tokio::task::spawn_blocking(move || store.insert_event(&login)).await??;
        log::debug!("Persisting login took {:?}", start.elapsed());
        Ok(())
    }

    fn queue_alerts(&self, event: &LoginEvent, result: &DetectionResult) {
        let Some(alerts) = &self.alerts else {
            return;
        };
        let sides = [
            (Side::Preceding, &result.preceding),
            (Side::Subsequent, &result.subsequent),
        ];
        for (side, neighbor) in sides {
            if let Some(neighbor) = neighbor.as_ref().filter(|n| n.suspicious) {
                alerts.queue_alert(TravelAlert::new(event, result.current_geo, side, neighbor));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alerting::AlertDispatcher;
    use crate::geolocation::{GeoError, GeoResolver};
    use crate::persistence::{Comparator, SqliteEventStore};
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};

    const SONOMA_IP: &str = "91.207.175.104";
    const PHILADELPHIA_IP: &str = "206.81.252.6";
    const T: i64 = 1_514_764_800;

    /// Resolver over a fixed table, counting provider calls
    struct TableResolver {
        table: HashMap<&'static str, GeoLocation>,
        calls: AtomicUsize,
    }

    impl TableResolver {
        fn new() -> Self {
            let mut table = HashMap::new();
            table.insert(SONOMA_IP, GeoLocation::new(38.291962, -122.458, 20));
            table.insert(PHILADELPHIA_IP, GeoLocation::new(39.952583, -75.165222, 10));
            TableResolver {
                table,
                calls: AtomicUsize::new(0),
            }
        }
    }

    impl GeoResolver for TableResolver {
        fn lookup(&self, ip: &str) -> Result<GeoLocation, GeoError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.table
                .get(ip)
                .copied()
                .ok_or_else(|| GeoError::NotFound(ip.to_string()))
        }
    }

    struct BrokenStore {
        fail_comparator: Option<Comparator>,
        fail_insert: bool,
        inner: SqliteEventStore,
    }

    impl EventStore for BrokenStore {
        fn query_events(
            &self,
            user: &str,
            comparator: Comparator,
            timestamp: i64,
        ) -> Result<Vec<StoredLogin>, PersistenceError> {
            if self.fail_comparator == Some(comparator) {
                return Err(PersistenceError::InvalidData("query failed".to_string()));
            }
            self.inner.query_events(user, comparator, timestamp)
        }

        fn insert_event(&self, event: &StoredLogin) -> Result<(), PersistenceError> {
            if self.fail_insert {
                return Err(PersistenceError::InvalidData("insert failed".to_string()));
            }
            self.inner.insert_event(event)
        }

        fn events_for_user(&self, user: &str, limit: usize) -> Result<Vec<StoredLogin>, PersistenceError> {
            self.inner.events_for_user(user, limit)
        }

        fn ping(&self) -> Result<(), PersistenceError> {
            Ok(())
        }
    }

    /// Store whose neighbor queries stall before answering
    struct SlowStore {
        delay: Duration,
        inner: SqliteEventStore,
    }

    impl EventStore for SlowStore {
        fn query_events(
            &self,
            user: &str,
            comparator: Comparator,
            timestamp: i64,
        ) -> Result<Vec<StoredLogin>, PersistenceError> {
            std::thread::sleep(self.delay);
            self.inner.query_events(user, comparator, timestamp)
        }

        fn insert_event(&self, event: &StoredLogin) -> Result<(), PersistenceError> {
            self.inner.insert_event(event)
        }

        fn events_for_user(&self, user: &str, limit: usize) -> Result<Vec<StoredLogin>, PersistenceError> {
            self.inner.events_for_user(user, limit)
        }

        fn ping(&self) -> Result<(), PersistenceError> {
            Ok(())
        }
    }

    fn create_pipeline() -> (Arc<TableResolver>, Arc<SqliteEventStore>, DetectionPipeline) {
        let resolver = Arc::new(TableResolver::new());
        let store = Arc::new(SqliteEventStore::in_memory().unwrap());
        let cache = Arc::new(LocationCache::new(resolver.clone()));
        let pipeline = DetectionPipeline::new(cache, store.clone());
        (resolver, store, pipeline)
    }

    fn broken_pipeline(fail_comparator: Option<Comparator>, fail_insert: bool) -> (Arc<BrokenStore>, DetectionPipeline) {
        let store = Arc::new(BrokenStore {
            fail_comparator,
            fail_insert,
            inner: SqliteEventStore::in_memory().unwrap(),
        });
        let cache = Arc::new(LocationCache::new(Arc::new(TableResolver::new())));
        (store.clone(), DetectionPipeline::new(cache, store))
    }

    #[tokio::test]
    async fn test_first_login_has_no_neighbors() {
        let (_, store, pipeline) = create_pipeline();
        let event = LoginEvent::new("bob", SONOMA_IP, T, "e1");

        let result = pipeline.detect(&event).await.unwrap();
        assert_eq!(result.current_geo.latitude, 38.291962);
        assert_eq!(result.current_geo.accuracy_radius, 20);
        assert!(result.preceding.is_none());
        assert!(result.subsequent.is_none());

        let stored = store.events_for_user("bob", 10).unwrap();
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].event_id, "e1");
        assert_eq!(stored[0].speed, 0.0);
    }

    #[tokio::test]
    async fn test_ten_minutes_coast_to_coast_is_suspicious() {
        let (_, _, pipeline) = create_pipeline();
        pipeline
            .detect(&LoginEvent::new("bob", SONOMA_IP, T, "e1"))
            .await
            .unwrap();

        let result = pipeline
            .detect(&LoginEvent::new("bob", PHILADELPHIA_IP, T + 10 * 60, "e2"))
            .await
            .unwrap();

        let preceding = result.preceding.as_ref().unwrap();
        assert_eq!(preceding.event.event_id, "e1");
        assert!(preceding.suspicious);
        assert!(preceding.implied_speed > 10_000.0);
        assert!(result.subsequent.is_none());
        assert!(result.is_suspicious());
    }

    #[tokio::test]
    async fn test_two_days_coast_to_coast_is_plausible() {
        let (_, _, pipeline) = create_pipeline();
        pipeline
            .detect(&LoginEvent::new("bob", SONOMA_IP, T, "e1"))
            .await
            .unwrap();

        let result = pipeline
            .detect(&LoginEvent::new("bob", PHILADELPHIA_IP, T + 48 * 3600, "e2"))
            .await
            .unwrap();

        let preceding = result.preceding.unwrap();
        assert!(!preceding.suspicious);
        assert!(preceding.implied_speed < 100.0);
    }

    #[tokio::test]
    async fn test_out_of_order_login_sees_both_neighbors() {
        let (_, _, pipeline) = create_pipeline();
        pipeline.detect(&LoginEvent::new("bob", SONOMA_IP, T, "e1")).await.unwrap();
        pipeline
            .detect(&LoginEvent::new("bob", SONOMA_IP, T + 96 * 3600, "e3"))
            .await
            .unwrap();

        let result = pipeline
            .detect(&LoginEvent::new("bob", PHILADELPHIA_IP, T + 48 * 3600, "e2"))
            .await
            .unwrap();

        assert_eq!(result.preceding.unwrap().event.event_id, "e1");
        assert_eq!(result.subsequent.unwrap().event.event_id, "e3");
    }

    #[tokio::test]
    async fn test_location_is_cached_across_requests() {
        let (resolver, _, pipeline) = create_pipeline();
        pipeline.detect(&LoginEvent::new("bob", SONOMA_IP, T, "e1")).await.unwrap();
        pipeline
            .detect(&LoginEvent::new("alice", SONOMA_IP, T + 5, "e2"))
            .await
            .unwrap();

        assert_eq!(resolver.calls.load(Ordering::SeqCst), 1);
        assert!(pipeline.cache().get(SONOMA_IP).is_some());
    }

    #[tokio::test]
    async fn test_validation_lists_every_field_and_skips_work() {
        let (resolver, store, pipeline) = create_pipeline();
        let event = LoginEvent::new("", SONOMA_IP, 0, "");

        match pipeline.detect(&event).await {
            Err(DetectionError::Validation(errors)) => {
                assert_eq!(
                    errors.fields().collect::<Vec<_>>(),
                    vec!["event_uuid", "unix_timestamp", "username"]
                );
            }
            other => panic!("expected validation error, got {:?}", other),
        }
        assert_eq!(resolver.calls.load(Ordering::SeqCst), 0);
        assert!(store.events_for_user("", 10).unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_unresolvable_ip_is_internal_error() {
        let (_, store, pipeline) = create_pipeline();
        let err = pipeline
            .detect(&LoginEvent::new("bob", "not-an-ip", T, "e1"))
            .await
            .unwrap_err();

        assert!(matches!(err, DetectionError::Internal(InternalError::Geo(_))));
        assert!(!err.is_validation());
        assert!(store.events_for_user("bob", 10).unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_neighbor_failure_aborts_before_persisting() {
        let (store, pipeline) = broken_pipeline(Some(Comparator::Less), false);
        let err = pipeline
            .detect(&LoginEvent::new("bob", SONOMA_IP, T, "e1"))
            .await
            .unwrap_err();

        match err {
            DetectionError::Internal(InternalError::Neighbors(e)) => {
                assert_eq!(e.failed_sides().collect::<Vec<_>>(), vec![Side::Preceding]);
            }
            other => panic!("expected neighbor failure, got {:?}", other),
        }
        assert!(store.inner.events_for_user("bob", 10).unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_persist_failure_is_internal_error() {
        let (_, pipeline) = broken_pipeline(None, true);
        let err = pipeline
            .detect(&LoginEvent::new("bob", SONOMA_IP, T, "e1"))
            .await
            .unwrap_err();

        assert!(matches!(err, DetectionError::Internal(InternalError::Persistence(_))));
    }

    #[tokio::test]
    async fn test_suspicious_travel_queues_alert() {
        let (tx, mut rx) = AlertDispatcher::create_channel();
        let (_, _, pipeline) = create_pipeline();
        let pipeline = pipeline.with_alerts(AlertQueue::new(tx));

        pipeline.detect(&LoginEvent::new("bob", SONOMA_IP, T, "e1")).await.unwrap();
        assert!(rx.try_recv().is_err());

        pipeline
            .detect(&LoginEvent::new("bob", PHILADELPHIA_IP, T + 600, "e2"))
            .await
            .unwrap();

        let alert = rx.recv().await.unwrap();
        assert_eq!(alert.event_id, "e2");
        assert_eq!(alert.neighbor_side, Side::Preceding);
        assert_eq!(alert.neighbor_ip, SONOMA_IP);
    }

    #[tokio::test]
    async fn test_custom_threshold_and_timeout() {
        let (_, _, pipeline) = create_pipeline();
        let pipeline = pipeline
            .with_classifier(TravelClassifier::with_threshold(10.0))
            .with_timeout(Duration::from_secs(5));

        pipeline.detect(&LoginEvent::new("bob", SONOMA_IP, T, "e1")).await.unwrap();
        let result = pipeline
            .detect(&LoginEvent::new("bob", PHILADELPHIA_IP, T + 48 * 3600, "e2"))
            .await
            .unwrap();

        assert!(result.preceding.unwrap().suspicious);
    }

    #[tokio::test]
    async fn test_slow_store_hits_deadline_without_persisting() {
        let store = Arc::new(SlowStore {
            delay: Duration::from_millis(300),
            inner: SqliteEventStore::in_memory().unwrap(),
        });
        let cache = Arc::new(LocationCache::new(Arc::new(TableResolver::new())));
        let pipeline = DetectionPipeline::new(cache, store.clone())
            .with_timeout(Duration::from_millis(50));

        let err = pipeline
            .detect(&LoginEvent::new("bob", SONOMA_IP, T, "e1"))
            .await
            .unwrap_err();

        match err {
            DetectionError::Internal(InternalError::Timeout(limit)) => {
                assert_eq!(limit, Duration::from_millis(50));
            }
            other => panic!("expected timeout, got {:?}", other),
        }

        // Let the stalled queries finish; the login must still be absent
        tokio::time::sleep(Duration::from_millis(400)).await;
        assert!(store.inner.events_for_user("bob", 10).unwrap().is_empty());
    }
}
