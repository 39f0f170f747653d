//! Integration tests for the cached dividend view
//!
//! Covers the inbound query path end to end against a spy ledger:
//! - exact / partition / global lookups and their cache keys
//! - snapshot pinning and fan-out concurrency during aggregation
//! - all-or-nothing failure with cancellation of in-flight reads
//! - request validation and query-triggered stake decisions

mod common;

#[cfg(test)]
mod dividend_flow_tests {
    use super::common::{alice, bob, MockLedger, ALICE, BOB};
    use async_trait::async_trait;
    use std::collections::BTreeSet;
    use std::sync::atomic::Ordering;
    use std::sync::Arc;
    use std::time::Duration;
    use tao_dividends::cache::{Cache, CacheError, CacheKey, MemoryCache};
    use tao_dividends::dividends::{
        AggregationEngine, AggregationError, CacheSettings, DividendQuery, DividendService,
        ServiceError,
    };
    use tao_dividends::ledger::SnapshotClient;
    use tao_dividends::staking::{DecisionTrigger, TriggerSource};
    use tokio::sync::mpsc;

    /// Partition 1: {A: 5, B: 3}, partition 2: {A: 2}, partition 3: empty
    fn three_partitions() -> MockLedger {
        MockLedger::new(3)
            .with_partition(1, vec![(alice(), 5.0), (bob(), 3.0)])
            .with_partition(2, vec![(alice(), 2.0)])
            .with_partition(3, vec![])
    }

    fn service_over(ledger: Arc<MockLedger>, cache: Arc<dyn Cache>) -> DividendService {
        let aggregator = AggregationEngine::new(ledger.clone(), Duration::from_secs(30));
        DividendService::new(ledger, cache, aggregator, CacheSettings::default())
    }

    #[tokio::test]
    async fn test_three_query_shapes_end_to_end() {
        let ledger = Arc::new(three_partitions());
        let cache = Arc::new(MemoryCache::new());
        let service = service_over(ledger.clone(), cache.clone());

        let global = service.get_dividends(DividendQuery::global()).await.unwrap();
        assert_eq!(global.value, 10.0);
        assert!(!global.cached);
        assert!(global.netuid.is_none());

        let partition = service.get_dividends(DividendQuery::partition(1)).await.unwrap();
        assert_eq!(partition.value, 8.0);
        assert!(!partition.cached);

        let exact = service.get_dividends(DividendQuery::exact(1, ALICE)).await.unwrap();
        assert_eq!(exact.value, 5.0);
        assert!(!exact.cached);
        assert_eq!(exact.hotkey, Some(alice()));

        let reads_before = ledger.point_calls.load(Ordering::SeqCst);
        let again = service.get_dividends(DividendQuery::exact(1, ALICE)).await.unwrap();
        assert!(again.cached);
        assert_eq!(again.value, 5.0);
        assert_eq!(again.as_of, exact.as_of);
        assert_eq!(ledger.point_calls.load(Ordering::SeqCst), reads_before);

        // Global, partition 1, exact (1, A) and the partition count
        assert_eq!(cache.len(), 4);
    }

    #[tokio::test]
    async fn test_unknown_hotkey_reads_zero() {
        let ledger = Arc::new(three_partitions());
        let service = service_over(ledger, Arc::new(MemoryCache::new()));

        let response = service.get_dividends(DividendQuery::exact(2, BOB)).await.unwrap();
        assert_eq!(response.value, 0.0);

        let empty = service.get_dividends(DividendQuery::partition(3)).await.unwrap();
        assert_eq!(empty.value, 0.0);
    }

    #[tokio::test]
    async fn test_global_equals_sum_of_partitions() {
        let ledger = Arc::new(three_partitions());
        let service = service_over(ledger, Arc::new(MemoryCache::new()));

        let global = service.get_dividends(DividendQuery::global()).await.unwrap();

        let mut sum = 0.0;
        for netuid in 1..=3 {
            sum += service
                .get_dividends(DividendQuery::partition(netuid))
                .await
                .unwrap()
                .value;
        }

        assert_eq!(global.value, sum);
    }

    #[tokio::test]
    async fn test_partition_equals_sum_of_exact_values() {
        let ledger = Arc::new(three_partitions());
        let service = service_over(ledger, Arc::new(MemoryCache::new()));

        let mut grand_total = 0.0;
        for netuid in 1..=3 {
            let partition = service
                .get_dividends(DividendQuery::partition(netuid))
                .await
                .unwrap()
                .value;

            let mut exact_sum = 0.0;
            for hotkey in [ALICE, BOB] {
                exact_sum += service
                    .get_dividends(DividendQuery::exact(netuid, hotkey))
                    .await
                    .unwrap()
                    .value;
            }

            assert_eq!(exact_sum, partition, "netuid {}", netuid);
            grand_total += exact_sum;
        }

        let global = service.get_dividends(DividendQuery::global()).await.unwrap();
        assert_eq!(global.value, grand_total);
    }

    #[tokio::test]
    async fn test_public_key_and_address_share_one_entry() {
        let ledger = Arc::new(three_partitions());
        let cache = Arc::new(MemoryCache::new());
        let service = service_over(ledger.clone(), cache.clone());
        let alice_pubkey = "0xd43593c715fdd31c61141abd04a99fd6822c8558854ccde39a5684e7a56da27d";

        let by_key = service
            .get_dividends(DividendQuery::exact(1, alice_pubkey))
            .await
            .unwrap();
        assert_eq!(by_key.value, 5.0);
        assert_eq!(by_key.hotkey, Some(alice()));

        let by_address = service.get_dividends(DividendQuery::exact(1, ALICE)).await.unwrap();
        assert!(by_address.cached);
        assert_eq!(ledger.point_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_every_read_of_a_request_shares_one_snapshot() {
        let ledger = Arc::new(three_partitions().with_moving_head());
        let service = service_over(ledger.clone(), Arc::new(MemoryCache::new()));

        let response = service.get_dividends(DividendQuery::global()).await.unwrap();

        assert_eq!(ledger.snapshot_calls.load(Ordering::SeqCst), 1);
        assert_eq!(ledger.map_calls.load(Ordering::SeqCst), 3);
        assert_eq!(ledger.distinct_snapshots(), 1);
        assert_eq!(ledger.seen_snapshots.lock().unwrap()[0], response.as_of);
    }

    #[tokio::test]
    async fn test_partition_failure_is_reported_and_not_cached() {
        let ledger = Arc::new(three_partitions().with_failure(2));
        let cache = Arc::new(MemoryCache::new());
        let service = service_over(ledger.clone(), cache.clone());

        match service.get_dividends(DividendQuery::global()).await {
            Err(ServiceError::Aggregation(err)) => {
                assert_eq!(err.failed_partitions(), vec![2]);
                assert!(err.to_string().contains("netuid 2"));
            }
            other => panic!("expected aggregation failure, got {:?}", other),
        }

        assert!(cache.get(&CacheKey::Global).await.unwrap().is_none());

        // Nothing was cached, so the next request reads the ledger again
        let calls = ledger.map_calls.load(Ordering::SeqCst);
        assert!(service.get_dividends(DividendQuery::global()).await.is_err());
        assert!(ledger.map_calls.load(Ordering::SeqCst) > calls);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failure_cancels_in_flight_partitions() {
        let ledger = Arc::new(
            three_partitions()
                .with_delay(1, Duration::from_secs(10))
                .with_delay(3, Duration::from_secs(10))
                .with_failure(2),
        );
        let engine = AggregationEngine::new(ledger.clone(), Duration::from_secs(30));
        let snapshot = ledger.current_snapshot().await.unwrap();

        let started = tokio::time::Instant::now();
        let result = engine.aggregate_all(3, &snapshot).await;

        assert!(matches!(
            result,
            Err(AggregationError::PartialAggregationFailure { .. })
        ));
        assert!(started.elapsed() < Duration::from_secs(10));

        tokio::time::sleep(Duration::from_secs(20)).await;
        assert_eq!(ledger.completed(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_dropped_request_cancels_reads_and_caches_nothing() {
        let ledger = Arc::new(
            three_partitions()
                .with_delay(1, Duration::from_secs(10))
                .with_delay(2, Duration::from_secs(10))
                .with_delay(3, Duration::from_secs(10)),
        );
        let cache = Arc::new(MemoryCache::new());
        let service = service_over(ledger.clone(), cache.clone());

        let abandoned =
            tokio::time::timeout(Duration::from_secs(1), service.get_dividends(DividendQuery::global()))
                .await;
        assert!(abandoned.is_err());
        assert_eq!(ledger.map_calls.load(Ordering::SeqCst), 3);

        tokio::time::sleep(Duration::from_secs(30)).await;
        assert_eq!(ledger.completed(), 0);
        assert!(cache.get(&CacheKey::Global).await.unwrap().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_partitions_are_read_concurrently() {
        let ledger = Arc::new(
            three_partitions()
                .with_delay(1, Duration::from_secs(1))
                .with_delay(2, Duration::from_secs(1))
                .with_delay(3, Duration::from_secs(1)),
        );
        let engine = AggregationEngine::new(ledger.clone(), Duration::from_secs(30));
        let snapshot = ledger.current_snapshot().await.unwrap();

        let started = tokio::time::Instant::now();
        let merged = engine.aggregate_all(3, &snapshot).await.unwrap();

        assert!(started.elapsed() < Duration::from_secs(2));
        assert_eq!(merged.len(), 3);
        assert_eq!(ledger.completed(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_partition_times_out() {
        let ledger = Arc::new(three_partitions().with_delay(3, Duration::from_secs(60)));
        let engine = AggregationEngine::new(ledger.clone(), Duration::from_secs(5));
        let snapshot = ledger.current_snapshot().await.unwrap();

        let err = engine.aggregate_all(3, &snapshot).await.unwrap_err();
        assert_eq!(err.failed_partitions(), vec![3]);
    }

    #[tokio::test]
    async fn test_aggregate_rejects_bad_partition_sets() {
        let ledger = Arc::new(three_partitions());
        let engine = AggregationEngine::new(ledger.clone(), Duration::from_secs(5));
        let snapshot = ledger.current_snapshot().await.unwrap();

        assert!(matches!(
            engine.aggregate(&BTreeSet::new(), 3, &snapshot).await,
            Err(AggregationError::EmptyPartitionSet)
        ));

        let with_zero: BTreeSet<u16> = [0, 1].into_iter().collect();
        assert!(matches!(
            engine.aggregate(&with_zero, 3, &snapshot).await,
            Err(AggregationError::InvalidPartition(0))
        ));

        let beyond_count: BTreeSet<u16> = [2, 4].into_iter().collect();
        assert!(matches!(
            engine.aggregate(&beyond_count, 3, &snapshot).await,
            Err(AggregationError::InvalidPartition(4))
        ));
        assert_eq!(ledger.map_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_invalid_requests_never_reach_the_data_path() {
        let ledger = Arc::new(three_partitions());
        let service = service_over(ledger.clone(), Arc::new(MemoryCache::new()));

        let hotkey_only = DividendQuery {
            netuid: None,
            hotkey: Some(ALICE.to_string()),
            trade: false,
        };
        let cases = vec![
            hotkey_only,
            DividendQuery::partition(0),
            DividendQuery::partition(4),
            DividendQuery::exact(1, "not-a-hotkey"),
            DividendQuery::exact(1, "0x1234"),
        ];

        for query in cases {
            match service.get_dividends(query.clone()).await {
                Err(ServiceError::InvalidRequest(_)) => {}
                other => panic!("expected invalid request for {:?}, got {:?}", query, other),
            }
        }

        assert_eq!(ledger.map_calls.load(Ordering::SeqCst), 0);
        assert_eq!(ledger.point_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_total_partitions_cached_with_longer_ttl() {
        let ledger = Arc::new(three_partitions());
        let service = service_over(ledger.clone(), Arc::new(MemoryCache::new()));

        assert_eq!(service.total_partitions().await.unwrap(), 3);
        assert_eq!(service.total_partitions().await.unwrap(), 3);
        assert_eq!(ledger.count_calls.load(Ordering::SeqCst), 1);

        tokio::time::advance(Duration::from_secs(299)).await;
        service.total_partitions().await.unwrap();
        assert_eq!(ledger.count_calls.load(Ordering::SeqCst), 1);

        tokio::time::advance(Duration::from_secs(2)).await;
        service.total_partitions().await.unwrap();
        assert_eq!(ledger.count_calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_dividend_entries_expire() {
        let ledger = Arc::new(three_partitions());
        let service = service_over(ledger, Arc::new(MemoryCache::new()));

        let first = service.get_dividends(DividendQuery::partition(1)).await.unwrap();
        assert!(!first.cached);

        tokio::time::advance(Duration::from_secs(119)).await;
        assert!(service.get_dividends(DividendQuery::partition(1)).await.unwrap().cached);

        tokio::time::advance(Duration::from_secs(2)).await;
        assert!(!service.get_dividends(DividendQuery::partition(1)).await.unwrap().cached);
    }

    /// Cache whose backend is permanently down
    struct BrokenCache;

    #[async_trait]
    impl Cache for BrokenCache {
        async fn get(&self, _key: &CacheKey) -> Result<Option<String>, CacheError> {
            Err(CacheError::Backend("connection refused".to_string()))
        }

        async fn set(&self, _key: &CacheKey, _value: String, _ttl: Duration) -> Result<(), CacheError> {
            Err(CacheError::Backend("connection refused".to_string()))
        }

        fn backend_type(&self) -> &'static str {
            "broken"
        }
    }

    #[tokio::test]
    async fn test_cache_outage_falls_back_to_ledger() {
        let ledger = Arc::new(three_partitions());
        let service = service_over(ledger, Arc::new(BrokenCache));

        let response = service.get_dividends(DividendQuery::exact(1, BOB)).await.unwrap();
        assert_eq!(response.value, 3.0);
        assert!(!response.cached);
    }

    #[tokio::test]
    async fn test_trade_flag_enqueues_decision() {
        let ledger = Arc::new(three_partitions());
        let (tx, mut rx) = mpsc::channel::<DecisionTrigger>(1);
        let service = service_over(ledger, Arc::new(MemoryCache::new())).with_trade_triggers(tx);

        let response = service
            .get_dividends(DividendQuery::exact(1, ALICE).with_trade())
            .await
            .unwrap();
        assert!(response.stake_tx_triggered);

        let trigger = rx.try_recv().unwrap();
        assert_eq!(trigger.netuid, 1);
        assert_eq!(trigger.hotkey, Some(alice()));
        assert_eq!(trigger.source, TriggerSource::Query);

        // Queue full: the query still answers, the trigger is dropped
        let filler = DecisionTrigger {
            netuid: 2,
            hotkey: None,
            source: TriggerSource::Query,
        };
        service
            .get_dividends(DividendQuery::partition(2).with_trade())
            .await
            .unwrap();
        assert_eq!(rx.try_recv().unwrap(), filler);
        let queued = service
            .get_dividends(DividendQuery::partition(3).with_trade())
            .await
            .unwrap();
        assert!(queued.stake_tx_triggered);
        let full = service
            .get_dividends(DividendQuery::partition(1).with_trade())
            .await
            .unwrap();
        assert!(!full.stake_tx_triggered);

        // No partition, nothing to trade on
        let global = service
            .get_dividends(DividendQuery::global().with_trade())
            .await
            .unwrap();
        assert!(!global.stake_tx_triggered);
    }

    #[tokio::test]
    async fn test_trade_flag_without_worker() {
        let ledger = Arc::new(three_partitions());
        let service = service_over(ledger, Arc::new(MemoryCache::new()));

        let response = service
            .get_dividends(DividendQuery::partition(1).with_trade())
            .await
            .unwrap();
        assert!(!response.stake_tx_triggered);
    }

    #[tokio::test]
    async fn test_response_json_shape() {
        let ledger = Arc::new(three_partitions());
        let service = service_over(ledger, Arc::new(MemoryCache::new()));

        let response = service.get_dividends(DividendQuery::exact(1, ALICE)).await.unwrap();
        let json = serde_json::to_value(&response).unwrap();

        assert_eq!(json["netuid"], 1);
        assert_eq!(json["hotkey"], ALICE);
        assert_eq!(json["value"], 5.0);
        assert_eq!(json["cached"], false);
        assert_eq!(json["stake_tx_triggered"], false);
        assert!(json["asOf"].as_str().unwrap().starts_with("0x"));
    }
}

#[cfg(test)]
mod merge_properties {
    use super::common::{alice, bob, MockLedger};
    use proptest::prelude::*;
    use std::sync::Arc;
    use std::time::Duration;
    use tao_dividends::dividends::{AggregationEngine, MergedDividends, PartitionDividends};
    use tao_dividends::ledger::SnapshotClient;

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(32))]

        #[test]
        fn merge_ignores_completion_order(
            partitions in proptest::collection::vec((0u64..50, 0.0f64..100.0, 0.0f64..100.0), 1..6)
        ) {
            let mut ledger = MockLedger::new(partitions.len() as u16);
            let mut expected = MergedDividends::new();

            for (i, (delay_ms, a, b)) in partitions.iter().enumerate() {
                let netuid = (i + 1) as u16;
                ledger = ledger
                    .with_partition(netuid, vec![(alice(), *a), (bob(), *b)])
                    .with_delay(netuid, Duration::from_millis(*delay_ms));

                let entries: PartitionDividends = [(alice(), *a), (bob(), *b)].into_iter().collect();
                expected.insert(netuid, entries);
            }

            let ledger = Arc::new(ledger);
            let runtime = tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .start_paused(true)
                .build()
                .unwrap();

            let merged = runtime.block_on(async {
                let engine = AggregationEngine::new(ledger.clone(), Duration::from_secs(5));
                let snapshot = ledger.current_snapshot().await.unwrap();
                engine.aggregate_all(partitions.len() as u16, &snapshot).await.unwrap()
            });

            prop_assert_eq!(merged, expected);
        }
    }
}
