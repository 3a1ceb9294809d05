use std::time::Duration;

use sonda_process::{DEFAULT_UPLOAD_CONCURRENCY, Error, InfoManager};
use test_log::test;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use crate::common::{FakeDebugInfo, FakeProvider, MAPPING_SIZE, closed_mapping, open_mapping};

fn manager(provider: FakeProvider) -> InfoManager<FakeProvider> {
    InfoManager::builder()
        .with_mapping_provider(provider)
        .without_debuginfo()
        .build()
}

#[test(tokio::test(start_paused = true))]
async fn concurrent_calls_are_coalesced() {
    let provider = FakeProvider::with_delay(
        vec![open_mapping(0x1000, "/usr/bin/app")],
        Duration::from_millis(100),
    );
    let manager = manager(provider.clone());

    let mut tasks = JoinSet::new();

    for _ in 0..10 {
        let manager = manager.clone();
        tasks.spawn(async move { manager.obtain_info(42, &CancellationToken::new()).await });
    }

    for res in tasks.join_all().await {
        assert!(res.is_ok());
    }

    assert_eq!(provider.calls(), 1);

    let info = manager.info_for_pid(42).unwrap();
    assert_eq!(info.mappings().len(), 1);
}

#[test(tokio::test(start_paused = true))]
async fn coalesced_callers_share_discovery_error() {
    let provider = FakeProvider::failing(Duration::from_millis(100));
    let manager = manager(provider.clone());

    let mut tasks = JoinSet::new();

    for _ in 0..5 {
        let manager = manager.clone();
        tasks.spawn(async move { manager.obtain_info(42, &CancellationToken::new()).await });
    }

    for res in tasks.join_all().await {
        match res {
            Err(Error::MappingDiscovery { pid: 42, source }) => {
                assert_eq!(source.to_string(), "process 42 not found");
            }
            res => panic!("unexpected outcome: {res:?}"),
        }
    }

    assert_eq!(provider.calls(), 1);
    assert!(matches!(manager.info_for_pid(42), Err(Error::NotPresent(42))));

    // a failed computation is not remembered
    let res = manager.obtain_info(42, &CancellationToken::new()).await;
    assert!(res.is_err());
    assert_eq!(provider.calls(), 2);
}

#[test(tokio::test)]
async fn obtain_info_is_idempotent() {
    let provider = FakeProvider::new(vec![open_mapping(0x1000, "/usr/bin/app")]);
    let manager = manager(provider.clone());
    let token = CancellationToken::new();

    manager.obtain_info(1, &token).await.unwrap();
    manager.obtain_info(1, &token).await.unwrap();

    assert_eq!(provider.calls(), 1);

    let stats = manager.cache_stats();
    assert_eq!(stats.hits, 1);
    assert_eq!(stats.misses, 1);
}

#[test(tokio::test)]
async fn info_for_pid_never_computes() {
    let provider = FakeProvider::new(vec![open_mapping(0x1000, "/usr/bin/app")]);
    let manager = manager(provider.clone());

    assert!(matches!(manager.info_for_pid(7), Err(Error::NotPresent(7))));
    assert_eq!(provider.calls(), 0);
}

#[test(tokio::test(start_paused = true))]
async fn unused_info_expires() {
    let provider = FakeProvider::new(vec![open_mapping(0x1000, "/usr/bin/app")]);
    let manager = manager(provider.clone());
    let token = CancellationToken::new();

    manager.obtain_info(1, &token).await.unwrap();

    // 10 rounds of 10 seconds
    tokio::time::advance(Duration::from_secs(99)).await;
    assert!(manager.info_for_pid(1).is_ok());

    tokio::time::advance(Duration::from_secs(101)).await;
    assert!(matches!(manager.info_for_pid(1), Err(Error::NotPresent(1))));
    assert_eq!(manager.cache_stats().expirations, 1);

    manager.obtain_info(1, &token).await.unwrap();
    assert_eq!(provider.calls(), 2);
}

#[test(tokio::test)]
async fn least_recently_used_info_is_evicted() {
    let provider = FakeProvider::new(vec![open_mapping(0x1000, "/usr/bin/app")]);

    let manager = InfoManager::builder()
        .with_mapping_provider(provider.clone())
        .without_debuginfo()
        .max_entries(2)
        .build();

    let token = CancellationToken::new();

    for pid in 1..=3 {
        manager.obtain_info(pid, &token).await.unwrap();
    }

    assert!(matches!(manager.info_for_pid(1), Err(Error::NotPresent(1))));
    assert!(manager.info_for_pid(2).is_ok());
    assert!(manager.info_for_pid(3).is_ok());
    assert_eq!(manager.cache_stats().evictions, 1);
}

#[test(tokio::test)]
async fn normalize_cached_addresses() {
    let provider = FakeProvider::new(vec![
        open_mapping(0x1000, "/usr/bin/app"),
        closed_mapping(0x2000, "[vdso]"),
    ]);
    let manager = manager(provider);

    manager
        .obtain_info(1, &CancellationToken::new())
        .await
        .unwrap();

    let info = manager.info_for_pid(1).unwrap();

    assert_eq!(info.normalize(0x1500).unwrap(), 0x500);
    assert!(matches!(
        info.normalize(0x3000),
        Err(Error::NoContainingMapping(0x3000))
    ));
    assert!(matches!(
        info.normalize(0x2010),
        Err(Error::AddressNotMapped { addr: 0x2010, .. })
    ));
}

#[test(tokio::test(start_paused = true))]
async fn cancelled_computation_stores_nothing() {
    let provider = FakeProvider::with_delay(
        vec![open_mapping(0x1000, "/usr/bin/app")],
        Duration::from_secs(10),
    );
    let manager = manager(provider.clone());

    let token = CancellationToken::new();
    let canceller = token.clone();

    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_secs(1)).await;
        canceller.cancel();
    });

    let res = manager.obtain_info(1, &token).await;
    assert!(matches!(res, Err(Error::Cancelled)));
    assert!(matches!(manager.info_for_pid(1), Err(Error::NotPresent(1))));

    // a new caller starts a new computation
    manager
        .obtain_info(1, &CancellationToken::new())
        .await
        .unwrap();

    assert!(manager.info_for_pid(1).is_ok());
    assert_eq!(provider.calls(), 2);
}

#[test(tokio::test(start_paused = true))]
async fn cancelled_waiter_does_not_cancel_computation() {
    let provider = FakeProvider::with_delay(
        vec![open_mapping(0x1000, "/usr/bin/app")],
        Duration::from_secs(1),
    );
    let manager = manager(provider.clone());

    let first = {
        let manager = manager.clone();
        tokio::spawn(async move { manager.obtain_info(1, &CancellationToken::new()).await })
    };

    tokio::task::yield_now().await;

    let token = CancellationToken::new();

    let second = {
        let manager = manager.clone();
        let token = token.clone();
        tokio::spawn(async move { manager.obtain_info(1, &token).await })
    };

    tokio::time::sleep(Duration::from_millis(500)).await;
    token.cancel();

    assert!(matches!(second.await.unwrap(), Err(Error::Cancelled)));
    assert!(first.await.unwrap().is_ok());

    assert!(manager.info_for_pid(1).is_ok());
    assert_eq!(provider.calls(), 1);
}

#[test(tokio::test(start_paused = true))]
async fn uploads_do_not_block_obtain_info() {
    let provider = FakeProvider::new(vec![
        open_mapping(0x1000, "/a"),
        closed_mapping(0x2000, "/b"),
        open_mapping(0x3000, "/c"),
    ]);

    let debuginfo = FakeDebugInfo::builder()
        .upload_delay(Duration::from_secs(30))
        .failing_upload("/c", u32::MAX)
        .build();

    let manager = InfoManager::builder()
        .with_mapping_provider(provider)
        .with_debuginfo(debuginfo.clone())
        .build();

    let start = tokio::time::Instant::now();

    manager
        .obtain_info(1, &CancellationToken::new())
        .await
        .unwrap();

    assert!(start.elapsed() < Duration::from_secs(30));
    assert!(manager.info_for_pid(1).is_ok());
    assert_eq!(debuginfo.extracted().len(), 2);
    assert!(debuginfo.uploaded().is_empty());

    // let the detached uploads complete
    tokio::time::sleep(Duration::from_secs(60)).await;

    assert_eq!(debuginfo.uploaded(), ["/a"].map(std::path::PathBuf::from));
}

#[test(tokio::test(start_paused = true))]
async fn saturated_upload_pool_does_not_block_obtain_info() {
    let provider = FakeProvider::new(
        (0..4)
            .map(|i| open_mapping(0x1000 + i * MAPPING_SIZE, &format!("/lib/lib{i}.so")))
            .collect::<Vec<_>>(),
    );

    let debuginfo = FakeDebugInfo::builder()
        .upload_delay(Duration::from_secs(30))
        .build();

    let manager = InfoManager::builder()
        .with_mapping_provider(provider)
        .with_debuginfo(debuginfo.clone())
        .build();

    let token = CancellationToken::new();

    // fills every upload slot
    manager.obtain_info(1, &token).await.unwrap();

    let start = tokio::time::Instant::now();
    manager.obtain_info(2, &token).await.unwrap();

    assert!(start.elapsed() < Duration::from_secs(30));
    assert!(manager.info_for_pid(2).is_ok());

    tokio::time::sleep(Duration::from_secs(120)).await;

    assert_eq!(debuginfo.uploaded().len(), 8);
    assert!(debuginfo.max_in_flight() <= DEFAULT_UPLOAD_CONCURRENCY);
}

#[test(tokio::test(start_paused = true))]
async fn cancelled_computations_are_not_kept_in_flight() {
    let provider = FakeProvider::with_delay(
        vec![open_mapping(0x1000, "/usr/bin/app")],
        Duration::from_secs(10),
    );
    let manager = manager(provider.clone());

    let mut tasks = JoinSet::new();

    for pid in 0..100 {
        let manager = manager.clone();

        tasks.spawn(async move {
            let token = CancellationToken::new();
            let canceller = token.clone();

            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(1)).await;
                canceller.cancel();
            });

            manager.obtain_info(pid, &token).await
        });
    }

    for res in tasks.join_all().await {
        assert!(matches!(res, Err(Error::Cancelled)));
    }

    // let the computations observe the cancellation
    tokio::time::sleep(Duration::from_millis(1)).await;

    assert_eq!(manager.computations_in_flight(), 0);
    assert_eq!(provider.calls(), 100);
}

#[test(tokio::test(start_paused = true))]
async fn abandoned_computation_completes() {
    let provider = FakeProvider::with_delay(
        vec![open_mapping(0x1000, "/usr/bin/app")],
        Duration::from_secs(1),
    );
    let manager = manager(provider.clone());

    let caller = {
        let manager = manager.clone();
        tokio::spawn(async move { manager.obtain_info(1, &CancellationToken::new()).await })
    };

    tokio::time::sleep(Duration::from_millis(100)).await;
    caller.abort();

    assert_eq!(manager.computations_in_flight(), 1);

    tokio::time::sleep(Duration::from_secs(2)).await;

    assert_eq!(manager.computations_in_flight(), 0);
    assert!(manager.info_for_pid(1).is_ok());
    assert_eq!(provider.calls(), 1);
}

#[test(tokio::test(start_paused = true))]
async fn waiter_restarts_computation_cancelled_by_its_starter() {
    let provider = FakeProvider::with_delay(
        vec![open_mapping(0x1000, "/usr/bin/app")],
        Duration::from_secs(1),
    );
    let manager = manager(provider.clone());

    let token = CancellationToken::new();

    let starter = {
        let manager = manager.clone();
        let token = token.clone();
        tokio::spawn(async move { manager.obtain_info(1, &token).await })
    };

    tokio::time::sleep(Duration::from_millis(100)).await;

    let waiter = {
        let manager = manager.clone();
        tokio::spawn(async move { manager.obtain_info(1, &CancellationToken::new()).await })
    };

    tokio::time::sleep(Duration::from_millis(400)).await;
    token.cancel();

    assert!(matches!(starter.await.unwrap(), Err(Error::Cancelled)));
    assert!(waiter.await.unwrap().is_ok());

    assert!(manager.info_for_pid(1).is_ok());
    assert_eq!(provider.calls(), 2);
    assert_eq!(manager.computations_in_flight(), 0);
}
