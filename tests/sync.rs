use std::{sync::Arc, time::Duration};

use alloy::primitives::{B256, Bytes, LogData, U256};
use alloy_sol_types::SolEvent;
use lending_indexer::{
    abi::vault::ILendingVault,
    state::{CloseReason, PositionSide, PositionStatus},
    store::Store,
    sync::{ChainOutcome, SyncConfig, Syncer, VaultOutcome},
    testing::{self, BASE_TIMESTAMP, MockChain, MockRegistry},
};

const START_BLOCK: u64 = 101;

fn syncer(chains: &[&MockChain], store: Store, config: SyncConfig) -> Syncer<MockChain, MockChain> {
    syncer_from(START_BLOCK, chains, store, config)
}

fn syncer_from(
    start_block: u64,
    chains: &[&MockChain],
    store: Store,
    config: SyncConfig,
) -> Syncer<MockChain, MockChain> {
    let registry = MockRegistry::new(chains.iter().map(|c| c.runtime(start_block)));
    Syncer::new(Arc::new(registry), store, config, true)
}

/// Chain with one listed vault at head 105.
fn listed_chain(chain_id: u64) -> MockChain {
    let chain = MockChain::new(chain_id);
    chain.list_vault(testing::vault(testing::address(1), "USDC", 6));
    chain.set_head(105);
    chain
}

/// Tests a full pass picking up an activation and its repayment, and that
/// re-running it changes nothing.
#[tokio::test]
async fn test_sync_pass_indexes_positions() {
    let chain = listed_chain(1);
    let vault = testing::address(1);
    let user = testing::address(100);
    chain.push_activation(vault, 102, user, 1, PositionSide::Borrower, 5_000_000, 7_000_000);
    chain.push_repay(vault, 104, user, 1, 5_100_000, 7_000_000);

    let store = Store::in_memory().unwrap();
    let syncer = syncer(&[&chain], store.clone(), SyncConfig::default());

    let report = syncer.run_pass().await;
    assert_eq!(report.failed_chains(), 0);
    assert_eq!(report.failed_vaults(), 0);
    let chain_report = report.chain(1).unwrap();
    let ChainOutcome::Completed { head, discovery, .. } = &chain_report.outcome else {
        panic!("unexpected outcome {:?}", chain_report.outcome);
    };
    assert_eq!(*head, 105);
    assert_eq!(discovery.listed, vec![vault]);
    assert!(matches!(
        chain_report.vault(vault).unwrap().outcome,
        VaultOutcome::Advanced {
            from: 101,
            to: 105,
            events: 2,
            ..
        }
    ));

    assert_eq!(store.watermark(1, vault).await.unwrap(), Some(105));
    let position = store
        .position(1, vault, user, U256::from(1))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(position.status(), PositionStatus::Closed);
    assert_eq!(position.side(), Some(PositionSide::Borrower));
    assert_eq!(position.close_reason(), Some(CloseReason::Repaid));
    assert_eq!(position.principal(), Some(U256::from(5_000_000)));
    assert_eq!(position.repaid(), Some(U256::from(5_100_000)));
    assert_eq!(position.opened().unwrap().block_number(), 102);
    assert_eq!(position.closed_at(), Some(BASE_TIMESTAMP + 104));

    let kinds = store
        .event_records(1, vault)
        .await
        .unwrap()
        .into_iter()
        .map(|r| r.kind)
        .collect::<Vec<_>>();
    assert_eq!(kinds, vec!["activated", "repaid"]);
    // One lookup per distinct block
    assert_eq!(chain.timestamp_requests(), 2);

    let report = syncer.run_pass().await;
    assert_eq!(report.rows_written(), 0);
    assert!(matches!(
        report.chain(1).unwrap().vault(vault).unwrap().outcome,
        VaultOutcome::UpToDate {
            watermark: Some(105)
        }
    ));
    assert_eq!(store.event_records(1, vault).await.unwrap().len(), 2);
}

/// Tests that a stored watermark takes precedence over the chain's start
/// block.
#[tokio::test]
async fn test_sync_from_existing_watermark() {
    let chain = listed_chain(1);
    let vault = testing::address(1);
    let user = testing::address(100);
    chain.push_activation(vault, 50, user, 1, PositionSide::Lender, 1_000, 0);
    chain.push_activation(vault, 102, user, 2, PositionSide::Lender, 2_000, 0);
    chain.push_repay(vault, 104, user, 2, 2_000, 0);

    let store = Store::in_memory().unwrap();
    store.commit_window(1, vault, 100, vec![]).await.unwrap();
    let report = syncer_from(1, &[&chain], store.clone(), SyncConfig::default())
        .run_pass()
        .await;

    assert!(matches!(
        report.chain(1).unwrap().vault(vault).unwrap().outcome,
        VaultOutcome::Advanced {
            from: 101,
            to: 105,
            events: 2,
            ..
        }
    ));
    assert_eq!(store.watermark(1, vault).await.unwrap(), Some(105));
    // Below the watermark, never scanned
    assert!(
        store
            .position(1, vault, user, U256::from(1))
            .await
            .unwrap()
            .is_none()
    );
    let position = store
        .position(1, vault, user, U256::from(2))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(position.status(), PositionStatus::Closed);
}

/// Tests that block timestamps are fetched with bounded concurrency.
#[tokio::test]
async fn test_timestamp_requests_are_bounded() {
    let chain = listed_chain(1);
    chain.set_timestamp_delay(Some(Duration::from_millis(5)));
    let vault = testing::address(1);
    for pid in 0..40 {
        chain.push_activation(
            vault,
            START_BLOCK + pid,
            testing::address(100),
            pid,
            PositionSide::Lender,
            1_000,
            0,
        );
    }
    chain.set_head(START_BLOCK + 39);

    let store = Store::in_memory().unwrap();
    let config = SyncConfig {
        timestamp_concurrency: 4,
        ..Default::default()
    };
    let report = syncer(&[&chain], store.clone(), config).run_pass().await;

    assert_eq!(report.failed_vaults(), 0);
    assert_eq!(chain.timestamp_requests(), 40);
    assert_eq!(chain.peak_timestamps_in_flight(), 4);
    assert_eq!(store.event_records(1, vault).await.unwrap().len(), 40);
}

#[tokio::test]
async fn test_scan_split_into_windows() {
    let chain = listed_chain(1);
    let vault = testing::address(1);
    let user = testing::address(100);
    chain.push_activation(vault, 101, user, 1, PositionSide::Lender, 1_000, 0);
    chain.push_liquidation(vault, 105, user, 1, testing::address(7), 1_000, 0);

    let store = Store::in_memory().unwrap();
    let config = SyncConfig {
        max_block_range: 2,
        ..Default::default()
    };
    let report = syncer(&[&chain], store.clone(), config).run_pass().await;

    assert_eq!(report.failed_vaults(), 0);
    // [101, 102], [103, 104], [105, 105]
    assert_eq!(chain.log_requests(), 3);
    let position = store
        .position(1, vault, user, U256::from(1))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(position.close_reason(), Some(CloseReason::Liquidated));
}

/// Tests that logs served out of order are applied by block and log index.
#[tokio::test]
async fn test_out_of_order_logs_applied_in_order() {
    let chain = listed_chain(1);
    chain.set_reverse_logs(true);
    let vault = testing::address(1);
    let alice = testing::address(100);
    let bob = testing::address(101);
    chain.push_activation(vault, 102, alice, 1, PositionSide::Lender, 1_000, 0);
    chain.push_liquidation(vault, 103, alice, 1, bob, 1_000, 0);
    chain.push_activation(vault, 104, bob, 2, PositionSide::Borrower, 500, 900);
    chain.push_repay(vault, 104, bob, 2, 510, 900);

    let store = Store::in_memory().unwrap();
    syncer(&[&chain], store.clone(), SyncConfig::default())
        .run_pass()
        .await;

    let records = store.event_records(1, vault).await.unwrap();
    let order = records
        .iter()
        .map(|r| (r.block_number, r.log_index, r.kind.as_str()))
        .collect::<Vec<_>>();
    assert_eq!(
        order,
        vec![
            (102, 0, "activated"),
            (103, 0, "liquidated"),
            (104, 0, "activated"),
            (104, 1, "repaid"),
        ]
    );

    for (user, pid) in [(alice, 1), (bob, 2)] {
        let position = store
            .position(1, vault, user, U256::from(pid))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(position.status(), PositionStatus::Closed);
        assert!(position.opened().is_some());
    }
}

#[tokio::test]
async fn test_watermark_never_moves_back_on_failures() {
    let chain = listed_chain(1);
    let vault = testing::address(1);
    let store = Store::in_memory().unwrap();
    let syncer = syncer(&[&chain], store.clone(), SyncConfig::default());

    syncer.run_pass().await;
    assert_eq!(store.watermark(1, vault).await.unwrap(), Some(105));

    chain.set_head(110);
    chain.set_vault_failing(vault, true);
    let report = syncer.run_pass().await;
    assert_eq!(report.failed_chains(), 0);
    assert_eq!(report.failed_vaults(), 1);
    assert_eq!(store.watermark(1, vault).await.unwrap(), Some(105));

    chain.set_vault_failing(vault, false);
    chain.set_unavailable(true);
    let report = syncer.run_pass().await;
    assert_eq!(report.failed_chains(), 1);
    assert!(matches!(
        report.chain(1).unwrap().outcome,
        ChainOutcome::Failed(_)
    ));
    assert_eq!(store.watermark(1, vault).await.unwrap(), Some(105));

    chain.set_unavailable(false);
    let report = syncer.run_pass().await;
    assert_eq!(report.failed_chains(), 0);
    assert!(matches!(
        report.chain(1).unwrap().vault(vault).unwrap().outcome,
        VaultOutcome::Advanced {
            from: 106,
            to: 110,
            ..
        }
    ));
    assert_eq!(store.watermark(1, vault).await.unwrap(), Some(110));
}

#[tokio::test]
async fn test_viewer_revert_fails_chain() {
    let chain = listed_chain(1);
    chain.set_viewer_failing(true);
    let store = Store::in_memory().unwrap();

    let report = syncer(&[&chain], store.clone(), SyncConfig::default())
        .run_pass()
        .await;

    assert_eq!(report.failed_chains(), 1);
    assert_eq!(chain.log_requests(), 0);
    assert!(store.vaults(1).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_chains_are_independent() {
    let mainnet = listed_chain(1);
    let optimism = listed_chain(10);
    let vault = testing::address(1);
    let user = testing::address(100);
    mainnet.push_activation(vault, 102, user, 1, PositionSide::Lender, 1_000, 0);
    optimism.push_activation(vault, 102, user, 1, PositionSide::Lender, 2_000, 0);
    optimism.set_unavailable(true);

    let store = Store::in_memory().unwrap();
    let report = syncer(&[&mainnet, &optimism], store.clone(), SyncConfig::default())
        .run_pass()
        .await;

    assert!(matches!(
        report.chain(1).unwrap().outcome,
        ChainOutcome::Completed { .. }
    ));
    assert!(matches!(
        report.chain(10).unwrap().outcome,
        ChainOutcome::Failed(_)
    ));
    assert_eq!(store.watermark(1, vault).await.unwrap(), Some(105));
    assert_eq!(store.watermark(10, vault).await.unwrap(), None);
    assert!(
        store
            .position(10, vault, user, U256::from(1))
            .await
            .unwrap()
            .is_none()
    );
}

#[tokio::test]
async fn test_vault_failure_is_isolated() {
    let chain = listed_chain(1);
    let healthy = testing::address(1);
    let broken = testing::address(2);
    chain.list_vault(testing::vault(broken, "WETH", 18));
    chain.set_vault_failing(broken, true);

    let store = Store::in_memory().unwrap();
    let report = syncer(&[&chain], store.clone(), SyncConfig::default())
        .run_pass()
        .await;

    let chain_report = report.chain(1).unwrap();
    assert!(matches!(
        chain_report.vault(healthy).unwrap().outcome,
        VaultOutcome::Advanced { .. }
    ));
    assert!(matches!(
        chain_report.vault(broken).unwrap().outcome,
        VaultOutcome::Failed(_)
    ));
    assert_eq!(store.watermark(1, healthy).await.unwrap(), Some(105));
    assert_eq!(store.watermark(1, broken).await.unwrap(), None);
}

/// Tests that a pass triggered while another one runs skips the chain
/// instead of processing it twice.
#[tokio::test]
async fn test_concurrent_pass_skips_running_chain() {
    let chain = listed_chain(1);
    chain.set_log_delay(Some(Duration::from_millis(100)));
    let vault = testing::address(1);
    chain.push_activation(vault, 102, testing::address(100), 1, PositionSide::Lender, 1, 0);

    let store = Store::in_memory().unwrap();
    let syncer = syncer(&[&chain], store.clone(), SyncConfig::default());

    let (first, second) = tokio::join!(syncer.run_pass(), syncer.run_pass());
    let outcomes = [first, second]
        .into_iter()
        .map(|r| r.chain(1).map(|c| matches!(c.outcome, ChainOutcome::Skipped)))
        .collect::<Vec<_>>();
    assert_eq!(outcomes.iter().filter(|s| **s == Some(true)).count(), 1);
    assert_eq!(outcomes.iter().filter(|s| **s == Some(false)).count(), 1);
    assert_eq!(chain.log_requests(), 1);
    assert_eq!(store.event_records(1, vault).await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_bad_logs_are_skipped() {
    let chain = listed_chain(1);
    let vault = testing::address(1);
    let user = testing::address(100);
    chain.push_activation(vault, 102, user, 1, PositionSide::Lender, 1_000, 0);
    let removed = chain.push_activation(vault, 103, user, 2, PositionSide::Lender, 1_000, 0);
    chain.remove_log(removed);
    // Known signature, truncated payload
    chain.push_raw_log(
        vault,
        103,
        LogData::new_unchecked(
            vec![ILendingVault::PositionActivated::SIGNATURE_HASH],
            Bytes::from(vec![1, 2, 3]),
        ),
    );
    chain.push_raw_log(
        vault,
        104,
        LogData::new_unchecked(vec![B256::repeat_byte(0xee)], Bytes::new()),
    );

    let store = Store::in_memory().unwrap();
    let report = syncer(&[&chain], store.clone(), SyncConfig::default())
        .run_pass()
        .await;

    assert_eq!(report.failed_vaults(), 0);
    assert_eq!(store.watermark(1, vault).await.unwrap(), Some(105));
    assert_eq!(store.event_records(1, vault).await.unwrap().len(), 1);
    assert!(
        store
            .position(1, vault, user, U256::from(2))
            .await
            .unwrap()
            .is_none()
    );
}

#[tokio::test]
async fn test_restart_resumes_from_watermark() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("indexer.db");
    let chain = listed_chain(1);
    let vault = testing::address(1);
    let user = testing::address(100);
    chain.push_activation(vault, 102, user, 1, PositionSide::Lender, 1_000, 0);

    {
        let store = Store::open(&path, Duration::from_secs(5)).unwrap();
        store.migrate().await.unwrap();
        syncer(&[&chain], store, SyncConfig::default())
            .run_pass()
            .await;
    }

    chain.push_repay(vault, 107, user, 1, 1_000, 0);
    chain.set_head(108);

    let store = Store::open(&path, Duration::from_secs(5)).unwrap();
    assert_eq!(store.migrate().await.unwrap(), 0);
    let report = syncer(&[&chain], store.clone(), SyncConfig::default())
        .run_pass()
        .await;

    assert!(matches!(
        report.chain(1).unwrap().vault(vault).unwrap().outcome,
        VaultOutcome::Advanced {
            from: 106,
            to: 108,
            events: 1,
            ..
        }
    ));
    let position = store
        .position(1, vault, user, U256::from(1))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(position.status(), PositionStatus::Closed);
    assert_eq!(position.opened().unwrap().block_number(), 102);
}

#[tokio::test]
async fn test_disabled_sync_is_noop() {
    let chain = listed_chain(1);
    let registry = MockRegistry::new([chain.runtime(START_BLOCK)]);
    let store = Store::in_memory().unwrap();
    let syncer = Syncer::new(Arc::new(registry), store.clone(), SyncConfig::default(), false);

    let report = syncer.run_pass().await;

    assert!(matches!(
        report.chain(1).unwrap().outcome,
        ChainOutcome::Disabled
    ));
    assert_eq!(chain.log_requests(), 0);
    assert!(store.vaults(1).await.unwrap().is_empty());
}
