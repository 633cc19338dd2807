use super::repository::SubscriptionRepository;
use log::info;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

/// 未同期の行を定期的にリモートへ反映するワーカーを起動する
///
/// # 引数
/// * `repository` - 対象のリポジトリ
/// * `interval` - 再同期の間隔（ゼロの場合は1秒）
/// * `shutdown` - キャンセルされるとワーカーを終了する
///
/// # 戻り値
/// ワーカーのタスクハンドル
pub fn spawn_reconciliation_worker(
    repository: SubscriptionRepository,
    interval: Duration,
    shutdown: CancellationToken,
) -> JoinHandle<()> {
    let period = if interval.is_zero() {
        Duration::from_secs(1)
    } else {
        interval
    };

    tokio::spawn(async move {
        info!("再同期ワーカーを開始しました: interval={period:?}");

        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // 起動直後の即時tickは読み飛ばす
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = ticker.tick() => {
                    if let Err(e) = repository.reconcile_pending().await {
                        log::log!(e.severity().log_level(), "定期再同期に失敗しました: {e}");
                    }
                }
            }
        }

        info!("再同期ワーカーを停止しました");
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::features::subscriptions::entity::SyncStatus;
    use crate::features::subscriptions::local_store::{SqliteSubscriptionStore, SubscriptionLocalStore};
    use crate::features::subscriptions::models::{BillingCycle, Subscription};
    use crate::features::subscriptions::remote::MockSubscriptionService;
    use crate::shared::database::create_in_memory_connection;
    use crate::shared::errors::AppError;
    use crate::shared::utils::generate_temporary_id;
    use chrono::NaiveDate;
    use std::sync::{Arc, Mutex};

    #[tokio::test]
    async fn test_worker_pushes_pending_rows_and_stops_on_cancel() {
        let conn = create_in_memory_connection().unwrap();
        let local = Arc::new(SqliteSubscriptionStore::new(Arc::new(Mutex::new(conn))).unwrap());
        let remote = Arc::new(MockSubscriptionService::new(Duration::ZERO));
        let repository = SubscriptionRepository::new(local.clone(), remote.clone());

        remote.fail_next(AppError::server_error("down")).await;
        let subscription = Subscription::new(
            generate_temporary_id(),
            "Spotify",
            10900.0,
            BillingCycle::Monthly,
            NaiveDate::from_ymd_opt(2024, 11, 10).unwrap(),
        );
        assert!(repository.add(&subscription).await.is_err());

        let shutdown = CancellationToken::new();
        let handle = spawn_reconciliation_worker(
            repository,
            Duration::from_millis(20),
            shutdown.clone(),
        );

        let mut synced = false;
        for _ in 0..50 {
            tokio::time::sleep(Duration::from_millis(20)).await;
            if local.list_unsynced().await.unwrap().is_empty() {
                synced = true;
                break;
            }
        }
        assert!(synced);

        let stored = local.get_by_remote_id("srv-1").await.unwrap().unwrap();
        assert_eq!(stored.sync_status, SyncStatus::Synced);

        shutdown.cancel();
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .unwrap()
            .unwrap();
    }
}
