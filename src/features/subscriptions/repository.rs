use super::entity::{SubscriptionEntity, SyncStatus};
use super::local_store::SubscriptionLocalStore;
use super::models::Subscription;
use super::remote::SubscriptionApi;
use crate::shared::errors::{AppError, AppResult};
use futures::stream::BoxStream;
use log::{debug, error, info, warn};
use std::collections::HashSet;
use std::sync::{Arc, Mutex, PoisonError};
use tokio_stream::wrappers::WatchStream;
use tokio_stream::StreamExt;

/// 再同期処理の結果
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReconciliationReport {
    /// リモートへ反映できた件数
    pub synced: usize,
    /// 反映に失敗し、次回に持ち越した件数
    pub failed: usize,
    /// 他の送信が進行中のため見送った件数
    pub skipped: usize,
}

impl ReconciliationReport {
    /// すべての未同期行を処理できたかどうか
    pub fn is_complete(&self) -> bool {
        self.failed == 0 && self.skipped == 0
    }
}

/// リモートへ送信中のIDの集合
///
/// 同じ行への送信は同時に1つだけ行う。
#[derive(Clone, Default)]
struct InFlight {
    ids: Arc<Mutex<HashSet<String>>>,
}

impl InFlight {
    /// IDを送信中として登録する
    ///
    /// # 戻り値
    /// 登録できた場合は解除用のガード、既に登録済みの場合はNone
    fn claim(&self, id: &str) -> AppResult<Option<InFlightClaim>> {
        let mut ids = self
            .ids
            .lock()
            .map_err(|e| AppError::concurrency(format!("送信中IDのロック取得失敗: {e}")))?;
        if !ids.insert(id.to_string()) {
            return Ok(None);
        }

        Ok(Some(InFlightClaim {
            ids: Arc::clone(&self.ids),
            id: id.to_string(),
        }))
    }
}

/// 破棄時に送信中の登録を解除する
struct InFlightClaim {
    ids: Arc<Mutex<HashSet<String>>>,
    id: String,
}

impl Drop for InFlightClaim {
    fn drop(&mut self) {
        let mut ids = self.ids.lock().unwrap_or_else(PoisonError::into_inner);
        ids.remove(&self.id);
    }
}

/// ローカルストアとリモートストアを調停するリポジトリ
///
/// 読み取りはローカルのみ。書き込みはローカルを先に確定させてからリモートへ送る。
#[derive(Clone)]
pub struct SubscriptionRepository {
    local: Arc<dyn SubscriptionLocalStore>,
    remote: Arc<dyn SubscriptionApi>,
    in_flight: InFlight,
}

impl SubscriptionRepository {
    pub fn new(local: Arc<dyn SubscriptionLocalStore>, remote: Arc<dyn SubscriptionApi>) -> Self {
        Self {
            local,
            remote,
            in_flight: InFlight::default(),
        }
    }

    /// ローカルの一覧を監視する
    ///
    /// 購読時に現在の一覧を1回流し、以降はローカルの変更ごとに全件を流す。
    /// 削除待ちの行は含まれない。
    pub fn observe_all(&self) -> BoxStream<'static, Vec<Subscription>> {
        let stream = WatchStream::new(self.local.subscribe()).map(|entities| to_visible_domain(&entities));
        Box::pin(stream)
    }

    /// IDでサブスクリプションを取得する（ローカルのみ）
    pub async fn get_by_id(&self, id: &str) -> AppResult<Option<Subscription>> {
        match self.local.get_by_remote_id(id).await? {
            Some(entity) if entity.is_visible() => Subscription::try_from(&entity).map(Some),
            _ => Ok(None),
        }
    }

    /// サブスクリプションを追加する
    ///
    /// # 処理順
    /// 1. ローカルに作成待ちとして保存（この時点で一覧に表示される）
    /// 2. リモートに作成
    /// 3. サーバーのレコードでローカル行を上書き（IDの書き戻し）
    ///
    /// # 戻り値
    /// リモートで確定したサブスクリプション。失敗時はローカル行が作成待ちのまま残る
    pub async fn add(&self, subscription: &Subscription) -> AppResult<Subscription> {
        let entity = SubscriptionEntity::from_domain(subscription, SyncStatus::PendingCreate);
        let _claim = self.in_flight.claim(&entity.remote_id)?.ok_or_else(|| {
            AppError::conflict(format!("ID {} のサブスクリプションは送信中です", entity.remote_id))
        })?;

        self.local.upsert(&entity).await?;
        debug!("ローカルにサブスクリプションを保存しました: id={}", entity.remote_id);

        self.push_create(&entity)
            .await
            .inspect_err(|e| log_push_failure("作成", &entity.remote_id, e))
    }

    /// サブスクリプションを更新する
    ///
    /// ローカル行が存在しない場合はリモートに送らずNotFound。
    /// リモート失敗時もローカルの変更は保持される。
    /// 同じ行の送信が進行中の場合はローカルのみ更新し、送信は再同期に任せる。
    pub async fn update(&self, subscription: &Subscription) -> AppResult<()> {
        let claim = self.in_flight.claim(&subscription.id)?;
        let existing = self
            .local
            .get_by_remote_id(&subscription.id)
            .await?
            .filter(SubscriptionEntity::is_visible)
            .ok_or_else(|| {
                AppError::NotFound(format!(
                    "ID {} のサブスクリプションが見つかりません",
                    subscription.id
                ))
            })?;

        let status = existing.sync_status.after_local_update();
        let entity = SubscriptionEntity::from_domain(subscription, status);
        self.local.update(&entity).await?;

        let Some(_claim) = claim else {
            info!("送信中のため変更をローカルに保持しました: id={}", entity.remote_id);
            return Ok(());
        };

        // リモート未作成の行は作成として送る
        if status == SyncStatus::PendingCreate {
            return self
                .push_create(&entity)
                .await
                .map(|_| ())
                .inspect_err(|e| log_push_failure("作成", &entity.remote_id, e));
        }

        match self.remote.update(&entity.remote_id, &entity.to_dto()).await {
            Ok(_) => {
                info!("サブスクリプションを更新しました: id={}", entity.remote_id);
                self.confirm_synced(&entity).await
            }
            Err(e) => {
                log_push_failure("更新", &entity.remote_id, &e);
                Err(e)
            }
        }
    }

    /// サブスクリプションを削除する
    ///
    /// ローカル行を削除待ちにしてからリモートへ削除を送る。
    /// リモートで成功またはNotFoundの場合はローカル行を完全に削除する（NotFoundは呼び出し元へ返す）。
    /// 同じ行の送信が進行中の場合は削除待ちにするだけで、送信完了後の再同期で削除される。
    pub async fn delete(&self, id: &str) -> AppResult<()> {
        let Some(_claim) = self.in_flight.claim(id)? else {
            self.local.mark_deleted(id).await?;
            info!("送信中のため削除待ちにしました: id={id}");
            return Ok(());
        };

        match self.local.get_by_remote_id(id).await? {
            Some(entity) if entity.sync_status == SyncStatus::PendingCreate => {
                // リモートに存在しないためローカルのみで完結する
                self.local.delete_by_remote_id(id).await?;
                info!("作成待ちのサブスクリプションを削除しました: id={id}");
                return Ok(());
            }
            Some(_) => self.local.mark_deleted(id).await?,
            None => debug!("ローカルに存在しないIDをリモートから削除します: id={id}"),
        }

        match self.remote.delete(id).await {
            Ok(()) => {
                self.local.delete_by_remote_id(id).await?;
                info!("サブスクリプションを削除しました: id={id}");
                Ok(())
            }
            Err(AppError::NotFound(message)) => {
                self.local.delete_by_remote_id(id).await?;
                warn!("リモートに削除対象が存在しませんでした: id={id}");
                Err(AppError::NotFound(message))
            }
            Err(e) => {
                log_push_failure("削除", id, &e);
                Err(e)
            }
        }
    }

    /// リモートの全件でローカルを置き換える
    ///
    /// すべてのレコードの変換に成功した場合のみ、1トランザクションで置き換える。
    /// 取得・変換に失敗した場合はローカルを変更しない。
    pub async fn refresh(&self) -> AppResult<()> {
        let records = self.remote.get_all().await.inspect_err(|e| {
            error!("リモートからの一覧取得に失敗しました: {e}");
        })?;

        let entities = records
            .into_iter()
            .map(|dto| SubscriptionEntity::from_dto(dto, SyncStatus::Synced))
            .collect::<AppResult<Vec<_>>>()
            .inspect_err(|e| error!("リモートのレコードを変換できませんでした: {e}"))?;

        self.local.replace_all(&entities).await?;
        info!("リモートからサブスクリプションを同期しました: count={}", entities.len());
        Ok(())
    }

    /// 未同期の行をリモートへ反映する
    ///
    /// 1件の失敗で処理を中断せず、失敗件数として報告する。
    /// 送信中の行は見送る。
    pub async fn reconcile_pending(&self) -> AppResult<ReconciliationReport> {
        let pending = self.local.list_unsynced().await?;
        let mut report = ReconciliationReport::default();

        for listed in &pending {
            let Some(_claim) = self.in_flight.claim(&listed.remote_id)? else {
                debug!("送信中のため再同期を見送ります: id={}", listed.remote_id);
                report.skipped += 1;
                continue;
            };

            // 一覧取得後に他の処理が反映済みの場合がある
            let entity = match self.local.get_by_remote_id(&listed.remote_id).await? {
                Some(entity) if entity.sync_status != SyncStatus::Synced => entity,
                _ => continue,
            };

            match self.reconcile_entity(&entity).await {
                Ok(()) => report.synced += 1,
                Err(e) => {
                    warn!(
                        "再同期に失敗しました: id={}, status={}, error={e}",
                        entity.remote_id,
                        entity.sync_status.as_str()
                    );
                    report.failed += 1;
                }
            }
        }

        if !pending.is_empty() {
            info!(
                "再同期が完了しました: synced={}, failed={}, skipped={}",
                report.synced, report.failed, report.skipped
            );
        }
        Ok(report)
    }

    /// 未同期の行を反映してからリモートの全件を取り込む
    ///
    /// 反映できなかった行が残る場合は、その行を失わないよう取り込みを見送る。
    pub async fn synchronize(&self) -> AppResult<ReconciliationReport> {
        let report = self.reconcile_pending().await?;
        if !report.is_complete() {
            warn!(
                "未同期の行が残っているためリモートの取り込みを見送ります: failed={}, skipped={}",
                report.failed, report.skipped
            );
            return Ok(report);
        }

        self.refresh().await?;
        Ok(report)
    }

    async fn reconcile_entity(&self, entity: &SubscriptionEntity) -> AppResult<()> {
        match entity.sync_status {
            SyncStatus::Synced => Ok(()),
            SyncStatus::PendingCreate => self.push_create(entity).await.map(|_| ()),
            SyncStatus::PendingUpdate => {
                match self.remote.update(&entity.remote_id, &entity.to_dto()).await {
                    Ok(_) => self.confirm_synced(entity).await,
                    Err(AppError::NotFound(_)) => {
                        debug!("リモートに存在しないため再作成します: id={}", entity.remote_id);
                        self.push_create(entity).await.map(|_| ())
                    }
                    Err(e) => Err(e),
                }
            }
            SyncStatus::PendingDelete => match self.remote.delete(&entity.remote_id).await {
                Ok(()) | Err(AppError::NotFound(_)) => {
                    self.local.delete_by_remote_id(&entity.remote_id).await?;
                    Ok(())
                }
                Err(e) => Err(e),
            },
        }
    }

    /// リモートに作成し、返されたレコードでローカル行を上書きする
    ///
    /// 呼び出し元は `entity` のIDを送信中として登録済みであること。
    async fn push_create(&self, entity: &SubscriptionEntity) -> AppResult<Subscription> {
        let created = self.remote.create(&entity.to_create_request()).await?;
        let confirmed = SubscriptionEntity::from_dto(created, SyncStatus::Synced)?;

        let status = self
            .local
            .replace_remote_record(&entity.remote_id, entity, &confirmed)
            .await
            .inspect_err(|e| {
                warn!(
                    "IDの書き戻しに失敗しました: old_id={}, new_id={}, error={e}",
                    entity.remote_id, confirmed.remote_id
                );
            })?;

        info!(
            "サブスクリプションをリモートに作成しました: old_id={}, id={}, status={}",
            entity.remote_id,
            confirmed.remote_id,
            status.as_str()
        );
        Subscription::try_from(&confirmed)
    }

    /// 送信した内容のままであれば同期済みにする
    ///
    /// 送信中にローカルで変更された行は未同期のまま残し、次の再同期で送る。
    async fn confirm_synced(&self, sent: &SubscriptionEntity) -> AppResult<()> {
        match self.local.mark_synced_if_unchanged(sent).await {
            Ok(true) => Ok(()),
            Ok(false) => {
                debug!("送信後に変更されたため未同期のまま保持します: id={}", sent.remote_id);
                Ok(())
            }
            Err(AppError::NotFound(_)) => {
                warn!("同期済みにする行がローカルに存在しません: id={}", sent.remote_id);
                Ok(())
            }
            Err(e) => Err(e),
        }
    }
}

/// 送信失敗を記録する
///
/// リモート起因の失敗は行が未同期のまま残るため警告に留める。
fn log_push_failure(action: &str, id: &str, error: &AppError) {
    if error.is_remote() {
        warn!("リモートへの{action}に失敗しました。未同期として保持します: id={id}, error={error}");
    } else {
        error!("{action}の同期処理に失敗しました: id={id}, error={error}");
    }
}

/// 表示対象の行をドメインモデルに変換する（変換できない行は読み飛ばす）
fn to_visible_domain(entities: &[SubscriptionEntity]) -> Vec<Subscription> {
    entities
        .iter()
        .filter(|entity| entity.is_visible())
        .filter_map(|entity| match Subscription::try_from(entity) {
            Ok(subscription) => Some(subscription),
            Err(e) => {
                error!("ローカル行を変換できませんでした: id={}, error={e}", entity.remote_id);
                None
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::features::subscriptions::dto::SubscriptionDto;
    use crate::features::subscriptions::local_store::SqliteSubscriptionStore;
    use crate::features::subscriptions::models::BillingCycle;
    use crate::features::subscriptions::remote::MockSubscriptionService;
    use crate::shared::database::create_in_memory_connection;
    use crate::shared::utils::generate_temporary_id;
    use async_trait::async_trait;
    use chrono::NaiveDate;
    use std::sync::Mutex;
    use std::time::Duration;
    use tokio::sync::Notify;
    use tokio::task::JoinHandle;

    struct TestContext {
        repository: SubscriptionRepository,
        local: Arc<SqliteSubscriptionStore>,
        remote: Arc<MockSubscriptionService>,
    }

    fn setup(remote: MockSubscriptionService) -> TestContext {
        let conn = create_in_memory_connection().unwrap();
        let local = Arc::new(SqliteSubscriptionStore::new(Arc::new(Mutex::new(conn))).unwrap());
        let remote = Arc::new(remote);
        TestContext {
            repository: SubscriptionRepository::new(local.clone(), remote.clone()),
            local,
            remote,
        }
    }

    fn netflix(id: &str) -> Subscription {
        Subscription::new(
            id,
            "Netflix",
            13500.0,
            BillingCycle::Monthly,
            NaiveDate::from_ymd_opt(2023, 3, 29).unwrap(),
        )
    }

    fn synced_entity(id: &str) -> SubscriptionEntity {
        SubscriptionEntity::from_domain(&netflix(id), SyncStatus::Synced)
    }

    #[tokio::test]
    async fn test_add_backfills_server_id() {
        let ctx = setup(MockSubscriptionService::new(Duration::ZERO));
        let temporary_id = generate_temporary_id();

        let confirmed = ctx.repository.add(&netflix(&temporary_id)).await.unwrap();
        assert_eq!(confirmed.id, "srv-1");

        let mut stream = ctx.repository.observe_all();
        let list = stream.next().await.unwrap();
        assert_eq!(list.len(), 1);
        assert_eq!(list[0].id, "srv-1");
        assert_eq!(
            list[0].next_billing_date(),
            NaiveDate::from_ymd_opt(2023, 4, 29).unwrap()
        );

        let stored = ctx.local.get_by_remote_id("srv-1").await.unwrap().unwrap();
        assert_eq!(stored.sync_status, SyncStatus::Synced);
        assert!(ctx.local.get_by_remote_id(&temporary_id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_add_is_visible_before_remote_completes() {
        let ctx = setup(MockSubscriptionService::new(Duration::from_millis(300)));
        let mut stream = ctx.repository.observe_all();
        assert!(stream.next().await.unwrap().is_empty());

        let repository = ctx.repository.clone();
        let temporary_id = generate_temporary_id();
        let subscription = netflix(&temporary_id);
        let handle = tokio::spawn(async move { repository.add(&subscription).await });

        let list = stream.next().await.unwrap();
        assert_eq!(list.len(), 1);
        assert_eq!(list[0].id, temporary_id);
        assert!(!handle.is_finished());

        handle.await.unwrap().unwrap();
        let list = stream.next().await.unwrap();
        assert_eq!(list[0].id, "srv-1");
    }

    #[tokio::test]
    async fn test_add_failure_keeps_pending_row_until_reconciled() {
        let ctx = setup(MockSubscriptionService::new(Duration::ZERO));
        ctx.remote.fail_next(AppError::unauthorized("expired")).await;
        let temporary_id = generate_temporary_id();

        let result = ctx.repository.add(&netflix(&temporary_id)).await;
        assert!(matches!(result, Err(AppError::Unauthorized(_))));

        let pending = ctx.local.list_unsynced().await.unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].sync_status, SyncStatus::PendingCreate);
        assert!(ctx.repository.get_by_id(&temporary_id).await.unwrap().is_some());

        let report = ctx.repository.reconcile_pending().await.unwrap();
        assert_eq!(report, ReconciliationReport { synced: 1, failed: 0, skipped: 0 });
        assert!(ctx.repository.get_by_id("srv-1").await.unwrap().is_some());
        assert!(ctx.local.list_unsynced().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_add_duplicate_id_is_conflict_and_local_row_remains() {
        let existing = SubscriptionDto::from(&netflix("client-1"));
        let ctx = setup(MockSubscriptionService::with_records(Duration::ZERO, vec![existing]));

        let result = ctx.repository.add(&netflix("client-1")).await;
        assert!(matches!(result, Err(AppError::Conflict(_))));

        let stored = ctx.local.get_by_remote_id("client-1").await.unwrap().unwrap();
        assert_eq!(stored.sync_status, SyncStatus::PendingCreate);
    }

    #[tokio::test]
    async fn test_update_missing_locally_skips_remote() {
        let ctx = setup(MockSubscriptionService::with_sample_data(Duration::ZERO));

        let result = ctx.repository.update(&netflix("srv-1")).await;
        assert!(matches!(result, Err(AppError::NotFound(_))));
        // リモートは変更されていない
        assert_eq!(ctx.remote.snapshot().await[0].name, "Netflix");
        assert_eq!(ctx.remote.snapshot().await[0].cycle, "Monthly");
    }

    #[tokio::test]
    async fn test_update_syncs_remote() {
        let ctx = setup(MockSubscriptionService::with_sample_data(Duration::ZERO));
        ctx.repository.refresh().await.unwrap();

        let mut changed = ctx.repository.get_by_id("srv-1").await.unwrap().unwrap();
        changed.cost = 17000.0;
        changed.set_cycle(BillingCycle::Yearly);
        ctx.repository.update(&changed).await.unwrap();

        let stored = ctx.local.get_by_remote_id("srv-1").await.unwrap().unwrap();
        assert_eq!(stored.sync_status, SyncStatus::Synced);
        assert_eq!(stored.cost, 17000.0);

        let remote = ctx.remote.snapshot().await;
        assert_eq!(remote[0].cost, 17000.0);
        assert_eq!(remote[0].cycle, "YEARLY");
    }

    #[tokio::test]
    async fn test_update_unknown_remotely_is_not_found_and_recreated_later() {
        let ctx = setup(MockSubscriptionService::new(Duration::ZERO));
        ctx.local.upsert(&synced_entity("srv-9")).await.unwrap();

        let mut changed = netflix("srv-9");
        changed.name = "Netflix Premium".to_string();
        let result = ctx.repository.update(&changed).await;
        assert!(matches!(result, Err(AppError::NotFound(_))));

        // ローカルの変更は保持される
        let stored = ctx.local.get_by_remote_id("srv-9").await.unwrap().unwrap();
        assert_eq!(stored.name, "Netflix Premium");
        assert_eq!(stored.sync_status, SyncStatus::PendingUpdate);

        let report = ctx.repository.reconcile_pending().await.unwrap();
        assert_eq!(report.synced, 1);
        let remote = ctx.remote.snapshot().await;
        assert_eq!(remote.len(), 1);
        assert_eq!(remote[0].id.as_deref(), Some("srv-9"));
    }

    #[tokio::test]
    async fn test_delete_removes_both_sides() {
        let ctx = setup(MockSubscriptionService::with_sample_data(Duration::ZERO));
        ctx.repository.refresh().await.unwrap();

        ctx.repository.delete("srv-2").await.unwrap();

        assert!(ctx.local.get_by_remote_id("srv-2").await.unwrap().is_none());
        assert_eq!(ctx.remote.snapshot().await.len(), 2);
    }

    #[tokio::test]
    async fn test_delete_absent_remotely_is_not_found_and_not_reinserted() {
        let ctx = setup(MockSubscriptionService::new(Duration::ZERO));
        ctx.local.upsert(&synced_entity("srv-9")).await.unwrap();

        let result = ctx.repository.delete("srv-9").await;
        assert!(matches!(result, Err(AppError::NotFound(_))));

        assert!(ctx.local.get_all().await.unwrap().is_empty());
        assert!(ctx.repository.get_by_id("srv-9").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_delete_failure_keeps_hidden_tombstone() {
        let ctx = setup(MockSubscriptionService::with_sample_data(Duration::ZERO));
        ctx.repository.refresh().await.unwrap();
        ctx.remote.fail_next(AppError::server_error("down")).await;

        let result = ctx.repository.delete("srv-1").await;
        assert!(matches!(result, Err(AppError::ServerError(_))));

        let mut stream = ctx.repository.observe_all();
        let visible = stream.next().await.unwrap();
        assert_eq!(visible.len(), 2);
        assert!(visible.iter().all(|s| s.id != "srv-1"));

        let report = ctx.repository.reconcile_pending().await.unwrap();
        assert_eq!(report.synced, 1);
        assert!(ctx.local.get_by_remote_id("srv-1").await.unwrap().is_none());
        assert_eq!(ctx.remote.snapshot().await.len(), 2);
    }

    #[tokio::test]
    async fn test_delete_pending_create_is_local_only() {
        let ctx = setup(MockSubscriptionService::new(Duration::ZERO));
        ctx.remote.fail_next(AppError::server_error("down")).await;
        let temporary_id = generate_temporary_id();
        let _ = ctx.repository.add(&netflix(&temporary_id)).await;

        ctx.repository.delete(&temporary_id).await.unwrap();
        assert!(ctx.local.get_all().await.unwrap().is_empty());
        assert!(ctx.remote.snapshot().await.is_empty());
    }

    #[tokio::test]
    async fn test_refresh_is_idempotent_without_empty_emission() {
        let ctx = setup(MockSubscriptionService::with_sample_data(Duration::ZERO));
        ctx.repository.refresh().await.unwrap();

        let mut stream = ctx.repository.observe_all();
        let before = stream.next().await.unwrap();
        assert_eq!(before.len(), 3);

        ctx.repository.refresh().await.unwrap();
        let after = stream.next().await.unwrap();
        assert_eq!(after, before);
    }

    #[tokio::test]
    async fn test_refresh_failure_leaves_local_untouched() {
        let ctx = setup(MockSubscriptionService::with_sample_data(Duration::ZERO));
        ctx.repository.refresh().await.unwrap();
        ctx.remote.fail_next(AppError::server_error("down")).await;

        let result = ctx.repository.refresh().await;
        assert!(matches!(result, Err(AppError::ServerError(_))));
        assert_eq!(ctx.local.get_all().await.unwrap().len(), 3);
    }

    /// IDを持たないレコードを返すリモート
    struct MissingIdApi;

    #[async_trait]
    impl SubscriptionApi for MissingIdApi {
        async fn get_all(&self) -> AppResult<Vec<SubscriptionDto>> {
            let mut dto = SubscriptionDto::from(&netflix("ignored"));
            dto.id = None;
            Ok(vec![SubscriptionDto::from(&netflix("srv-1")), dto])
        }

        async fn create(&self, _dto: &SubscriptionDto) -> AppResult<SubscriptionDto> {
            Err(AppError::unknown("unsupported"))
        }

        async fn update(&self, _id: &str, _dto: &SubscriptionDto) -> AppResult<SubscriptionDto> {
            Err(AppError::unknown("unsupported"))
        }

        async fn delete(&self, _id: &str) -> AppResult<()> {
            Err(AppError::unknown("unsupported"))
        }
    }

    #[tokio::test]
    async fn test_refresh_rejects_record_without_id() {
        let conn = create_in_memory_connection().unwrap();
        let local = Arc::new(SqliteSubscriptionStore::new(Arc::new(Mutex::new(conn))).unwrap());
        local.upsert(&synced_entity("keep")).await.unwrap();
        let repository = SubscriptionRepository::new(local.clone(), Arc::new(MissingIdApi));

        let result = repository.refresh().await;
        assert!(matches!(result, Err(AppError::Validation(_))));

        let all = local.get_all().await.unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].remote_id, "keep");
    }

    #[tokio::test]
    async fn test_synchronize_pushes_before_replacing() {
        let ctx = setup(MockSubscriptionService::with_sample_data(Duration::ZERO));
        ctx.remote.fail_next(AppError::server_error("down")).await;
        let _ = ctx.repository.add(&netflix(&generate_temporary_id())).await;

        let report = ctx.repository.synchronize().await.unwrap();
        assert_eq!(report, ReconciliationReport { synced: 1, failed: 0, skipped: 0 });

        let mut stream = ctx.repository.observe_all();
        let ids: Vec<String> = stream.next().await.unwrap().into_iter().map(|s| s.id).collect();
        assert_eq!(ids, vec!["srv-1", "srv-2", "srv-3", "srv-4"]);
    }

    #[tokio::test]
    async fn test_synchronize_keeps_rows_that_failed_to_push() {
        let ctx = setup(MockSubscriptionService::with_sample_data(Duration::ZERO));
        ctx.remote.fail_next(AppError::server_error("down")).await;
        let temporary_id = generate_temporary_id();
        let _ = ctx.repository.add(&netflix(&temporary_id)).await;

        ctx.remote.fail_next(AppError::server_error("down")).await;
        let report = ctx.repository.synchronize().await.unwrap();
        assert_eq!(report, ReconciliationReport { synced: 0, failed: 1, skipped: 0 });

        // リモートの全件で置き換えられず、作成待ちの行が残る
        let all = ctx.local.get_all().await.unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].remote_id, temporary_id);
        assert_eq!(all[0].sync_status, SyncStatus::PendingCreate);
        assert_eq!(ctx.remote.snapshot().await.len(), 3);
    }

    /// 作成要求を合図があるまで保留するリモート
    struct GatedCreateApi {
        inner: Arc<MockSubscriptionService>,
        gate: Arc<Notify>,
    }

    #[async_trait]
    impl SubscriptionApi for GatedCreateApi {
        async fn get_all(&self) -> AppResult<Vec<SubscriptionDto>> {
            self.inner.get_all().await
        }

        async fn create(&self, dto: &SubscriptionDto) -> AppResult<SubscriptionDto> {
            self.gate.notified().await;
            self.inner.create(dto).await
        }

        async fn update(&self, id: &str, dto: &SubscriptionDto) -> AppResult<SubscriptionDto> {
            self.inner.update(id, dto).await
        }

        async fn delete(&self, id: &str) -> AppResult<()> {
            self.inner.delete(id).await
        }
    }

    fn setup_gated() -> (TestContext, Arc<Notify>) {
        let conn = create_in_memory_connection().unwrap();
        let local = Arc::new(SqliteSubscriptionStore::new(Arc::new(Mutex::new(conn))).unwrap());
        let remote = Arc::new(MockSubscriptionService::new(Duration::ZERO));
        let gate = Arc::new(Notify::new());
        let api = Arc::new(GatedCreateApi {
            inner: remote.clone(),
            gate: gate.clone(),
        });

        let ctx = TestContext {
            repository: SubscriptionRepository::new(local.clone(), api),
            local,
            remote,
        };
        (ctx, gate)
    }

    /// 追加を開始し、ローカル保存が通知されるまで待つ（リモート作成は保留中）
    async fn start_add(ctx: &TestContext, id: &str) -> JoinHandle<AppResult<Subscription>> {
        let mut stream = ctx.repository.observe_all();
        let repository = ctx.repository.clone();
        let subscription = netflix(id);
        let handle = tokio::spawn(async move { repository.add(&subscription).await });

        loop {
            let list = stream.next().await.unwrap();
            if list.iter().any(|s| s.id == id) {
                break;
            }
        }
        handle
    }

    #[tokio::test]
    async fn test_reconcile_skips_row_with_create_in_flight() {
        let (ctx, gate) = setup_gated();
        let temporary_id = generate_temporary_id();
        let handle = start_add(&ctx, &temporary_id).await;

        let report = ctx.repository.reconcile_pending().await.unwrap();
        assert_eq!(report, ReconciliationReport { synced: 0, failed: 0, skipped: 1 });
        assert!(matches!(
            ctx.repository.add(&netflix(&temporary_id)).await,
            Err(AppError::Conflict(_))
        ));

        gate.notify_one();
        let created = handle.await.unwrap().unwrap();
        assert_eq!(created.id, "srv-1");

        let all = ctx.local.get_all().await.unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].remote_id, "srv-1");
        assert_eq!(all[0].sync_status, SyncStatus::Synced);

        // 1つのローカル行に対してリモートのレコードも1件
        assert_eq!(
            ctx.repository.reconcile_pending().await.unwrap(),
            ReconciliationReport::default()
        );
        let remote = ctx.remote.snapshot().await;
        assert_eq!(remote.len(), 1);
        assert_eq!(remote[0].id.as_deref(), Some("srv-1"));
    }

    #[tokio::test]
    async fn test_update_during_create_is_pushed_after_backfill() {
        let (ctx, gate) = setup_gated();
        let temporary_id = generate_temporary_id();
        let handle = start_add(&ctx, &temporary_id).await;

        let mut changed = netflix(&temporary_id);
        changed.cost = 17000.0;
        ctx.repository.update(&changed).await.unwrap();

        gate.notify_one();
        handle.await.unwrap().unwrap();

        let stored = ctx.local.get_by_remote_id("srv-1").await.unwrap().unwrap();
        assert_eq!(stored.cost, 17000.0);
        assert_eq!(stored.sync_status, SyncStatus::PendingUpdate);
        assert_eq!(ctx.remote.snapshot().await[0].cost, 13500.0);

        let report = ctx.repository.reconcile_pending().await.unwrap();
        assert_eq!(report.synced, 1);

        let remote = ctx.remote.snapshot().await;
        assert_eq!(remote.len(), 1);
        assert_eq!(remote[0].cost, 17000.0);
        assert!(ctx.local.list_unsynced().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_delete_during_create_removes_remote_record() {
        let (ctx, gate) = setup_gated();
        let temporary_id = generate_temporary_id();
        let handle = start_add(&ctx, &temporary_id).await;

        ctx.repository.delete(&temporary_id).await.unwrap();
        assert!(ctx.repository.get_by_id(&temporary_id).await.unwrap().is_none());

        gate.notify_one();
        handle.await.unwrap().unwrap();

        // 作成されたレコードは削除待ちの墓標として残る
        let tombstone = ctx.local.get_by_remote_id("srv-1").await.unwrap().unwrap();
        assert_eq!(tombstone.sync_status, SyncStatus::PendingDelete);
        assert!(ctx.repository.get_by_id("srv-1").await.unwrap().is_none());
        assert_eq!(ctx.remote.snapshot().await.len(), 1);

        let report = ctx.repository.reconcile_pending().await.unwrap();
        assert_eq!(report.synced, 1);
        assert!(ctx.local.get_all().await.unwrap().is_empty());
        assert!(ctx.remote.snapshot().await.is_empty());
    }

    #[tokio::test]
    async fn test_refresh_during_create_fails_backfill() {
        let (ctx, gate) = setup_gated();
        let temporary_id = generate_temporary_id();
        let handle = start_add(&ctx, &temporary_id).await;

        // リモートはまだ空のため、作成待ちの行も置き換えで消える
        ctx.repository.refresh().await.unwrap();
        assert!(ctx.local.get_all().await.unwrap().is_empty());

        gate.notify_one();
        let result = handle.await.unwrap();
        assert!(matches!(result, Err(AppError::NotFound(_))));
        assert!(ctx.local.get_all().await.unwrap().is_empty());
        assert_eq!(ctx.remote.snapshot().await.len(), 1);

        // 次の取り込みでリモートのレコードが反映される
        ctx.repository.refresh().await.unwrap();
        let stored = ctx.local.get_by_remote_id("srv-1").await.unwrap().unwrap();
        assert_eq!(stored.sync_status, SyncStatus::Synced);
    }
}
