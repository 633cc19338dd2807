use super::entity::{SubscriptionEntity, SyncStatus};
use crate::shared::errors::{AppError, AppResult};
use async_trait::async_trait;
use rusqlite::{params, Connection, ErrorCode};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::watch;

/// ローカルストアのインターフェース
///
/// レコードは共有識別子（remote_id）で指定する。
/// 変更はコミット後に全件リストとして `subscribe` の受信側へ通知される。
#[async_trait]
pub trait SubscriptionLocalStore: Send + Sync {
    /// 変更通知の受信側を取得する（購読時点の最新値を保持している）
    fn subscribe(&self) -> watch::Receiver<Vec<SubscriptionEntity>>;

    /// 全件を取得する（local_id順）
    async fn get_all(&self) -> AppResult<Vec<SubscriptionEntity>>;

    async fn get_by_remote_id(&self, remote_id: &str) -> AppResult<Option<SubscriptionEntity>>;

    /// 挿入する。remote_idが既に存在する場合は内容を置き換える
    ///
    /// # 戻り値
    /// 対象行のlocal_id
    async fn upsert(&self, entity: &SubscriptionEntity) -> AppResult<i64>;

    async fn upsert_all(&self, entities: &[SubscriptionEntity]) -> AppResult<()>;

    /// remote_idが一致する行を更新する（存在しない場合はNotFound）
    async fn update(&self, entity: &SubscriptionEntity) -> AppResult<()>;

    /// 旧IDの行をリモートレコードで上書きする（IDの書き戻し）
    ///
    /// 送信後にローカルで編集された行は内容を残して更新待ちにし、
    /// 削除待ちの行は削除待ちのままIDだけを書き換える。
    ///
    /// # 引数
    /// * `old_remote_id` - 送信時のID
    /// * `sent` - リモートへ送信した内容
    /// * `confirmed` - リモートが返したレコード
    ///
    /// # 戻り値
    /// 書き戻し後の同期状態
    async fn replace_remote_record(
        &self,
        old_remote_id: &str,
        sent: &SubscriptionEntity,
        confirmed: &SubscriptionEntity,
    ) -> AppResult<SyncStatus>;

    async fn set_sync_status(&self, remote_id: &str, status: SyncStatus) -> AppResult<()>;

    /// 送信した内容から変更がなければ同期済みにする
    ///
    /// # 戻り値
    /// 同期済みにした場合はtrue
    async fn mark_synced_if_unchanged(&self, sent: &SubscriptionEntity) -> AppResult<bool>;

    /// 削除待ちの墓標にする（一覧からは非表示になる）
    async fn mark_deleted(&self, remote_id: &str) -> AppResult<()> {
        self.set_sync_status(remote_id, SyncStatus::PendingDelete).await
    }

    /// # 戻り値
    /// 行が削除された場合はtrue
    async fn delete_by_remote_id(&self, remote_id: &str) -> AppResult<bool>;

    async fn delete_all(&self) -> AppResult<()>;

    /// 全件削除と一括挿入を1トランザクションで実行する
    async fn replace_all(&self, entities: &[SubscriptionEntity]) -> AppResult<()>;

    /// 同期済みでない行を取得する
    async fn list_unsynced(&self) -> AppResult<Vec<SubscriptionEntity>>;
}

/// SQLiteによるローカルストア実装
pub struct SqliteSubscriptionStore {
    db_connection: Arc<Mutex<Connection>>,
    changes: watch::Sender<Vec<SubscriptionEntity>>,
}

impl SqliteSubscriptionStore {
    /// 新しいストアを作成し、現在の内容を変更通知の初期値にする
    ///
    /// # 引数
    /// * `db_connection` - テーブル作成済みのデータベース接続
    pub fn new(db_connection: Arc<Mutex<Connection>>) -> AppResult<Self> {
        let initial = {
            let conn = lock_connection(&db_connection)?;
            query_all(&conn)?
        };
        let (changes, _) = watch::channel(initial);

        Ok(Self {
            db_connection,
            changes,
        })
    }

    fn lock(&self) -> AppResult<MutexGuard<'_, Connection>> {
        lock_connection(&self.db_connection)
    }

    /// コミット済みの内容を購読者へ通知する
    ///
    /// ロック保持中に呼び出し、書き込み順と通知順を一致させる。
    fn publish(&self, conn: &Connection) -> AppResult<()> {
        let all = query_all(conn)?;
        self.changes.send_replace(all);
        Ok(())
    }
}

fn lock_connection(db_connection: &Mutex<Connection>) -> AppResult<MutexGuard<'_, Connection>> {
    db_connection
        .lock()
        .map_err(|e| AppError::concurrency(format!("データベースロック取得失敗: {e}")))
}

fn query_all(conn: &Connection) -> AppResult<Vec<SubscriptionEntity>> {
    let sql = format!(
        "SELECT {} FROM subscriptions ORDER BY local_id",
        SubscriptionEntity::COLUMNS
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map([], SubscriptionEntity::from_row)?;
    rows.collect::<Result<Vec<_>, _>>().map_err(AppError::from)
}

fn query_by_remote_id(conn: &Connection, remote_id: &str) -> AppResult<Option<SubscriptionEntity>> {
    let sql = format!(
        "SELECT {} FROM subscriptions WHERE remote_id = ?1",
        SubscriptionEntity::COLUMNS
    );
    match conn.query_row(&sql, params![remote_id], SubscriptionEntity::from_row) {
        Ok(entity) => Ok(Some(entity)),
        Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
        Err(e) => Err(e.into()),
    }
}

fn upsert_row(conn: &Connection, entity: &SubscriptionEntity) -> AppResult<i64> {
    conn.execute(
        "INSERT INTO subscriptions (remote_id, name, cost, cycle, first_billing_date, currency, is_active, sync_status)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
         ON CONFLICT(remote_id) DO UPDATE SET
            name = excluded.name,
            cost = excluded.cost,
            cycle = excluded.cycle,
            first_billing_date = excluded.first_billing_date,
            currency = excluded.currency,
            is_active = excluded.is_active,
            sync_status = excluded.sync_status",
        params![
            entity.remote_id,
            entity.name,
            entity.cost,
            entity.cycle,
            entity.first_billing_date,
            entity.currency,
            entity.is_active,
            entity.sync_status,
        ],
    )?;

    let local_id = conn.query_row(
        "SELECT local_id FROM subscriptions WHERE remote_id = ?1",
        params![entity.remote_id],
        |row| row.get(0),
    )?;
    Ok(local_id)
}

/// 一意制約違反をConflictに変換する
fn map_write_error(error: rusqlite::Error, remote_id: &str) -> AppError {
    if let rusqlite::Error::SqliteFailure(failure, _) = &error {
        if failure.code == ErrorCode::ConstraintViolation {
            return AppError::conflict(format!("ID {remote_id} のサブスクリプションは既に存在します"));
        }
    }
    AppError::from(error)
}

/// 書き戻しで保存する行を決める
fn resolve_backfill(
    current: &SubscriptionEntity,
    sent: &SubscriptionEntity,
    confirmed: &SubscriptionEntity,
) -> SubscriptionEntity {
    let sync_status = if current.sync_status == SyncStatus::PendingDelete {
        SyncStatus::PendingDelete
    } else if !current.has_same_content(sent) {
        SyncStatus::PendingUpdate
    } else {
        return confirmed.clone();
    };

    SubscriptionEntity {
        remote_id: confirmed.remote_id.clone(),
        sync_status,
        ..current.clone()
    }
}

fn not_found(remote_id: &str) -> AppError {
    AppError::NotFound(format!("ID {remote_id} のサブスクリプションが見つかりません"))
}

#[async_trait]
impl SubscriptionLocalStore for SqliteSubscriptionStore {
    fn subscribe(&self) -> watch::Receiver<Vec<SubscriptionEntity>> {
        self.changes.subscribe()
    }

    async fn get_all(&self) -> AppResult<Vec<SubscriptionEntity>> {
        let conn = self.lock()?;
        query_all(&conn)
    }

    async fn get_by_remote_id(&self, remote_id: &str) -> AppResult<Option<SubscriptionEntity>> {
        let conn = self.lock()?;
        query_by_remote_id(&conn, remote_id)
    }

    async fn upsert(&self, entity: &SubscriptionEntity) -> AppResult<i64> {
        let conn = self.lock()?;
        let local_id = upsert_row(&conn, entity)?;
        self.publish(&conn)?;
        Ok(local_id)
    }

    async fn upsert_all(&self, entities: &[SubscriptionEntity]) -> AppResult<()> {
        let conn = self.lock()?;
        let tx = conn.unchecked_transaction()?;
        for entity in entities {
            upsert_row(&tx, entity)?;
        }
        tx.commit()?;
        self.publish(&conn)
    }

    async fn update(&self, entity: &SubscriptionEntity) -> AppResult<()> {
        let conn = self.lock()?;
        let rows_affected = conn.execute(
            "UPDATE subscriptions
             SET name = ?1, cost = ?2, cycle = ?3, first_billing_date = ?4, currency = ?5, is_active = ?6, sync_status = ?7
             WHERE remote_id = ?8",
            params![
                entity.name,
                entity.cost,
                entity.cycle,
                entity.first_billing_date,
                entity.currency,
                entity.is_active,
                entity.sync_status,
                entity.remote_id,
            ],
        )?;

        if rows_affected == 0 {
            return Err(not_found(&entity.remote_id));
        }
        self.publish(&conn)
    }

    async fn replace_remote_record(
        &self,
        old_remote_id: &str,
        sent: &SubscriptionEntity,
        confirmed: &SubscriptionEntity,
    ) -> AppResult<SyncStatus> {
        let conn = self.lock()?;
        let current = query_by_remote_id(&conn, old_remote_id)?.ok_or_else(|| not_found(old_remote_id))?;
        let row = resolve_backfill(&current, sent, confirmed);

        conn.execute(
            "UPDATE subscriptions
             SET remote_id = ?1, name = ?2, cost = ?3, cycle = ?4, first_billing_date = ?5,
                 currency = ?6, is_active = ?7, sync_status = ?8
             WHERE remote_id = ?9",
            params![
                row.remote_id,
                row.name,
                row.cost,
                row.cycle,
                row.first_billing_date,
                row.currency,
                row.is_active,
                row.sync_status,
                old_remote_id,
            ],
        )
        .map_err(|e| map_write_error(e, &row.remote_id))?;

        self.publish(&conn)?;
        Ok(row.sync_status)
    }

    async fn set_sync_status(&self, remote_id: &str, status: SyncStatus) -> AppResult<()> {
        let conn = self.lock()?;
        let rows_affected = conn.execute(
            "UPDATE subscriptions SET sync_status = ?1 WHERE remote_id = ?2",
            params![status, remote_id],
        )?;

        if rows_affected == 0 {
            return Err(not_found(remote_id));
        }
        self.publish(&conn)
    }

    async fn mark_synced_if_unchanged(&self, sent: &SubscriptionEntity) -> AppResult<bool> {
        let conn = self.lock()?;
        let current = query_by_remote_id(&conn, &sent.remote_id)?.ok_or_else(|| not_found(&sent.remote_id))?;
        if current.sync_status == SyncStatus::PendingDelete || !current.has_same_content(sent) {
            return Ok(false);
        }

        conn.execute(
            "UPDATE subscriptions SET sync_status = ?1 WHERE remote_id = ?2",
            params![SyncStatus::Synced, sent.remote_id],
        )?;
        self.publish(&conn)?;
        Ok(true)
    }

    async fn delete_by_remote_id(&self, remote_id: &str) -> AppResult<bool> {
        let conn = self.lock()?;
        let rows_affected = conn.execute(
            "DELETE FROM subscriptions WHERE remote_id = ?1",
            params![remote_id],
        )?;

        if rows_affected > 0 {
            self.publish(&conn)?;
        }
        Ok(rows_affected > 0)
    }

    async fn delete_all(&self) -> AppResult<()> {
        let conn = self.lock()?;
        conn.execute("DELETE FROM subscriptions", [])?;
        self.publish(&conn)
    }

    async fn replace_all(&self, entities: &[SubscriptionEntity]) -> AppResult<()> {
        let conn = self.lock()?;
        let tx = conn.unchecked_transaction()?;
        tx.execute("DELETE FROM subscriptions", [])?;
        for entity in entities {
            upsert_row(&tx, entity)?;
        }
        tx.commit()?;

        log::debug!("ローカルストアを全件置き換えました: count={}", entities.len());
        self.publish(&conn)
    }

    async fn list_unsynced(&self) -> AppResult<Vec<SubscriptionEntity>> {
        let conn = self.lock()?;
        let sql = format!(
            "SELECT {} FROM subscriptions WHERE sync_status != 'synced' ORDER BY local_id",
            SubscriptionEntity::COLUMNS
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map([], SubscriptionEntity::from_row)?;
        rows.collect::<Result<Vec<_>, _>>().map_err(AppError::from)
    }
}
