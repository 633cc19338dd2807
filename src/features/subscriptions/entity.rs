use rusqlite::types::{FromSql, FromSqlError, FromSqlResult, ToSql, ToSqlOutput, ValueRef};
use rusqlite::Row;

/// ローカルレコードとリモートの同期状態
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SyncStatus {
    /// リモートと一致している
    Synced,
    /// リモート作成が未完了
    PendingCreate,
    /// リモート更新が未完了
    PendingUpdate,
    /// ローカル削除済みでリモート削除が未完了（一覧には表示しない）
    PendingDelete,
}

impl SyncStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncStatus::Synced => "synced",
            SyncStatus::PendingCreate => "pending_create",
            SyncStatus::PendingUpdate => "pending_update",
            SyncStatus::PendingDelete => "pending_delete",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "synced" => Some(SyncStatus::Synced),
            "pending_create" => Some(SyncStatus::PendingCreate),
            "pending_update" => Some(SyncStatus::PendingUpdate),
            "pending_delete" => Some(SyncStatus::PendingDelete),
            _ => None,
        }
    }

    /// ローカル更新後の状態を決める
    ///
    /// リモート未作成のレコードは更新されても作成待ちのまま。
    pub fn after_local_update(self) -> Self {
        match self {
            SyncStatus::PendingCreate => SyncStatus::PendingCreate,
            _ => SyncStatus::PendingUpdate,
        }
    }
}

impl ToSql for SyncStatus {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(ToSqlOutput::from(self.as_str()))
    }
}

impl FromSql for SyncStatus {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        let text = value.as_str()?;
        SyncStatus::parse(text).ok_or_else(|| FromSqlError::Other(format!("不明な同期状態: {text}").into()))
    }
}

/// subscriptionsテーブルの1行
#[derive(Debug, Clone, PartialEq)]
pub struct SubscriptionEntity {
    /// ストレージ内部の自動採番ID（未挿入の場合は0）
    pub local_id: i64,
    /// ローカルとリモートで共有する識別子
    pub remote_id: String,
    pub name: String,
    pub cost: f64,
    pub cycle: String,
    /// UTC午前0時のエポックミリ秒
    pub first_billing_date: i64,
    pub currency: String,
    pub is_active: bool,
    pub sync_status: SyncStatus,
}

impl SubscriptionEntity {
    /// SELECT文のカラム順
    pub const COLUMNS: &'static str =
        "local_id, remote_id, name, cost, cycle, first_billing_date, currency, is_active, sync_status";

    /// 行データからエンティティを作成する（カラム順は `COLUMNS` に従う）
    pub fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            local_id: row.get(0)?,
            remote_id: row.get(1)?,
            name: row.get(2)?,
            cost: row.get(3)?,
            cycle: row.get(4)?,
            first_billing_date: row.get(5)?,
            currency: row.get(6)?,
            is_active: row.get::<_, i64>(7)? != 0,
            sync_status: row.get(8)?,
        })
    }

    /// 一覧に表示されるレコードかどうか
    pub fn is_visible(&self) -> bool {
        self.sync_status != SyncStatus::PendingDelete
    }

    /// 識別子と同期状態を除いた内容が一致するかどうか
    pub fn has_same_content(&self, other: &SubscriptionEntity) -> bool {
        self.name == other.name
            && self.cost == other.cost
            && self.cycle == other.cycle
            && self.first_billing_date == other.first_billing_date
            && self.currency == other.currency
            && self.is_active == other.is_active
    }
}
