use crate::shared::errors::AppResult;
use rusqlite::Connection;
use std::path::Path;
use std::time::Duration;

/// データベース接続を開き、テーブルを作成する
///
/// # 引数
/// * `database_path` - データベースファイルのパス
///
/// # 戻り値
/// データベース接続、または失敗時はエラー
pub fn initialize_database(database_path: &Path) -> AppResult<Connection> {
    let conn = Connection::open(database_path)?;

    configure_connection(&conn)?;
    create_tables(&conn)?;

    log::info!("データベースを初期化しました: {database_path:?}");

    Ok(conn)
}

/// テスト用のインメモリデータベース接続を作成する
pub fn create_in_memory_connection() -> AppResult<Connection> {
    let conn = Connection::open_in_memory()?;
    configure_connection(&conn)?;
    create_tables(&conn)?;
    Ok(conn)
}

/// 接続単位の設定を行う
fn configure_connection(conn: &Connection) -> AppResult<()> {
    conn.busy_timeout(Duration::from_secs(5))?;
    Ok(())
}

/// データベーステーブルを作成する
///
/// 何度呼び出しても既存データは保持される。
pub fn create_tables(conn: &Connection) -> AppResult<()> {
    create_subscriptions_table(conn)?;
    Ok(())
}

/// サブスクリプションテーブルを作成する
///
/// `local_id` はストレージ内部の行ID、`remote_id` はローカルとリモートで共有する識別子。
fn create_subscriptions_table(conn: &Connection) -> AppResult<()> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS subscriptions (
            local_id INTEGER PRIMARY KEY AUTOINCREMENT,
            remote_id TEXT NOT NULL UNIQUE,
            name TEXT NOT NULL,
            cost REAL NOT NULL,
            cycle TEXT NOT NULL,
            first_billing_date INTEGER NOT NULL,
            currency TEXT NOT NULL DEFAULT 'KRW',
            is_active INTEGER NOT NULL DEFAULT 1,
            sync_status TEXT NOT NULL DEFAULT 'synced'
                CHECK(sync_status IN ('synced', 'pending_create', 'pending_update', 'pending_delete'))
        )",
        [],
    )?;

    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_subscriptions_sync_status ON subscriptions(sync_status)",
        [],
    )?;

    Ok(())
}
