// 機能モジュール
pub mod features;
pub mod shared;

use features::subscriptions::{
    spawn_reconciliation_worker, HttpSubscriptionApi, MockSubscriptionService,
    SqliteSubscriptionStore, SubscriptionApi, SubscriptionRepository, SubscriptionService,
};
use log::info;
use shared::api_client::{ApiClient, ApiClientConfig};
use shared::config::{
    initialize_application, initialize_logging_system, load_environment_variables,
    log_initialization_complete, ApiConfig, InitializationResult, SyncConfig,
};
use shared::database::initialize_database;
use shared::errors::{AppError, AppResult};
use std::sync::{Arc, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// アプリケーション状態（サービスとバックグラウンドワーカーを保持）
pub struct AppState {
    pub subscription_service: SubscriptionService,
    pub initialization: InitializationResult,
    shutdown_token: CancellationToken,
    worker: Option<JoinHandle<()>>,
}

impl AppState {
    /// 再同期ワーカーを起動する（起動済みの場合は何もしない）
    pub fn start_worker(&mut self, sync_config: &SyncConfig) {
        if self.worker.is_some() {
            return;
        }
        self.worker = Some(spawn_reconciliation_worker(
            self.subscription_service.repository().clone(),
            sync_config.reconcile_interval,
            self.shutdown_token.clone(),
        ));
    }

    /// ワーカーを停止し、終了を待つ
    pub async fn shutdown(mut self) {
        self.shutdown_token.cancel();
        if let Some(worker) = self.worker.take() {
            if let Err(e) = worker.await {
                log::error!("再同期ワーカーの終了待ちに失敗しました: {e}");
            }
        }
        info!("アプリケーションを終了しました");
    }
}

/// API設定に応じてリモートストアを作成する
///
/// # 戻り値
/// ベースURLが未設定ならサンプルデータ入りのモック、設定済みならHTTP実装
pub fn build_remote_store(
    api_config: &ApiConfig,
    sync_config: &SyncConfig,
) -> AppResult<Arc<dyn SubscriptionApi>> {
    if api_config.uses_mock() {
        info!("モックのリモートストアを使用します: latency={:?}", sync_config.mock_latency);
        return Ok(Arc::new(MockSubscriptionService::with_sample_data(
            sync_config.mock_latency,
        )));
    }

    api_config.validate().map_err(AppError::configuration)?;
    let client = ApiClient::new_with_config(ApiClientConfig::from_api_config(api_config)?)?;
    Ok(Arc::new(HttpSubscriptionApi::new(client)))
}

/// 初期化結果と設定からアプリケーション状態を構築する
///
/// ワーカーは起動しない（`AppState::start_worker` で起動する）。
pub fn build_app_state(
    initialization: InitializationResult,
    api_config: &ApiConfig,
    sync_config: &SyncConfig,
) -> AppResult<AppState> {
    let db_conn = initialize_database(&initialization.database_path)?;
    let local = Arc::new(SqliteSubscriptionStore::new(Arc::new(Mutex::new(db_conn)))?);
    let remote = build_remote_store(api_config, sync_config)?;

    let repository = SubscriptionRepository::new(local, remote);
    Ok(AppState {
        subscription_service: SubscriptionService::new(repository),
        initialization,
        shutdown_token: CancellationToken::new(),
        worker: None,
    })
}

/// アプリケーションを起動する
///
/// # 処理内容
/// 1. 環境変数の読み込みとログシステムの初期化
/// 2. データディレクトリとデータベースの初期化
/// 3. 起動時の同期（失敗しても起動は続行）
/// 4. 再同期ワーカーの起動
pub async fn run() -> AppResult<AppState> {
    load_environment_variables();
    initialize_logging_system();

    info!("アプリケーション初期化を開始します...");

    let initialization = initialize_application()?;
    let api_config = ApiConfig::from_env();
    let sync_config = SyncConfig::from_env();

    let mut state = build_app_state(initialization, &api_config, &sync_config)?;
    log_initialization_complete(&state.initialization);

    state.subscription_service.initial_sync().await;
    state.start_worker(&sync_config);

    Ok(state)
}
