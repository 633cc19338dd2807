use crate::shared::config::{get_database_filename, get_environment, Environment};
use crate::shared::errors::{AppError, AppResult};
use std::fs;
use std::path::{Path, PathBuf};

/// アプリケーションディレクトリ名（dirs::data_dir()配下）
const APP_DIR_NAME: &str = "subscription-manager";

/// アプリケーション初期化の結果を表す構造体
#[derive(Debug)]
pub struct InitializationResult {
    /// 初回起動かどうか
    pub is_first_run: bool,
    /// アプリケーションデータディレクトリのパス
    pub app_data_dir: PathBuf,
    /// データベースファイルのパス
    pub database_path: PathBuf,
    /// 実行環境
    pub environment: Environment,
}

/// アプリケーションの初期化を実行する
///
/// # 処理内容
/// 1. アプリケーションデータディレクトリの決定と作成
/// 2. 初回起動の判定（データベースファイルの存在で判定）
pub fn initialize_application() -> AppResult<InitializationResult> {
    let app_data_dir = resolve_app_data_dir()?;
    initialize_in_directory(&app_data_dir)
}

/// 指定ディレクトリを基点に初期化を実行する
pub fn initialize_in_directory(app_data_dir: &Path) -> AppResult<InitializationResult> {
    let environment = get_environment();

    ensure_directory(app_data_dir)?;

    let database_path = app_data_dir.join(get_database_filename(environment.clone()));
    let is_first_run = !database_path.exists();

    if is_first_run {
        log_first_run_initialization(&environment, app_data_dir, &database_path);
    }

    Ok(InitializationResult {
        is_first_run,
        app_data_dir: app_data_dir.to_path_buf(),
        database_path,
        environment,
    })
}

/// アプリケーションデータディレクトリを決定する
///
/// APP_DATA_DIRが設定されていればそれを優先し、
/// なければOS標準のデータディレクトリ配下を使用する。
fn resolve_app_data_dir() -> AppResult<PathBuf> {
    if let Some(dir) = crate::get_env_var_optional!("APP_DATA_DIR") {
        return Ok(PathBuf::from(dir));
    }

    dirs::data_dir()
        .map(|dir| dir.join(APP_DIR_NAME))
        .ok_or_else(|| AppError::configuration("アプリデータディレクトリの取得に失敗しました"))
}

fn ensure_directory(dir: &Path) -> AppResult<()> {
    if !dir.exists() {
        fs::create_dir_all(dir).map_err(|e| {
            AppError::configuration(format!("アプリデータディレクトリの作成に失敗: {e}"))
        })?;
        log::info!("アプリケーションデータディレクトリを作成しました: {dir:?}");
    }
    Ok(())
}

fn log_first_run_initialization(environment: &Environment, app_data_dir: &Path, database_path: &Path) {
    log::info!("=== アプリケーション初回起動 ===");
    log::info!("実行環境: {environment:?}");
    log::info!("アプリデータディレクトリ: {app_data_dir:?}");
    log::info!("データベースファイル: {database_path:?}");
}

/// 初期化完了ログを出力する
pub fn log_initialization_complete(result: &InitializationResult) {
    if result.is_first_run {
        log::info!("=== 初期化完了 ===");
        log::info!("初回起動の初期化が正常に完了しました");
    } else {
        log::info!("アプリケーション起動完了（既存データベースを使用）");
    }
    log::info!("環境: {:?}", result.environment);
    log::info!("データベース: {:?}", result.database_path);
}
