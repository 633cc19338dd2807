use thiserror::Error;

/// アプリケーション全体で使用される統一エラー型
///
/// リモート境界で発生したエラーは境界で一度だけ分類され、
/// 以降は変換されずに呼び出し元まで伝播される。
#[derive(Debug, Error)]
pub enum AppError {
    /// リモート認証の失敗（401）
    #[error("認証エラー: {0}")]
    Unauthorized(String),

    /// リモートサーバーの5xx系エラー
    #[error("サーバーエラー: {0}")]
    ServerError(String),

    /// リモート境界で発生したその他のエラー
    #[error("不明なエラー: {0}")]
    UnknownError(String),

    /// 更新・削除対象が見つからない場合のエラー
    #[error("リソースが見つかりません: {0}")]
    NotFound(String),

    /// バリデーション関連のエラー
    #[error("バリデーションエラー: {0}")]
    Validation(String),

    /// 識別子の重複
    #[error("競合エラー: {0}")]
    Conflict(String),

    /// データベース関連のエラー
    #[error("データベースエラー: {0}")]
    Database(String),

    /// 設定関連のエラー
    #[error("設定エラー: {0}")]
    Configuration(String),

    /// I/O関連のエラー
    #[error("I/Oエラー: {0}")]
    Io(#[from] std::io::Error),

    /// JSON解析エラー
    #[error("JSON解析エラー: {0}")]
    Json(#[from] serde_json::Error),

    /// 並行処理関連のエラー
    #[error("並行処理エラー: {0}")]
    Concurrency(String),
}

/// エラーの重要度を表す列挙型
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorSeverity {
    /// 低重要度（ユーザー入力エラーなど）
    Low,
    /// 中重要度（外部サービス一時的エラーなど）
    Medium,
    /// 高重要度（データベースエラーなど）
    High,
    /// 最重要（認証エラーなど）
    Critical,
}

impl ErrorSeverity {
    /// 重要度に対応するログレベル
    pub fn log_level(self) -> log::Level {
        match self {
            ErrorSeverity::Low => log::Level::Info,
            ErrorSeverity::Medium => log::Level::Warn,
            ErrorSeverity::High | ErrorSeverity::Critical => log::Level::Error,
        }
    }
}

impl AppError {
    /// ユーザーに表示するためのフレンドリーなメッセージを取得
    ///
    /// # 戻り値
    /// ユーザーに表示可能なエラーメッセージ
    pub fn user_message(&self) -> &str {
        match self {
            AppError::Unauthorized(_) => "認証に失敗しました。再度ログインしてください",
            AppError::ServerError(_) => "サーバーでエラーが発生しました",
            AppError::UnknownError(_) => "通信中に不明なエラーが発生しました",
            AppError::NotFound(msg) => msg,
            AppError::Validation(msg) => msg,
            AppError::Conflict(msg) => msg,
            AppError::Database(_) => "データベース操作でエラーが発生しました",
            AppError::Configuration(_) => "設定エラーが発生しました",
            AppError::Io(_) => "ファイル操作でエラーが発生しました",
            AppError::Json(_) => "データ形式の解析でエラーが発生しました",
            AppError::Concurrency(_) => "並行処理でエラーが発生しました",
        }
    }

    /// エラーの詳細情報を取得
    ///
    /// # 戻り値
    /// エラーの詳細情報（ログ出力用）
    pub fn details(&self) -> String {
        format!("{self}")
    }

    /// エラーの重要度を取得
    ///
    /// # 戻り値
    /// エラーの重要度レベル
    pub fn severity(&self) -> ErrorSeverity {
        match self {
            AppError::Unauthorized(_) => ErrorSeverity::Critical,
            AppError::ServerError(_) => ErrorSeverity::Medium,
            AppError::UnknownError(_) => ErrorSeverity::Medium,
            AppError::NotFound(_) => ErrorSeverity::Low,
            AppError::Validation(_) => ErrorSeverity::Low,
            AppError::Conflict(_) => ErrorSeverity::Low,
            AppError::Database(_) => ErrorSeverity::High,
            AppError::Configuration(_) => ErrorSeverity::High,
            AppError::Io(_) => ErrorSeverity::Medium,
            AppError::Json(_) => ErrorSeverity::Medium,
            AppError::Concurrency(_) => ErrorSeverity::High,
        }
    }

    /// リモート境界で分類されたエラーかどうか
    pub fn is_remote(&self) -> bool {
        matches!(
            self,
            AppError::Unauthorized(_)
                | AppError::ServerError(_)
                | AppError::UnknownError(_)
                | AppError::Conflict(_)
        )
    }

    /// バリデーションエラーを作成するヘルパー関数
    pub fn validation<S: Into<String>>(message: S) -> Self {
        AppError::Validation(message.into())
    }

    /// リソース未発見エラーを作成するヘルパー関数
    ///
    /// # 引数
    /// * `resource` - 見つからなかったリソース名
    pub fn not_found<S: Into<String>>(resource: S) -> Self {
        AppError::NotFound(format!("{}が見つかりません", resource.into()))
    }

    /// 競合エラーを作成するヘルパー関数
    pub fn conflict<S: Into<String>>(message: S) -> Self {
        AppError::Conflict(message.into())
    }

    /// 認証エラーを作成するヘルパー関数
    pub fn unauthorized<S: Into<String>>(message: S) -> Self {
        AppError::Unauthorized(message.into())
    }

    /// サーバーエラーを作成するヘルパー関数
    pub fn server_error<S: Into<String>>(message: S) -> Self {
        AppError::ServerError(message.into())
    }

    /// 不明なエラーを作成するヘルパー関数
    pub fn unknown<S: Into<String>>(message: S) -> Self {
        AppError::UnknownError(message.into())
    }

    /// 設定エラーを作成するヘルパー関数
    pub fn configuration<S: Into<String>>(message: S) -> Self {
        AppError::Configuration(message.into())
    }

    /// 並行処理エラーを作成するヘルパー関数
    pub fn concurrency<S: Into<String>>(message: S) -> Self {
        AppError::Concurrency(message.into())
    }
}

/// AppErrorからStringへの変換（呼び出し元へのメッセージ表示用）
impl From<AppError> for String {
    fn from(error: AppError) -> Self {
        error.user_message().to_string()
    }
}

/// rusqlite::ErrorからAppErrorへの変換
impl From<rusqlite::Error> for AppError {
    fn from(error: rusqlite::Error) -> Self {
        AppError::Database(error.to_string())
    }
}

/// Result型のエイリアス（アプリケーション全体で使用）
pub type AppResult<T> = Result<T, AppError>;
