/// 環境変数と実行環境の管理
pub mod environment;

/// アプリケーションデータディレクトリの初期化
pub mod initialization;

pub use environment::{
    get_database_filename, get_environment, initialize_logging_system,
    load_environment_variables, ApiConfig, EnvVarError, Environment, EnvironmentConfig,
    SyncConfig,
};
pub use initialization::{
    initialize_application, initialize_in_directory, log_initialization_complete,
    InitializationResult,
};
