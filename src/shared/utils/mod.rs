/// エポックミリ秒と日付の相互変換
pub mod date_converter;

/// 一時ID・クライアントIDの生成
pub mod id_generator;

pub use date_converter::{from_epoch_millis, to_epoch_millis};
pub use id_generator::{generate_client_id, generate_temporary_id, is_temporary_id};
