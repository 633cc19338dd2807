/// 機能別モジュール
///
/// 各機能モジュールは、その機能に関連するモデル・永続化・通信・サービスを含む。
pub mod subscriptions;
