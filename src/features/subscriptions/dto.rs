use super::models::DEFAULT_CURRENCY;
use serde::{Deserialize, Serialize};

/// サーバーと送受信するサブスクリプションのDTO
///
/// 日付はUTC午前0時のエポックミリ秒、請求サイクルは自由形式の文字列。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubscriptionDto {
    /// サーバー採番のID（新規作成リクエストではNoneの場合がある）
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub name: String,
    pub cost: f64,
    #[serde(rename = "billing_cycle")]
    pub cycle: String,
    pub first_billing_date: i64,
    #[serde(default = "default_currency")]
    pub currency: String,
    #[serde(default = "default_is_active")]
    pub is_active: bool,
}

fn default_currency() -> String {
    DEFAULT_CURRENCY.to_string()
}

fn default_is_active() -> bool {
    true
}

/// 一覧取得APIのレスポンス
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubscriptionListResponse {
    pub subscriptions: Vec<SubscriptionDto>,
    pub total_count: usize,
}
