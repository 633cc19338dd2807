/// サブスクリプション機能モジュール
///
/// このモジュールは、サブスクリプション管理に関連する機能を提供します：
/// - ドメインモデルと次回請求日の算出
/// - ローカルストア（SQLite）とリモートストア（モック / HTTP）
/// - ローカル優先の書き込みとリモートとの調停
/// - 未同期データの定期的な再同期
pub mod dto;
pub mod entity;
pub mod local_store;
pub mod mapper;
pub mod models;
pub mod reconciler;
pub mod remote;
pub mod repository;
pub mod service;

// 公開インターフェース
pub use dto::{SubscriptionDto, SubscriptionListResponse};
pub use entity::{SubscriptionEntity, SyncStatus};
pub use local_store::{SqliteSubscriptionStore, SubscriptionLocalStore};
pub use models::{
    calculate_monthly_total, calculate_total_cost, derive_next_billing_date, BillingCycle,
    Subscription, SubscriptionDraft, DEFAULT_CURRENCY,
};
pub use reconciler::spawn_reconciliation_worker;
pub use remote::{HttpSubscriptionApi, MockSubscriptionService, SubscriptionApi};
pub use repository::{ReconciliationReport, SubscriptionRepository};
pub use service::{SubscriptionService, SubscriptionSummary};
