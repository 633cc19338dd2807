use super::models::{calculate_monthly_total, calculate_total_cost, Subscription, SubscriptionDraft};
use super::repository::{ReconciliationReport, SubscriptionRepository};
use crate::shared::errors::AppResult;
use futures::stream::BoxStream;
use log::{info, warn};
use serde::Serialize;
use tokio_stream::StreamExt;

/// 一覧画面に表示する集計済みの状態
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SubscriptionSummary {
    pub subscriptions: Vec<Subscription>,
    /// 請求サイクルを考慮しない金額の合計
    pub total_cost: f64,
    /// アクティブなサブスクリプションの月額換算合計
    pub monthly_total: f64,
}

impl SubscriptionSummary {
    pub fn from_subscriptions(subscriptions: Vec<Subscription>) -> Self {
        let total_cost = calculate_total_cost(&subscriptions);
        let monthly_total = calculate_monthly_total(&subscriptions);
        Self {
            subscriptions,
            total_cost,
            monthly_total,
        }
    }
}

/// サブスクリプションのユースケース
///
/// 入力の検証を行い、リポジトリへ委譲する。
#[derive(Clone)]
pub struct SubscriptionService {
    repository: SubscriptionRepository,
}

impl SubscriptionService {
    pub fn new(repository: SubscriptionRepository) -> Self {
        Self { repository }
    }

    pub fn repository(&self) -> &SubscriptionRepository {
        &self.repository
    }

    /// 一覧と合計金額を監視する
    pub fn observe_summary(&self) -> BoxStream<'static, SubscriptionSummary> {
        Box::pin(
            self.repository
                .observe_all()
                .map(SubscriptionSummary::from_subscriptions),
        )
    }

    /// 入力フォームの内容からサブスクリプションを追加する
    ///
    /// # 引数
    /// * `draft` - 入力内容（金額は文字列）
    ///
    /// # 戻り値
    /// リモートで確定したサブスクリプション
    pub async fn add_subscription(&self, draft: SubscriptionDraft) -> AppResult<Subscription> {
        let subscription = draft.into_subscription()?;
        self.repository.add(&subscription).await
    }

    pub async fn update_subscription(&self, subscription: &Subscription) -> AppResult<()> {
        subscription.validate()?;
        self.repository.update(subscription).await
    }

    pub async fn delete_subscription(&self, id: &str) -> AppResult<()> {
        self.repository.delete(id).await
    }

    pub async fn get_subscription(&self, id: &str) -> AppResult<Option<Subscription>> {
        self.repository.get_by_id(id).await
    }

    pub async fn refresh_subscriptions(&self) -> AppResult<()> {
        self.repository.refresh().await
    }

    /// 起動時の同期
    ///
    /// 失敗しても警告ログのみで、ローカルの一覧をそのまま表示する。
    pub async fn initial_sync(&self) -> Option<ReconciliationReport> {
        match self.repository.synchronize().await {
            Ok(report) => {
                info!("起動時の同期が完了しました: {report:?}");
                Some(report)
            }
            Err(e) => {
                warn!("起動時の同期に失敗しました。ローカルデータを表示します: {e}");
                None
            }
        }
    }
}
