use super::dto::{SubscriptionDto, SubscriptionListResponse};
use crate::shared::api_client::ApiClient;
use crate::shared::errors::{AppError, AppResult};
use crate::shared::utils::to_epoch_millis;
use async_trait::async_trait;
use chrono::NaiveDate;
use log::{debug, info};
use std::time::Duration;
use tokio::sync::Mutex;

/// リモートストアのインターフェース
///
/// 失敗は実装側で一度だけAppErrorに分類される。
#[async_trait]
pub trait SubscriptionApi: Send + Sync {
    async fn get_all(&self) -> AppResult<Vec<SubscriptionDto>>;

    /// レコードを作成する
    ///
    /// # 戻り値
    /// サーバーで保存されたレコード（IDは必ずSome）
    async fn create(&self, dto: &SubscriptionDto) -> AppResult<SubscriptionDto>;

    /// 指定IDのレコードを置き換える（IDはパスのものを使う）
    async fn update(&self, id: &str, dto: &SubscriptionDto) -> AppResult<SubscriptionDto>;

    async fn delete(&self, id: &str) -> AppResult<()>;
}

#[derive(Default)]
struct MockState {
    records: Vec<SubscriptionDto>,
    next_id: u64,
    injected_failure: Option<AppError>,
}

impl MockState {
    fn assign_id(&mut self) -> String {
        self.next_id += 1;
        format!("srv-{}", self.next_id)
    }

    fn take_failure(&mut self) -> AppResult<()> {
        match self.injected_failure.take() {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }
}

/// メモリ上でレコードを管理するモックサービス
///
/// IDが指定されていない作成リクエストには `srv-{連番}` を採番する。
/// 遅延はすべての操作の前に挿入される。
pub struct MockSubscriptionService {
    state: Mutex<MockState>,
    latency: Duration,
}

impl MockSubscriptionService {
    /// 空のモックサービスを作成する
    ///
    /// # 引数
    /// * `latency` - 擬似的なネットワーク遅延（テストではゼロ）
    pub fn new(latency: Duration) -> Self {
        Self {
            state: Mutex::new(MockState::default()),
            latency,
        }
    }

    /// 初期レコードを持つモックサービスを作成する
    ///
    /// IDを持たないレコードには採番する。
    pub fn with_records(latency: Duration, records: Vec<SubscriptionDto>) -> Self {
        let mut state = MockState::default();
        for mut record in records {
            if record.id.is_none() {
                record.id = Some(state.assign_id());
            }
            state.records.push(record);
        }

        Self {
            state: Mutex::new(state),
            latency,
        }
    }

    /// 動作確認用のサンプルデータを持つモックサービスを作成する
    pub fn with_sample_data(latency: Duration) -> Self {
        let sample = |name: &str, cost: f64, cycle: &str, date: Option<NaiveDate>| SubscriptionDto {
            id: None,
            name: name.to_string(),
            cost,
            cycle: cycle.to_string(),
            first_billing_date: date.map(to_epoch_millis).unwrap_or_default(),
            currency: "KRW".to_string(),
            is_active: true,
        };

        Self::with_records(
            latency,
            vec![
                sample("Netflix", 13500.0, "Monthly", NaiveDate::from_ymd_opt(2023, 3, 29)),
                sample("Spotify", 10900.0, "Monthly", NaiveDate::from_ymd_opt(2024, 11, 10)),
                sample("Adobe CC", 62000.0, "Yearly", NaiveDate::from_ymd_opt(2025, 10, 1)),
            ],
        )
    }

    /// 次の1回の操作を指定エラーで失敗させる
    pub async fn fail_next(&self, error: AppError) {
        self.state.lock().await.injected_failure = Some(error);
    }

    /// 現在保持しているレコードの複製
    pub async fn snapshot(&self) -> Vec<SubscriptionDto> {
        self.state.lock().await.records.clone()
    }

    async fn simulate_latency(&self) {
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
    }
}

#[async_trait]
impl SubscriptionApi for MockSubscriptionService {
    async fn get_all(&self) -> AppResult<Vec<SubscriptionDto>> {
        self.simulate_latency().await;
        let mut state = self.state.lock().await;
        state.take_failure()?;
        Ok(state.records.clone())
    }

    async fn create(&self, dto: &SubscriptionDto) -> AppResult<SubscriptionDto> {
        self.simulate_latency().await;
        let mut state = self.state.lock().await;
        state.take_failure()?;

        let id = match &dto.id {
            Some(id) => id.clone(),
            None => state.assign_id(),
        };

        if state.records.iter().any(|record| record.id.as_deref() == Some(id.as_str())) {
            return Err(AppError::conflict(format!(
                "ID {id} のサブスクリプションは既に存在します"
            )));
        }

        let created = SubscriptionDto {
            id: Some(id),
            ..dto.clone()
        };
        state.records.push(created.clone());
        debug!("モック: サブスクリプションを作成しました: id={:?}", created.id);
        Ok(created)
    }

    async fn update(&self, id: &str, dto: &SubscriptionDto) -> AppResult<SubscriptionDto> {
        self.simulate_latency().await;
        let mut state = self.state.lock().await;
        state.take_failure()?;

        let record = state
            .records
            .iter_mut()
            .find(|record| record.id.as_deref() == Some(id))
            .ok_or_else(|| AppError::NotFound(format!("更新対象のID {id} が見つかりません")))?;

        *record = SubscriptionDto {
            id: Some(id.to_string()),
            ..dto.clone()
        };
        Ok(record.clone())
    }

    async fn delete(&self, id: &str) -> AppResult<()> {
        self.simulate_latency().await;
        let mut state = self.state.lock().await;
        state.take_failure()?;

        let before = state.records.len();
        state.records.retain(|record| record.id.as_deref() != Some(id));
        if state.records.len() == before {
            return Err(AppError::NotFound(format!("削除対象のID {id} が見つかりません")));
        }
        Ok(())
    }
}

/// APIサーバーと通信するリモートストア
pub struct HttpSubscriptionApi {
    client: ApiClient,
}

impl HttpSubscriptionApi {
    pub fn new(client: ApiClient) -> Self {
        Self { client }
    }

    fn item_endpoint(id: &str) -> String {
        format!("/subscriptions/{}", urlencoding::encode(id))
    }
}

#[async_trait]
impl SubscriptionApi for HttpSubscriptionApi {
    async fn get_all(&self) -> AppResult<Vec<SubscriptionDto>> {
        let response: SubscriptionListResponse = self.client.get("/subscriptions").await?;
        info!(
            "サブスクリプション一覧を取得しました: count={}, total_count={}",
            response.subscriptions.len(),
            response.total_count
        );
        Ok(response.subscriptions)
    }

    async fn create(&self, dto: &SubscriptionDto) -> AppResult<SubscriptionDto> {
        let created: SubscriptionDto = self.client.post("/subscriptions", dto).await?;
        if created.id.is_none() {
            return Err(AppError::unknown("作成レスポンスにIDが含まれていません"));
        }
        Ok(created)
    }

    async fn update(&self, id: &str, dto: &SubscriptionDto) -> AppResult<SubscriptionDto> {
        self.client.put(&Self::item_endpoint(id), dto).await
    }

    async fn delete(&self, id: &str) -> AppResult<()> {
        self.client.delete(&Self::item_endpoint(id)).await
    }
}
