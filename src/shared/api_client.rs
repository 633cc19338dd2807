/// 汎用APIクライアント
///
/// APIサーバーとのJSON通信を行う。2xx以外の応答は境界で一度だけ
/// AppErrorに分類され、上位層へはそのまま伝播される。
use crate::shared::config::ApiConfig;
use crate::shared::errors::{AppError, AppResult};
use log::{debug, error, info, warn};
use reqwest::{Client, RequestBuilder, Response};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::time::Duration;

/// APIクライアント設定
#[derive(Debug, Clone)]
pub struct ApiClientConfig {
    pub base_url: String,
    pub auth_token: Option<String>,
    pub timeout_seconds: u64,
    pub max_retries: u32,
}

impl ApiClientConfig {
    /// API設定からクライアント設定を作成する
    ///
    /// ベースURLが未設定の場合は設定エラー。
    pub fn from_api_config(api_config: &ApiConfig) -> AppResult<Self> {
        let base_url = api_config
            .base_url
            .clone()
            .ok_or_else(|| AppError::configuration("APIサーバーのベースURLが設定されていません"))?;

        Ok(Self {
            base_url,
            auth_token: api_config.auth_token.clone(),
            timeout_seconds: api_config.timeout_seconds,
            max_retries: api_config.max_retries,
        })
    }
}

/// APIサーバーからのエラーレスポンス
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: ErrorDetail,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorDetail {
    pub code: String,
    pub message: String,
}

/// HTTPステータスコードをAppErrorに分類する
///
/// # 分類
/// - 401 → Unauthorized
/// - 404 → NotFound
/// - 409 → Conflict
/// - 5xx → ServerError
/// - その他 → UnknownError
pub fn classify_status(status_code: u16, message: &str) -> AppError {
    match status_code {
        401 => AppError::unauthorized(format!("認証トークンが無効です (401): {message}")),
        404 => AppError::NotFound(format!("指定されたリソースが見つかりません (404): {message}")),
        409 => AppError::conflict(format!("リソースが既に存在します (409): {message}")),
        500..=599 => AppError::server_error(format!("サーバー内部エラー ({status_code}): {message}")),
        _ => AppError::unknown(format!("APIリクエストが失敗しました ({status_code}): {message}")),
    }
}

/// 汎用APIクライアント
pub struct ApiClient {
    client: Client,
    config: ApiClientConfig,
}

impl ApiClient {
    /// 設定を指定してAPIクライアントを作成
    pub fn new_with_config(config: ApiClientConfig) -> AppResult<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_seconds))
            .build()
            .map_err(|e| AppError::configuration(format!("HTTPクライアント初期化失敗: {e}")))?;

        Ok(Self { client, config })
    }

    fn url(&self, endpoint: &str) -> String {
        format!("{}{endpoint}", self.config.base_url)
    }

    fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.config.auth_token {
            Some(token) => request.header("Authorization", format!("Bearer {token}")),
            None => request,
        }
    }

    /// GETリクエストを送信
    pub async fn get<T>(&self, endpoint: &str) -> AppResult<T>
    where
        T: DeserializeOwned,
    {
        info!("GETリクエスト送信: endpoint={endpoint}");
        let request = self.authorize(self.client.get(self.url(endpoint)));
        let response = self.send_with_retry(request, "GET", endpoint).await?;
        Self::parse_json(response).await
    }

    /// POSTリクエストを送信
    pub async fn post<B, T>(&self, endpoint: &str, body: &B) -> AppResult<T>
    where
        B: Serialize,
        T: DeserializeOwned,
    {
        info!("POSTリクエスト送信: endpoint={endpoint}");
        let request = self.authorize(self.client.post(self.url(endpoint)).json(body));
        let response = self.send_with_retry(request, "POST", endpoint).await?;
        Self::parse_json(response).await
    }

    /// PUTリクエストを送信
    pub async fn put<B, T>(&self, endpoint: &str, body: &B) -> AppResult<T>
    where
        B: Serialize,
        T: DeserializeOwned,
    {
        info!("PUTリクエスト送信: endpoint={endpoint}");
        let request = self.authorize(self.client.put(self.url(endpoint)).json(body));
        let response = self.send_with_retry(request, "PUT", endpoint).await?;
        Self::parse_json(response).await
    }

    /// DELETEリクエストを送信（レスポンスボディは読まない）
    pub async fn delete(&self, endpoint: &str) -> AppResult<()> {
        info!("DELETEリクエスト送信: endpoint={endpoint}");
        let request = self.authorize(self.client.delete(self.url(endpoint)));
        self.send_with_retry(request, "DELETE", endpoint).await?;
        Ok(())
    }

    async fn parse_json<T: DeserializeOwned>(response: Response) -> AppResult<T> {
        let body = response
            .text()
            .await
            .map_err(|e| AppError::unknown(format!("レスポンス読み込みエラー: {e}")))?;
        decode_body(&body)
    }

    /// リトライ機能付きでリクエストを送信
    ///
    /// 接続失敗のみ指数バックオフでリトライする。
    /// HTTPエラー応答はリトライせずに分類して返す。
    async fn send_with_retry(
        &self,
        request: RequestBuilder,
        method: &str,
        endpoint: &str,
    ) -> AppResult<Response> {
        let mut attempts = 0;
        loop {
            let Some(cloned_request) = request.try_clone() else {
                return Err(AppError::unknown("リクエストのクローンに失敗しました"));
            };

            match cloned_request.send().await {
                Ok(response) if response.status().is_success() => {
                    info!("{method}リクエスト成功: endpoint={endpoint}");
                    return Ok(response);
                }
                Ok(response) => return Err(Self::handle_error_response(response).await),
                Err(e) => {
                    if attempts < self.config.max_retries {
                        attempts += 1;
                        let delay = Duration::from_secs(2_u64.pow(attempts));
                        warn!(
                            "APIリクエスト失敗、リトライします: attempt={attempts}/{}, delay={delay:?}",
                            self.config.max_retries
                        );
                        tokio::time::sleep(delay).await;
                        continue;
                    }
                    return Err(AppError::unknown(format!(
                        "APIサーバーへの接続に失敗しました: {e}"
                    )));
                }
            }
        }
    }

    /// エラーレスポンスを処理し、分類済みのエラーを返す
    async fn handle_error_response(response: Response) -> AppError {
        let status_code = response.status().as_u16();
        let response_text = response
            .text()
            .await
            .unwrap_or_else(|_| "レスポンス読み取り失敗".to_string());

        let message = match serde_json::from_str::<ErrorResponse>(&response_text) {
            Ok(error_response) => {
                debug!(
                    "APIサーバーから構造化エラーレスポンスを受信: code={}, message={}",
                    error_response.error.code, error_response.error.message
                );
                error_response.error.message
            }
            Err(_) => {
                warn!(
                    "APIサーバーから非構造化エラーレスポンス: status={status_code}, body={response_text}"
                );
                response_text
            }
        };

        classify_status(status_code, &message)
    }
}

/// レスポンスボディをJSONとして解析する
fn decode_body<T: DeserializeOwned>(body: &str) -> AppResult<T> {
    serde_json::from_str(body).map_err(|e| {
        error!("レスポンスのJSON解析に失敗しました: {e}");
        AppError::from(e)
    })
}
