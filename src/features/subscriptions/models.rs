use crate::shared::errors::{AppError, AppResult};
use crate::shared::utils::{generate_client_id, generate_temporary_id};
use chrono::{Months, NaiveDate};
use serde::{Serialize, Serializer};
use std::fmt;

/// デフォルトの通貨単位
pub const DEFAULT_CURRENCY: &str = "KRW";

/// 請求サイクル
///
/// 入力は大文字・小文字を区別せずに正規化する。
/// 認識できない値は元の文字列のまま保持し、次回請求日の計算では初回請求日を返す。
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum BillingCycle {
    Monthly,
    Yearly,
    Unrecognized(String),
}

impl BillingCycle {
    /// 文字列から請求サイクルを解析する（失敗しない）
    pub fn parse(raw: &str) -> Self {
        match raw.trim().to_uppercase().as_str() {
            "MONTHLY" => BillingCycle::Monthly,
            "YEARLY" => BillingCycle::Yearly,
            _ => BillingCycle::Unrecognized(raw.to_string()),
        }
    }

    /// 保存・送信用の文字列表現
    pub fn as_str(&self) -> &str {
        match self {
            BillingCycle::Monthly => "MONTHLY",
            BillingCycle::Yearly => "YEARLY",
            BillingCycle::Unrecognized(raw) => raw,
        }
    }
}

impl fmt::Display for BillingCycle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for BillingCycle {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

/// 初回請求日と請求サイクルから次回請求日を算出する
///
/// # 規則
/// - MONTHLY: 1か月後（月末は短い月の末日に丸める）
/// - YEARLY: 1年後（2/29は翌年の2/28）
/// - その他: 初回請求日をそのまま返す
pub fn derive_next_billing_date(first_billing_date: NaiveDate, cycle: &BillingCycle) -> NaiveDate {
    let months = match cycle {
        BillingCycle::Monthly => 1,
        BillingCycle::Yearly => 12,
        BillingCycle::Unrecognized(_) => return first_billing_date,
    };

    first_billing_date
        .checked_add_months(Months::new(months))
        .unwrap_or(first_billing_date)
}

/// サブスクリプションのドメインモデル
///
/// `next_billing_date` は保存されない派生値で、
/// `first_billing_date` か `cycle` が変わるたびに再計算される。
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Subscription {
    /// ローカルとリモートで共有する識別子
    pub id: String,
    pub name: String,
    pub cost: f64,
    pub currency: String,
    pub is_active: bool,
    cycle: BillingCycle,
    first_billing_date: NaiveDate,
    next_billing_date: NaiveDate,
}

impl Subscription {
    /// 新しいサブスクリプションを作成する（通貨はKRW、有効状態）
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        cost: f64,
        cycle: BillingCycle,
        first_billing_date: NaiveDate,
    ) -> Self {
        let next_billing_date = derive_next_billing_date(first_billing_date, &cycle);
        Self {
            id: id.into(),
            name: name.into(),
            cost,
            currency: DEFAULT_CURRENCY.to_string(),
            is_active: true,
            cycle,
            first_billing_date,
            next_billing_date,
        }
    }

    pub fn with_currency(mut self, currency: impl Into<String>) -> Self {
        self.currency = currency.into();
        self
    }

    pub fn with_active(mut self, is_active: bool) -> Self {
        self.is_active = is_active;
        self
    }

    pub fn cycle(&self) -> &BillingCycle {
        &self.cycle
    }

    pub fn first_billing_date(&self) -> NaiveDate {
        self.first_billing_date
    }

    pub fn next_billing_date(&self) -> NaiveDate {
        self.next_billing_date
    }

    pub fn set_cycle(&mut self, cycle: BillingCycle) {
        self.cycle = cycle;
        self.next_billing_date = derive_next_billing_date(self.first_billing_date, &self.cycle);
    }

    pub fn set_first_billing_date(&mut self, first_billing_date: NaiveDate) {
        self.first_billing_date = first_billing_date;
        self.next_billing_date = derive_next_billing_date(self.first_billing_date, &self.cycle);
    }

    /// 保存前の入力値を検証する
    ///
    /// # 検証条件
    /// - 名前が空白のみでない
    /// - 金額が有限の正の数
    /// - 通貨が空でない
    pub fn validate(&self) -> AppResult<()> {
        if self.name.trim().is_empty() {
            return Err(AppError::validation("サービス名を入力してください"));
        }
        if !self.cost.is_finite() || self.cost <= 0.0 {
            return Err(AppError::validation(format!(
                "金額は0より大きい数値である必要があります: {}",
                self.cost
            )));
        }
        if self.currency.trim().is_empty() {
            return Err(AppError::validation("通貨単位を入力してください"));
        }
        Ok(())
    }

    /// 月額換算の金額
    pub fn monthly_cost(&self) -> f64 {
        match self.cycle {
            BillingCycle::Monthly => self.cost,
            BillingCycle::Yearly => self.cost / 12.0,
            BillingCycle::Unrecognized(_) => 0.0,
        }
    }
}

/// アクティブなサブスクリプションの月額合計を計算する
pub fn calculate_monthly_total(subscriptions: &[Subscription]) -> f64 {
    subscriptions
        .iter()
        .filter(|sub| sub.is_active)
        .fold(0.0, |acc, sub| acc + sub.monthly_cost())
}

/// 請求サイクルを考慮しない金額の単純合計
pub fn calculate_total_cost(subscriptions: &[Subscription]) -> f64 {
    subscriptions.iter().map(|sub| sub.cost).sum()
}

/// 入力フォームから受け取るサブスクリプション作成用の下書き
#[derive(Debug, Clone)]
pub struct SubscriptionDraft {
    /// 既存IDを指定する場合のみSome（未指定なら一時IDを採番）
    pub id: Option<String>,
    pub name: String,
    /// 金額の入力文字列
    pub cost: String,
    pub cycle: String,
    pub first_billing_date: NaiveDate,
    pub currency: Option<String>,
}

impl SubscriptionDraft {
    /// IDが未指定ならクライアント側でUUIDを採番する（リモートはこのIDを保持する）
    pub fn with_client_id(mut self) -> Self {
        if self.id.is_none() {
            self.id = Some(generate_client_id());
        }
        self
    }

    /// 下書きを検証済みのドメインモデルに変換する
    pub fn into_subscription(self) -> AppResult<Subscription> {
        let cost: f64 = self
            .cost
            .trim()
            .parse()
            .map_err(|_| AppError::validation(format!("金額が数値ではありません: {}", self.cost)))?;

        let id = self.id.unwrap_or_else(generate_temporary_id);
        let subscription = Subscription::new(
            id,
            self.name,
            cost,
            BillingCycle::parse(&self.cycle),
            self.first_billing_date,
        )
        .with_currency(self.currency.unwrap_or_else(|| DEFAULT_CURRENCY.to_string()));

        subscription.validate()?;
        Ok(subscription)
    }
}
