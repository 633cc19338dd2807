//! DTO・エンティティ・ドメインモデル間の変換
//!
//! 請求サイクル文字列の正規化はこの境界で一度だけ行う。

use super::dto::SubscriptionDto;
use super::entity::{SubscriptionEntity, SyncStatus};
use super::models::{BillingCycle, Subscription};
use crate::shared::errors::{AppError, AppResult};
use crate::shared::utils::{from_epoch_millis, is_temporary_id, to_epoch_millis};

impl TryFrom<&SubscriptionEntity> for Subscription {
    type Error = AppError;

    fn try_from(entity: &SubscriptionEntity) -> AppResult<Self> {
        let first_billing_date = from_epoch_millis(entity.first_billing_date)?;
        Ok(Subscription::new(
            entity.remote_id.clone(),
            entity.name.clone(),
            entity.cost,
            BillingCycle::parse(&entity.cycle),
            first_billing_date,
        )
        .with_currency(entity.currency.clone())
        .with_active(entity.is_active))
    }
}

impl TryFrom<SubscriptionDto> for Subscription {
    type Error = AppError;

    fn try_from(dto: SubscriptionDto) -> AppResult<Self> {
        let id = require_id(dto.id)?;
        let first_billing_date = from_epoch_millis(dto.first_billing_date)?;
        Ok(
            Subscription::new(id, dto.name, dto.cost, BillingCycle::parse(&dto.cycle), first_billing_date)
                .with_currency(dto.currency)
                .with_active(dto.is_active),
        )
    }
}

impl From<&Subscription> for SubscriptionDto {
    fn from(subscription: &Subscription) -> Self {
        Self {
            id: Some(subscription.id.clone()),
            name: subscription.name.clone(),
            cost: subscription.cost,
            cycle: subscription.cycle().as_str().to_string(),
            first_billing_date: to_epoch_millis(subscription.first_billing_date()),
            currency: subscription.currency.clone(),
            is_active: subscription.is_active,
        }
    }
}

impl SubscriptionEntity {
    /// ドメインモデルからエンティティを作成する（local_idは未採番）
    pub fn from_domain(subscription: &Subscription, sync_status: SyncStatus) -> Self {
        Self {
            local_id: 0,
            remote_id: subscription.id.clone(),
            name: subscription.name.clone(),
            cost: subscription.cost,
            cycle: subscription.cycle().as_str().to_string(),
            first_billing_date: to_epoch_millis(subscription.first_billing_date()),
            currency: subscription.currency.clone(),
            is_active: subscription.is_active,
            sync_status,
        }
    }

    /// DTOからエンティティを作成する
    ///
    /// IDを持たないDTOは変換できない（ハードエラー）。
    pub fn from_dto(dto: SubscriptionDto, sync_status: SyncStatus) -> AppResult<Self> {
        let remote_id = require_id(dto.id)?;
        let cycle = BillingCycle::parse(&dto.cycle);
        Ok(Self {
            local_id: 0,
            remote_id,
            name: dto.name,
            cost: dto.cost,
            cycle: cycle.as_str().to_string(),
            first_billing_date: dto.first_billing_date,
            currency: dto.currency,
            is_active: dto.is_active,
            sync_status,
        })
    }

    /// エンティティからリモート送信用のDTOを作成する
    pub fn to_dto(&self) -> SubscriptionDto {
        SubscriptionDto {
            id: Some(self.remote_id.clone()),
            name: self.name.clone(),
            cost: self.cost,
            cycle: self.cycle.clone(),
            first_billing_date: self.first_billing_date,
            currency: self.currency.clone(),
            is_active: self.is_active,
        }
    }

    /// リモート作成リクエスト用のDTOを作成する
    ///
    /// 一時IDはサーバーに送らず、サーバー側の採番に任せる。
    pub fn to_create_request(&self) -> SubscriptionDto {
        let mut dto = self.to_dto();
        if is_temporary_id(&self.remote_id) {
            dto.id = None;
        }
        dto
    }
}

fn require_id(id: Option<String>) -> AppResult<String> {
    id.filter(|id| !id.trim().is_empty())
        .ok_or_else(|| AppError::validation("IDを持たないサブスクリプションレコードは変換できません"))
}
