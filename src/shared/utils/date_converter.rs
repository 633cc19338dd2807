use crate::shared::errors::{AppError, AppResult};
use chrono::{DateTime, NaiveDate, NaiveTime, Utc};

/// 日付をUTC午前0時のエポックミリ秒に変換する
pub fn to_epoch_millis(date: NaiveDate) -> i64 {
    date.and_time(NaiveTime::MIN).and_utc().timestamp_millis()
}

/// エポックミリ秒をUTC基準の日付に変換する
///
/// 時刻成分は切り捨てられる。表現可能範囲外の値はバリデーションエラー。
pub fn from_epoch_millis(timestamp: i64) -> AppResult<NaiveDate> {
    DateTime::<Utc>::from_timestamp_millis(timestamp)
        .map(|datetime| datetime.date_naive())
        .ok_or_else(|| AppError::validation(format!("日付に変換できないタイムスタンプです: {timestamp}")))
}
