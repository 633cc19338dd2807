use chrono::Utc;
use rand::Rng;

/// 一時IDのプレフィックス
const TEMPORARY_ID_PREFIX: &str = "s_";

/// リモート確定前に使用する一時IDを生成する
///
/// # 戻り値
/// `s_[ミリ秒タイムスタンプ]_[0-999の乱数]` 形式のID
///
/// # 特性
/// 同一ミリ秒内の衝突は乱数部で回避する。
/// 一時IDのレコードはリモート作成時にIDを送信せず、サーバー採番のIDで置き換えられる。
pub fn generate_temporary_id() -> String {
    let timestamp = Utc::now().timestamp_millis();
    let random_part: u16 = rand::thread_rng().gen_range(0..1000);
    format!("{TEMPORARY_ID_PREFIX}{timestamp}_{random_part}")
}

/// 一時IDかどうかを判定する
///
/// # 検証条件
/// - `s_` で始まる
/// - タイムスタンプ部と乱数部が数字のみ
pub fn is_temporary_id(id: &str) -> bool {
    let Some(rest) = id.strip_prefix(TEMPORARY_ID_PREFIX) else {
        return false;
    };
    let mut parts = rest.splitn(2, '_');
    match (parts.next(), parts.next()) {
        (Some(timestamp), Some(random)) => {
            !timestamp.is_empty()
                && !random.is_empty()
                && timestamp.chars().all(|c| c.is_ascii_digit())
                && random.chars().all(|c| c.is_ascii_digit())
        }
        _ => false,
    }
}

/// クライアント側で確定IDを採番する（リモート採番を行わない場合）
pub fn generate_client_id() -> String {
    uuid::Uuid::new_v4().to_string()
}
