//! 时间工具函数
//!
//! 所有持久化时间戳统一为 `i64` Unix millis。
//! 回滚 time point 使用严格的 `YYYY-MM-DDTHH:MM:SS.mmmZ` 格式 (UTC, 毫秒精度)。

use chrono::{DateTime, NaiveDateTime, Utc};

use super::{AppError, AppResult};

/// 回滚保留窗口的宽限时间 (毫秒)
///
/// time point 允许比保留窗口下限早 10s，吸收调用方与服务器的时钟偏差。
const RETENTION_GRACE_MS: i64 = 10_000;

/// 当前 Unix 时间戳 (毫秒)
pub fn now_millis() -> i64 {
    Utc::now().timestamp_millis()
}

/// 解析严格格式的 time point: `YYYY-MM-DDTHH:MM:SS.mmmZ`
///
/// 毫秒部分必须恰好 3 位，结尾必须是字面量 `Z` (仅接受 UTC)。
/// 返回 Unix millis。
pub fn parse_time_point(s: &str) -> AppResult<i64> {
    let bytes = s.as_bytes();
    let well_formed = bytes.len() == 24
        && bytes[10] == b'T'
        && bytes[19] == b'.'
        && bytes[23] == b'Z'
        && bytes[20..23].iter().all(|b| b.is_ascii_digit());
    if !well_formed {
        return Err(AppError::validation(format!(
            "Invalid time point '{s}', expected YYYY-MM-DDTHH:MM:SS.mmmZ"
        )));
    }

    let naive = NaiveDateTime::parse_from_str(&s[..23], "%Y-%m-%dT%H:%M:%S%.3f")
        .map_err(|_| {
            AppError::validation(format!(
                "Invalid time point '{s}', expected YYYY-MM-DDTHH:MM:SS.mmmZ"
            ))
        })?;
    Ok(naive.and_utc().timestamp_millis())
}

/// 将 Unix millis 格式化为 time point 字符串
pub fn format_time_point(millis: i64) -> String {
    DateTime::<Utc>::from_timestamp_millis(millis)
        .unwrap_or_default()
        .format("%Y-%m-%dT%H:%M:%S%.3fZ")
        .to_string()
}

/// 校验 time point 落在保留窗口内: `now - retention - 10s <= tp <= now`
///
/// 超出窗口的历史无法保证仍然可用，未来时间没有意义，均拒绝。
pub fn validate_retention(time_point: i64, retention_days: u32) -> AppResult<()> {
    let now = now_millis();
    let horizon = now - (retention_days as i64) * 24 * 60 * 60 * 1000 - RETENTION_GRACE_MS;

    if time_point < horizon {
        return Err(AppError::validation(format!(
            "Time point {} is outside the {}-day retention horizon",
            format_time_point(time_point),
            retention_days
        )));
    }
    if time_point > now {
        return Err(AppError::validation(format!(
            "Time point {} is in the future",
            format_time_point(time_point)
        )));
    }
    Ok(())
}
