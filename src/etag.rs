//! 基于文件名的 ETag 计算与缓存条件校验。

use axum::http::{HeaderMap, header};
use md5::{Digest, Md5};

/// 根据文件名生成确定性 ETag。键是名字而不是内容：同名文件在删除后重建
/// 会得到相同的 ETag，对本系统的缓存刷新足够，不提供内容完整性保证。
pub fn etag_for_name(name: &str) -> String {
    let mut hasher = Md5::new();
    hasher.update(name.as_bytes());
    hex::encode(hasher.finalize())
}

/// 校验 If-None-Match 是否命中当前 ETag。
pub fn not_modified(headers: &HeaderMap, current: &str) -> bool {
    let Some(value) = headers
        .get(header::IF_NONE_MATCH)
        .and_then(|value| value.to_str().ok())
    else {
        return false;
    };
    value
        .split(',')
        .map(str::trim)
        .any(|item| item == "*" || item.trim_matches('"') == current)
}

/// 校验 If-Range：头缺失或与当前 ETag 一致时允许按 Range 响应。
pub fn if_range_matches(headers: &HeaderMap, current: &str) -> bool {
    match headers
        .get(header::IF_RANGE)
        .and_then(|value| value.to_str().ok())
    {
        Some(value) => value.trim().trim_matches('"') == current,
        None => true,
    }
}
