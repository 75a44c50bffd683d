//! 文件列表与下载处理器，下载支持 Range 断点续传。

use axum::body::Body as AxumBody;
use axum::extract::{Extension, Path as AxumPath};
use axum::http::{HeaderMap, HeaderValue, StatusCode, header};
use axum::response::{IntoResponse, Json as JsonResponse, Response};
use futures_util::TryStreamExt;
use httpdate::fmt_http_date;
use percent_encoding::{AsciiSet, NON_ALPHANUMERIC, utf8_percent_encode};
use std::io::{ErrorKind, SeekFrom};
use std::sync::Arc;
use tokio::fs::{self, File};
use tokio::io::{AsyncReadExt, AsyncSeekExt};
use tokio_util::io::ReaderStream;
use tracing::{debug, info, warn};

use crate::config::DOWNLOAD_CHUNK_SIZE;
use crate::error::ApiError;
use crate::etag::{etag_for_name, if_range_matches, not_modified};
use crate::storage::{FileEntry, Storage};

/// Content-Disposition 文件名编码集：保留 Python `quote` 的不转义字符。
const FILENAME_ENCODE: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'~');

/// 列出共享目录内容，最新的文件排在最前。
pub async fn list_files(
    Extension(storage): Extension<Arc<Storage>>,
) -> Result<JsonResponse<Vec<FileEntry>>, ApiError> {
    let mut entries = storage.list_entries().await?;
    // 稳定排序：时间相同的条目保持目录枚举顺序，输出可复现。
    entries.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
    info!(count = entries.len(), "list files");
    Ok(JsonResponse(entries))
}

/// 下载文件，支持 Range 请求与缓存相关头。
///
/// 响应头发出之后流式读取才开始，中途读盘失败只能中断连接，无法再改写
/// 状态码，这里记录日志后照常中断。
pub async fn download_file(
    AxumPath(file_id): AxumPath<String>,
    request_headers: HeaderMap,
    Extension(storage): Extension<Arc<Storage>>,
) -> Result<Response, ApiError> {
    let target = storage.entry_path(&file_id)?;
    let metadata = match fs::metadata(&target).await {
        Ok(metadata) => metadata,
        Err(err) if err.kind() == ErrorKind::NotFound => {
            return Err(ApiError::NotFound("file not found".into()));
        }
        Err(err) => return Err(ApiError::Internal(err.to_string())),
    };
    if !metadata.is_file() {
        return Err(ApiError::NotFound("file not found".into()));
    }
    let file_size = metadata.len();
    let etag = etag_for_name(&file_id);

    let mut response_headers = HeaderMap::new();
    response_headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("application/octet-stream"),
    );
    response_headers.insert(header::ACCEPT_RANGES, HeaderValue::from_static("bytes"));
    response_headers.insert(
        header::CACHE_CONTROL,
        HeaderValue::from_static("public, max-age=3600"),
    );
    response_headers.insert(
        header::ETAG,
        HeaderValue::from_str(&etag).map_err(|_| ApiError::Internal("响应头构建失败".into()))?,
    );

    if not_modified(&request_headers, &etag) {
        debug!(file_id, "etag matched, not modified");
        return Ok((StatusCode::NOT_MODIFIED, response_headers).into_response());
    }

    let disposition = format!(
        "attachment; filename=\"{}\"",
        utf8_percent_encode(&file_id, FILENAME_ENCODE)
    );
    response_headers.insert(
        header::CONTENT_DISPOSITION,
        HeaderValue::from_str(&disposition)
            .map_err(|_| ApiError::Internal("响应头构建失败".into()))?,
    );
    if let Ok(modified) = metadata.modified() {
        let value = fmt_http_date(modified);
        response_headers.insert(
            header::LAST_MODIFIED,
            HeaderValue::from_str(&value)
                .map_err(|_| ApiError::Internal("响应头构建失败".into()))?,
        );
    }

    let range = if if_range_matches(&request_headers, &etag) {
        parse_range(request_headers.get(header::RANGE), file_size)?
    } else {
        None
    };

    let file = File::open(&target)
        .await
        .map_err(|err| ApiError::Internal(err.to_string()))?;

    if let Some((start, end)) = range {
        let length = end - start + 1;
        debug!(file_id, start, end, length, "range request accepted");
        let mut file = file;
        file.seek(SeekFrom::Start(start))
            .await
            .map_err(|err| ApiError::Internal(err.to_string()))?;
        let stream = ReaderStream::with_capacity(file.take(length), DOWNLOAD_CHUNK_SIZE)
            .inspect_err(|err| warn!(error = %err, "read failed mid-stream, aborting response"));
        response_headers.insert(
            header::CONTENT_RANGE,
            HeaderValue::from_str(&format!("bytes {start}-{end}/{file_size}"))
                .map_err(|_| ApiError::Internal("响应头构建失败".into()))?,
        );
        response_headers.insert(
            header::CONTENT_LENGTH,
            HeaderValue::from_str(&length.to_string())
                .map_err(|_| ApiError::Internal("响应头构建失败".into()))?,
        );
        return Ok((
            StatusCode::PARTIAL_CONTENT,
            response_headers,
            AxumBody::from_stream(stream),
        )
            .into_response());
    }

    response_headers.insert(
        header::CONTENT_LENGTH,
        HeaderValue::from_str(&file_size.to_string())
            .map_err(|_| ApiError::Internal("响应头构建失败".into()))?,
    );
    info!(file_id, size = file_size, "download full file");
    let stream = ReaderStream::with_capacity(file, DOWNLOAD_CHUNK_SIZE)
        .inspect_err(|err| warn!(error = %err, "read failed mid-stream, aborting response"));
    Ok((
        StatusCode::OK,
        response_headers,
        AxumBody::from_stream(stream),
    )
        .into_response())
}

/// 解析 Range 头。起点越界一律 416，终点越界收敛到文件末尾。
fn parse_range(
    value: Option<&HeaderValue>,
    file_size: u64,
) -> Result<Option<(u64, u64)>, ApiError> {
    let Some(value) = value else {
        return Ok(None);
    };
    let value = value
        .to_str()
        .map_err(|_| ApiError::BadRequest("invalid Range header".into()))?;
    let Some(range) = value.strip_prefix("bytes=") else {
        return Err(ApiError::BadRequest("invalid Range header".into()));
    };
    if range.contains(',') {
        return Err(ApiError::BadRequest("multiple ranges not supported".into()));
    }

    let mut parts = range.splitn(2, '-');
    let start_part = parts.next().unwrap_or_default().trim();
    let end_part = parts.next().unwrap_or_default().trim();

    if start_part.is_empty() {
        // 后缀形式 bytes=-N：取文件末尾 N 字节。
        let suffix: u64 = end_part
            .parse()
            .map_err(|_| ApiError::BadRequest("invalid Range header".into()))?;
        if suffix == 0 || file_size == 0 {
            return Err(ApiError::RangeNotSatisfiable(file_size));
        }
        let start = file_size.saturating_sub(suffix);
        return Ok(Some((start, file_size - 1)));
    }

    let start: u64 = start_part
        .parse()
        .map_err(|_| ApiError::BadRequest("invalid Range header".into()))?;
    if start >= file_size {
        return Err(ApiError::RangeNotSatisfiable(file_size));
    }
    let end: u64 = if end_part.is_empty() {
        file_size - 1
    } else {
        end_part
            .parse::<u64>()
            .map_err(|_| ApiError::BadRequest("invalid Range header".into()))?
            .min(file_size - 1)
    };
    if start > end {
        return Err(ApiError::RangeNotSatisfiable(file_size));
    }
    Ok(Some((start, end)))
}
