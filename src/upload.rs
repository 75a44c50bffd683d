//! 多文件上传处理器：流式写盘与重名规避。

use axum::extract::{Extension, Multipart};
use axum::extract::multipart::Field;
use axum::response::Json as JsonResponse;
use serde::Serialize;
use std::io;
use std::sync::Arc;
use std::time::SystemTime;
use tokio::fs::{self, File};
use tokio::io::{AsyncWriteExt, BufWriter};
use tracing::{info, warn};

use crate::config::UPLOAD_BUFFER_SIZE;
use crate::error::ApiError;
use crate::storage::{ClaimedFile, Storage};

/// Upload request limits, wired from CLI configuration.
#[derive(Debug)]
pub struct UploadLimits {
    pub max_total_size: u64,
}

#[derive(Serialize)]
pub(crate) struct UploadResponse {
    message: String,
}

/// 接收 multipart 请求中的全部 `files` 字段并逐个落盘。
///
/// 同一请求内早先写完的文件不回滚：当前部分失败时仅删除它自己的半成品，
/// 整个请求以一次聚合错误结束。
pub async fn receive_files(
    Extension(storage): Extension<Arc<Storage>>,
    Extension(limits): Extension<Arc<UploadLimits>>,
    mut multipart: Multipart,
) -> Result<JsonResponse<UploadResponse>, ApiError> {
    let mut seen_files_field = false;
    let mut saved: usize = 0;
    let mut total_bytes: u64 = 0;

    while let Some(mut field) = multipart.next_field().await? {
        if field.name() != Some("files") {
            continue;
        }
        seen_files_field = true;
        let Some(original_name) = field.file_name().map(str::to_owned) else {
            continue;
        };
        if original_name.is_empty() {
            continue;
        }

        let ClaimedFile { name, path, file } = storage.claim_upload_file(&original_name).await?;
        match store_field(&mut field, file, &mut total_bytes, limits.max_total_size).await {
            Ok(written) => {
                saved += 1;
                info!(name, original = original_name, bytes = written, "file saved");
            }
            Err(err) => {
                // 已提交的名字随半成品一并收回。
                let _ = fs::remove_file(&path).await;
                warn!(name, original = original_name, "upload part aborted");
                return Err(err);
            }
        }
    }

    if !seen_files_field {
        return Err(ApiError::BadRequest("no files in request".into()));
    }

    info!(saved, total_bytes, "upload complete");
    Ok(JsonResponse(UploadResponse {
        message: "upload complete".into(),
    }))
}

/// 将单个 multipart 字段按块写入已认领的文件，成功后把修改时间刷为当前
/// 时刻，使新上传的文件排到列表最前。
async fn store_field(
    field: &mut Field<'_>,
    file: File,
    total_bytes: &mut u64,
    max_total_size: u64,
) -> Result<u64, ApiError> {
    let mut writer = BufWriter::with_capacity(UPLOAD_BUFFER_SIZE, file);
    let mut written: u64 = 0;

    while let Some(chunk) = field.chunk().await? {
        if chunk.is_empty() {
            continue;
        }
        written += chunk.len() as u64;
        *total_bytes += chunk.len() as u64;
        if max_total_size > 0 && *total_bytes > max_total_size {
            return Err(ApiError::BadRequest("upload size exceeds limit".into()));
        }
        writer
            .write_all(&chunk)
            .await
            .map_err(|err| ApiError::Internal(err.to_string()))?;
    }

    writer
        .flush()
        .await
        .map_err(|err| ApiError::Internal(err.to_string()))?;
    let file = writer.into_inner();
    file.sync_all()
        .await
        .map_err(|err| ApiError::Internal(err.to_string()))?;
    mark_fresh(file)
        .await
        .map_err(|err| ApiError::Internal(err.to_string()))?;

    Ok(written)
}

/// 覆盖文件修改时间为当前时间，屏蔽来源流中携带的时间戳。
async fn mark_fresh(file: File) -> io::Result<()> {
    let std_file = file.into_std().await;
    let now = SystemTime::now();
    tokio::task::spawn_blocking(move || std_file.set_modified(now))
        .await
        .map_err(|err| io::Error::other(err.to_string()))?
}
