//! 内嵌静态页面服务。

use axum::body::Body as AxumBody;
use axum::extract::Request;
use axum::http::{HeaderMap, HeaderValue, header};
use axum::response::{IntoResponse, Response};
use rust_embed::RustEmbed;

use crate::error::ApiError;

#[derive(RustEmbed)]
#[folder = "static"]
/// 内嵌的上传页面资源。
pub struct StaticAssets;

/// 静态资源回退处理器，根路径返回上传页面。
pub async fn serve_frontend(req: Request) -> Result<Response, ApiError> {
    let path = req.uri().path().trim_start_matches('/');
    let requested = if path.is_empty() { "index.html" } else { path };
    let Some(asset) = StaticAssets::get(requested) else {
        return Err(ApiError::NotFound("not found".into()));
    };
    let mime = mime_guess::from_path(requested).first_or_octet_stream();
    let mut headers = HeaderMap::new();
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_str(mime.essence_str())
            .map_err(|_| ApiError::Internal("无效的 MIME 类型".into()))?,
    );
    Ok((headers, AxumBody::from(asset.data.into_owned())).into_response())
}
