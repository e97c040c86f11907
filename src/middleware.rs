//! HTTP 中间件
//! 应用状态与请求追踪

use axum::{
    extract::Request,
    http::{HeaderMap, HeaderValue},
    middleware::Next,
    response::Response,
};
use std::sync::Arc;
use std::time::Instant;
use tracing::Instrument;
use uuid::Uuid;

use crate::{
    config::AppConfig,
    error::Result,
    realtime::EventBus,
    repository::{PermitStore, RoleDirectory},
    services::{ExtensionService, PermitService},
};

/// 应用状态
///
/// 服务以 Arc 共享，Clone 只是指针拷贝。`db` 为空时表示使用内存存储运行。
#[derive(Clone)]
pub struct AppState {
    pub config: AppConfig,
    pub db: Option<sqlx::PgPool>,
    pub permit_service: Arc<PermitService>,
    pub extension_service: Arc<ExtensionService>,
    pub event_bus: Arc<EventBus>,
}

impl AppState {
    /// 由存储实现组装全部服务
    pub fn build(
        config: AppConfig,
        db: Option<sqlx::PgPool>,
        store: Arc<dyn PermitStore>,
        directory: Arc<dyn RoleDirectory>,
    ) -> Result<Self> {
        let policy = config.workflow.extension_policy()?;
        let event_bus = Arc::new(EventBus::new(config.workflow.event_bus_capacity));

        let permit_service = Arc::new(PermitService::new(
            store.clone(),
            directory,
            event_bus.clone(),
            config.workflow.serial_prefix.clone(),
        ));
        let extension_service =
            Arc::new(ExtensionService::new(store, event_bus.clone(), policy));

        Ok(Self {
            config,
            db,
            permit_service,
            extension_service,
            event_bus,
        })
    }
}

/// 请求追踪中间件
/// 为每个请求生成 trace_id 和 request_id，并记录指标
pub async fn request_tracking_middleware(req: Request, next: Next) -> Response {
    let trace_id = extract_or_generate_trace_id(req.headers());
    let request_id = Uuid::new_v4().to_string();

    let method = req.method().clone();
    let path = req.uri().path().to_string();

    let span = tracing::info_span!(
        "http_request",
        trace_id = %trace_id,
        request_id = %request_id,
        method = %method,
        path = %path,
        user_id = tracing::field::Empty,
    );

    async move {
        let start = Instant::now();
        let mut response = next.run(req).await;
        let elapsed = start.elapsed();

        let status = response.status().as_u16();
        let method_name = match method.as_str() {
            "GET" => "GET",
            "POST" => "POST",
            "PUT" => "PUT",
            "DELETE" => "DELETE",
            "PATCH" => "PATCH",
            _ => "UNKNOWN",
        };
        let status_class = match status {
            200..=299 => "2xx",
            400..=499 => "4xx",
            500..=599 => "5xx",
            _ => "other",
        };

        metrics::counter!("http_requests_total", "method" => method_name, "status" => status_class)
            .increment(1);
        metrics::histogram!("http_request_duration_seconds").record(elapsed.as_secs_f64());

        tracing::info!(
            status = status,
            elapsed_ms = elapsed.as_millis() as u64,
            "Request completed"
        );

        // 在响应头中回传追踪标识
        if let Ok(value) = HeaderValue::from_str(&trace_id) {
            response.headers_mut().insert("x-trace-id", value);
        }
        if let Ok(value) = HeaderValue::from_str(&request_id) {
            response.headers_mut().insert("x-request-id", value);
        }

        response
    }
    .instrument(span)
    .await
}

/// 从请求头中提取或生成 trace_id
fn extract_or_generate_trace_id(headers: &HeaderMap) -> String {
    headers
        .get("x-trace-id")
        .and_then(|v| v.to_str().ok())
        .filter(|s| !s.is_empty())
        .map(|s| s.to_string())
        .unwrap_or_else(|| Uuid::new_v4().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extract_or_generate_trace_id() {
        let mut headers = HeaderMap::new();
        headers.insert("x-trace-id", "test-trace-123".parse().unwrap());

        let trace_id = extract_or_generate_trace_id(&headers);
        assert_eq!(trace_id, "test-trace-123");

        let headers = HeaderMap::new();
        let trace_id = extract_or_generate_trace_id(&headers);
        assert!(!trace_id.is_empty());
        assert_ne!(trace_id, "test-trace-123");
    }
}
