//! 路由注册
//! 创建所有 API 路由并应用中间件

use axum::{
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use tower_http::{
    compression::CompressionLayer, cors::CorsLayer, limit::RequestBodyLimitLayer,
    trace::TraceLayer,
};

use crate::{handlers, middleware::AppState};

/// 请求体上限
const MAX_BODY_BYTES: usize = 1024 * 1024;

/// 创建应用路由
pub fn create_router(state: Arc<AppState>) -> Router {
    // 公开端点（健康检查）
    let public_routes = Router::new()
        .route("/health", get(handlers::health::health_check))
        .route("/ready", get(handlers::health::readiness_check));

    // 需要操作人标识的路由
    let api_routes = Router::new()
        // 许可证
        .route("/api/v1/permits", post(handlers::permit::create_permit))
        .route("/api/v1/permits/{id}", get(handlers::permit::get_permit))
        .route("/api/v1/permits/{id}/approve", post(handlers::permit::approve_permit))
        .route("/api/v1/permits/{id}/reject", post(handlers::permit::reject_permit))
        .route("/api/v1/permits/{id}/ready", post(handlers::permit::mark_ready))
        .route("/api/v1/permits/{id}/start", post(handlers::permit::start_permit))
        .route("/api/v1/permits/{id}/close", post(handlers::permit::close_permit))
        .route(
            "/api/v1/permits/{id}/consistency",
            get(handlers::permit::verify_consistency),
        )

        // 延期申请
        .route(
            "/api/v1/permits/{id}/extensions",
            get(handlers::extension::list_extensions)
                .post(handlers::extension::request_extension),
        )
        .route("/api/v1/extensions/{id}", get(handlers::extension::get_extension))
        .route(
            "/api/v1/extensions/{id}/approve",
            post(handlers::extension::approve_extension),
        )
        .route(
            "/api/v1/extensions/{id}/reject",
            post(handlers::extension::reject_extension),
        )

        // 当前用户的审批工作台
        .route("/api/v1/me/pending-permits", get(handlers::permit::list_my_pending))
        .route("/api/v1/me/decided-permits", get(handlers::permit::list_my_decided))
        .route(
            "/api/v1/me/pending-extensions",
            get(handlers::extension::list_my_pending),
        )
        .layer(axum::middleware::from_fn(crate::auth::actor_middleware));

    // 组合所有路由
    Router::new()
        .merge(public_routes)
        .merge(api_routes)
        .layer(RequestBodyLimitLayer::new(MAX_BODY_BYTES))
        .layer(CompressionLayer::new())
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .layer(axum::middleware::from_fn(crate::middleware::request_tracking_middleware))
        .with_state(state)
}
