//! Permit handlers
//! 许可证创建、审批与生命周期接口

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use std::sync::Arc;
use uuid::Uuid;

use crate::{
    auth::ActorContext,
    error::Result,
    middleware::AppState,
    models::{
        approval::{ApproveRequest, DecidedFilter, RejectRequest},
        permit::CreatePermitRequest,
    },
};

/// 创建许可证
pub async fn create_permit(
    State(state): State<Arc<AppState>>,
    actor: ActorContext,
    Json(request): Json<CreatePermitRequest>,
) -> Result<impl IntoResponse> {
    let permit = state
        .permit_service
        .create_permit(request, actor.user_id)
        .await?;

    Ok((StatusCode::CREATED, Json(permit)))
}

/// 获取许可证详情（含审批记录与延期申请）
pub async fn get_permit(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse> {
    let detail = state.permit_service.get_permit(id).await?;
    Ok(Json(detail))
}

/// 批准
pub async fn approve_permit(
    State(state): State<Arc<AppState>>,
    actor: ActorContext,
    Path(id): Path<Uuid>,
    Json(request): Json<ApproveRequest>,
) -> Result<impl IntoResponse> {
    let service = &state.permit_service;
    let permit = match request.role {
        Some(role) => {
            service
                .approve_as_role(id, actor.user_id, role, &request.signature)
                .await?
        }
        None => service.approve(id, actor.user_id, &request.signature).await?,
    };

    Ok(Json(permit))
}

/// 拒绝
pub async fn reject_permit(
    State(state): State<Arc<AppState>>,
    actor: ActorContext,
    Path(id): Path<Uuid>,
    Json(request): Json<RejectRequest>,
) -> Result<impl IntoResponse> {
    let service = &state.permit_service;
    let permit = match request.role {
        Some(role) => {
            service
                .reject_as_role(id, actor.user_id, role, &request.reason)
                .await?
        }
        None => service.reject(id, actor.user_id, &request.reason).await?,
    };

    Ok(Json(permit))
}

pub async fn mark_ready(
    State(state): State<Arc<AppState>>,
    actor: ActorContext,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse> {
    let permit = state
        .permit_service
        .mark_ready_to_start(id, actor.user_id)
        .await?;
    Ok(Json(permit))
}

pub async fn start_permit(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse> {
    let permit = state.permit_service.start_permit(id).await?;
    Ok(Json(permit))
}

pub async fn close_permit(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse> {
    let permit = state.permit_service.close_permit(id).await?;
    Ok(Json(permit))
}

/// 状态一致性检查
pub async fn verify_consistency(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse> {
    let report = state.permit_service.verify_consistency(id).await?;
    Ok(Json(report))
}

/// 当前用户待审批的许可证
pub async fn list_my_pending(
    State(state): State<Arc<AppState>>,
    actor: ActorContext,
) -> Result<impl IntoResponse> {
    let permits = state.permit_service.list_pending_for(actor.user_id).await?;
    Ok(Json(permits))
}

/// 当前用户已批准/已拒绝的许可证
pub async fn list_my_decided(
    State(state): State<Arc<AppState>>,
    actor: ActorContext,
    Query(filter): Query<DecidedFilter>,
) -> Result<impl IntoResponse> {
    let permits = state
        .permit_service
        .list_decided_for(actor.user_id, filter.outcome)
        .await?;
    Ok(Json(permits))
}
