//! Extension handlers

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use std::sync::Arc;
use uuid::Uuid;
use validator::Validate;

use crate::{
    auth::ActorContext,
    error::Result,
    middleware::AppState,
    models::{
        approval::{ApproveRequest, RejectRequest},
        extension::CreateExtensionRequest,
    },
};

/// 发起延期申请
pub async fn request_extension(
    State(state): State<Arc<AppState>>,
    actor: ActorContext,
    Path(permit_id): Path<Uuid>,
    Json(request): Json<CreateExtensionRequest>,
) -> Result<impl IntoResponse> {
    request.validate()?;

    let extension = state
        .extension_service
        .request_extension(permit_id, actor.user_id, request.new_end_time, &request.reason)
        .await?;

    Ok((StatusCode::CREATED, Json(extension)))
}

pub async fn list_extensions(
    State(state): State<Arc<AppState>>,
    Path(permit_id): Path<Uuid>,
) -> Result<impl IntoResponse> {
    let extensions = state.extension_service.list_extensions(permit_id).await?;
    Ok(Json(extensions))
}

pub async fn get_extension(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse> {
    let detail = state.extension_service.get_extension(id).await?;
    Ok(Json(detail))
}

pub async fn approve_extension(
    State(state): State<Arc<AppState>>,
    actor: ActorContext,
    Path(id): Path<Uuid>,
    Json(request): Json<ApproveRequest>,
) -> Result<impl IntoResponse> {
    let service = &state.extension_service;
    let extension = match request.role {
        Some(role) => {
            service
                .approve_extension_as_role(id, actor.user_id, role, &request.signature)
                .await?
        }
        None => {
            service
                .approve_extension(id, actor.user_id, &request.signature)
                .await?
        }
    };

    Ok(Json(extension))
}

pub async fn reject_extension(
    State(state): State<Arc<AppState>>,
    actor: ActorContext,
    Path(id): Path<Uuid>,
    Json(request): Json<RejectRequest>,
) -> Result<impl IntoResponse> {
    let service = &state.extension_service;
    let extension = match request.role {
        Some(role) => {
            service
                .reject_extension_as_role(id, actor.user_id, role, &request.reason)
                .await?
        }
        None => {
            service
                .reject_extension(id, actor.user_id, &request.reason)
                .await?
        }
    };

    Ok(Json(extension))
}

/// 当前用户待审批的延期申请
pub async fn list_my_pending(
    State(state): State<Arc<AppState>>,
    actor: ActorContext,
) -> Result<impl IntoResponse> {
    let extensions = state
        .extension_service
        .list_pending_extensions_for(actor.user_id)
        .await?;
    Ok(Json(extensions))
}
