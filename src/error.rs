//! 统一错误模型
//! 定义审批引擎的所有错误类型和错误响应格式

use axum::{
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use serde::Serialize;
use thiserror::Error;
use uuid::Uuid;

use crate::models::approval::ApprovalRole;

/// 结果类型别名
pub type Result<T> = std::result::Result<T, AppError>;

/// 应用错误类型
#[derive(Debug, Error)]
pub enum AppError {
    // 配置类错误：许可证无法创建
    #[error("No approvers configured for site {site_id}")]
    NoApproversConfigured { site_id: Uuid },

    // 授权类错误
    #[error("User {user_id} is not a bound approver of {target}")]
    NotAuthorized { target: Uuid, user_id: Uuid },

    // 冲突类错误（客户端可重新读取后重试）
    #[error("Role {role} on {target} has already been decided")]
    AlreadyDecided { target: Uuid, role: ApprovalRole },

    #[error("{target} is in terminal state {status}")]
    TerminalState { target: Uuid, status: String },

    #[error("Permit {permit_id} already has extension {extension_id} in progress")]
    ExtensionInProgress { permit_id: Uuid, extension_id: Uuid },

    #[error("Cannot {action} permit {permit_id} in state {from}")]
    InvalidTransition {
        permit_id: Uuid,
        from: String,
        action: &'static str,
    },

    // 校验类错误
    #[error("A rejection reason is required for {target}")]
    ReasonRequired { target: Uuid },

    #[error("A signature is required to approve {target}")]
    SignatureRequired { target: Uuid },

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Resource not found: {0}")]
    NotFound(String),

    #[error("Authentication failed")]
    Unauthorized,

    // 基础设施错误
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Internal server error: {0}")]
    Internal(String),
}

impl AppError {
    /// 获取 HTTP 状态码
    pub fn status_code(&self) -> StatusCode {
        match self {
            AppError::NoApproversConfigured { .. } => StatusCode::UNPROCESSABLE_ENTITY,
            AppError::NotAuthorized { .. } => StatusCode::FORBIDDEN,
            AppError::AlreadyDecided { .. }
            | AppError::TerminalState { .. }
            | AppError::ExtensionInProgress { .. }
            | AppError::InvalidTransition { .. } => StatusCode::CONFLICT,
            AppError::ReasonRequired { .. }
            | AppError::SignatureRequired { .. }
            | AppError::Validation(_) => StatusCode::BAD_REQUEST,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::Unauthorized => StatusCode::UNAUTHORIZED,
            AppError::Database(_) | AppError::Config(_) | AppError::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    /// 机器可读的错误类型
    pub fn kind(&self) -> &'static str {
        match self {
            AppError::NoApproversConfigured { .. } => "no_approvers_configured",
            AppError::NotAuthorized { .. } => "not_authorized",
            AppError::AlreadyDecided { .. } => "already_decided",
            AppError::TerminalState { .. } => "terminal_state",
            AppError::ExtensionInProgress { .. } => "extension_in_progress",
            AppError::InvalidTransition { .. } => "invalid_transition",
            AppError::ReasonRequired { .. } => "reason_required",
            AppError::SignatureRequired { .. } => "signature_required",
            AppError::Validation(_) => "validation",
            AppError::NotFound(_) => "not_found",
            AppError::Unauthorized => "unauthorized",
            AppError::Database(_) => "database",
            AppError::Config(_) => "config",
            AppError::Internal(_) => "internal",
        }
    }

    /// 获取用户友好的错误消息（不包含敏感信息）
    pub fn user_message(&self) -> String {
        match self {
            AppError::Database(_) => "Database error occurred".to_string(),
            AppError::Config(_) => "Configuration error".to_string(),
            AppError::Internal(_) => "Internal server error".to_string(),
            other => other.to_string(),
        }
    }

    /// 获取错误码
    pub fn code(&self) -> u16 {
        self.status_code().as_u16()
    }

    /// 并发下的预期冲突，调用方可重新读取后再决定是否重试
    pub fn is_conflict(&self) -> bool {
        self.status_code() == StatusCode::CONFLICT
    }

    // 便捷方法
    pub fn not_found(msg: impl Into<String>) -> Self {
        AppError::NotFound(msg.into())
    }

    pub fn validation(msg: impl Into<String>) -> Self {
        AppError::Validation(msg.into())
    }

    pub fn internal_error(msg: impl Into<String>) -> Self {
        AppError::Internal(msg.into())
    }
}

/// 错误响应 DTO
#[derive(Serialize)]
pub struct ErrorResponse {
    pub error: ErrorDetail,
}

#[derive(Serialize)]
pub struct ErrorDetail {
    pub code: u16,
    pub kind: &'static str,
    pub message: String,
    pub request_id: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let request_id = uuid::Uuid::new_v4().to_string();

        let error_response = ErrorResponse {
            error: ErrorDetail {
                code: self.code(),
                kind: self.kind(),
                message: self.user_message(),
                request_id,
            },
        };

        if status.is_server_error() {
            tracing::error!(
                code = self.code(),
                message = %self,
                request_id = %error_response.error.request_id,
                "Application error"
            );
        } else {
            tracing::warn!(
                code = self.code(),
                kind = self.kind(),
                message = %self,
                request_id = %error_response.error.request_id,
                "Request rejected"
            );
        }

        (status, Json(error_response)).into_response()
    }
}

/// 从 config::ConfigError 转换
impl From<config::ConfigError> for AppError {
    fn from(e: config::ConfigError) -> Self {
        AppError::Config(e.to_string())
    }
}

/// 从 validator::ValidationErrors 转换
impl From<validator::ValidationErrors> for AppError {
    fn from(e: validator::ValidationErrors) -> Self {
        AppError::Validation(e.to_string())
    }
}
