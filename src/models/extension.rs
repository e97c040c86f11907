//! Extension request models
//! 许可证延期申请

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::Validate;

use super::approval::ApprovalRecord;

/// 延期申请状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(type_name = "extension_status", rename_all = "snake_case")]
pub enum ExtensionStatus {
    Pending,
    Approved,
    Rejected,
}

impl ExtensionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExtensionStatus::Pending => "pending",
            ExtensionStatus::Approved => "approved",
            ExtensionStatus::Rejected => "rejected",
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, ExtensionStatus::Pending)
    }
}

/// 延期申请
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct ExtensionRequest {
    pub id: Uuid,
    pub permit_id: Uuid,
    pub original_end: DateTime<Utc>,
    pub requested_end: DateTime<Utc>,
    pub reason: String,
    pub requested_by: Uuid,
    pub status: ExtensionStatus,
    pub created_at: DateTime<Utc>,
    pub resolved_at: Option<DateTime<Utc>>,
}

/// 延期申请详情
#[derive(Debug, Clone, Serialize)]
pub struct ExtensionDetail {
    pub extension: ExtensionRequest,
    pub approvals: Vec<ApprovalRecord>,
}

/// 发起延期请求
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct CreateExtensionRequest {
    pub new_end_time: DateTime<Utc>,
    #[validate(length(min = 1, max = 2000, message = "reason must be 1-2000 characters"))]
    pub reason: String,
}
