//! Permit domain models
//! 作业许可证及其生命周期状态

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::types::Json;
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;
use validator::Validate;

use super::approval::ApprovalRecord;
use super::extension::ExtensionRequest;

/// 许可证类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(type_name = "permit_type", rename_all = "snake_case")]
pub enum PermitType {
    General,
    HotWork,
    Electrical,
    Height,
    ConfinedSpace,
}

impl PermitType {
    pub const ALL: [PermitType; 5] = [
        PermitType::General,
        PermitType::HotWork,
        PermitType::Electrical,
        PermitType::Height,
        PermitType::ConfinedSpace,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            PermitType::General => "general",
            PermitType::HotWork => "hot_work",
            PermitType::Electrical => "electrical",
            PermitType::Height => "height",
            PermitType::ConfinedSpace => "confined_space",
        }
    }
}

impl fmt::Display for PermitType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PermitType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_lowercase().replace([' ', '-'], "_");
        PermitType::ALL
            .into_iter()
            .find(|t| t.as_str() == normalized || t.as_str().replace('_', "") == normalized)
            .ok_or_else(|| format!("Unknown permit type: {}", s))
    }
}

/// 许可证生命周期状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(type_name = "permit_status", rename_all = "snake_case")]
pub enum PermitStatus {
    /// 已创建，尚无任何审批决策
    Initiated,
    /// 审批中
    PendingApproval,
    /// 所有角色已批准
    Approved,
    /// 任一角色拒绝（终态）
    Rejected,
    /// 主管确认可开工
    ReadyToStart,
    /// 作业进行中
    Active,
    /// 延期审批中
    ExtensionRequested,
    /// 延期已批准
    Extended,
    /// 延期被拒绝
    ExtensionRejected,
    /// 已关闭（终态）
    Closed,
}

impl PermitStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PermitStatus::Initiated => "initiated",
            PermitStatus::PendingApproval => "pending_approval",
            PermitStatus::Approved => "approved",
            PermitStatus::Rejected => "rejected",
            PermitStatus::ReadyToStart => "ready_to_start",
            PermitStatus::Active => "active",
            PermitStatus::ExtensionRequested => "extension_requested",
            PermitStatus::Extended => "extended",
            PermitStatus::ExtensionRejected => "extension_rejected",
            PermitStatus::Closed => "closed",
        }
    }

    /// 终态不再接受任何审批决策
    pub fn is_terminal(&self) -> bool {
        matches!(self, PermitStatus::Rejected | PermitStatus::Closed)
    }

    /// 是否仍处于初始审批阶段
    pub fn in_approval_phase(&self) -> bool {
        matches!(self, PermitStatus::Initiated | PermitStatus::PendingApproval)
    }

    /// 可发起延期申请的状态
    pub fn accepts_extension_request(&self) -> bool {
        matches!(
            self,
            PermitStatus::Active | PermitStatus::Extended | PermitStatus::ExtensionRejected
        )
    }
}

impl fmt::Display for PermitStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 作业许可证
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct Permit {
    pub id: Uuid,
    pub serial: String,
    pub site_id: Uuid,
    pub permit_type: PermitType,
    pub title: String,
    pub details: Json<serde_json::Value>,

    // 作业时间窗口
    pub work_start: DateTime<Utc>,
    pub work_end: DateTime<Utc>,

    pub status: PermitStatus,

    // 审计字段
    pub created_by: Uuid,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Permit {
    /// 给定时间是否落在作业窗口内（含边界）
    pub fn window_contains(&self, at: DateTime<Utc>) -> bool {
        self.work_start <= at && at <= self.work_end
    }
}

/// 许可证详情（含审批记录和延期申请）
#[derive(Debug, Clone, Serialize)]
pub struct PermitDetail {
    pub permit: Permit,
    pub approvals: Vec<ApprovalRecord>,
    pub extensions: Vec<ExtensionRequest>,
}

/// 创建许可证请求
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct CreatePermitRequest {
    pub site_id: Uuid,
    pub permit_type: PermitType,
    #[validate(length(min = 1, max = 200, message = "title must be 1-200 characters"))]
    pub title: String,
    #[serde(default)]
    pub details: serde_json::Value,
    pub work_start: DateTime<Utc>,
    pub work_end: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_permit_type_from_str() {
        assert_eq!("Hot_Work".parse::<PermitType>(), Ok(PermitType::HotWork));
        assert_eq!("confined-space".parse::<PermitType>(), Ok(PermitType::ConfinedSpace));
        assert_eq!("ELECTRICAL".parse::<PermitType>(), Ok(PermitType::Electrical));
        assert_eq!("hotwork".parse::<PermitType>(), Ok(PermitType::HotWork));
        assert!("diving".parse::<PermitType>().is_err());
    }

    #[test]
    fn test_terminal_states() {
        assert!(PermitStatus::Rejected.is_terminal());
        assert!(PermitStatus::Closed.is_terminal());
        assert!(!PermitStatus::Approved.is_terminal());
        assert!(!PermitStatus::ExtensionRejected.is_terminal());
    }

    #[test]
    fn test_extension_request_states() {
        assert!(PermitStatus::Active.accepts_extension_request());
        assert!(PermitStatus::ExtensionRejected.accepts_extension_request());
        assert!(!PermitStatus::ExtensionRequested.accepts_extension_request());
        assert!(!PermitStatus::ReadyToStart.accepts_extension_request());
    }

    #[test]
    fn test_create_request_validation() {
        let request = CreatePermitRequest {
            site_id: Uuid::new_v4(),
            permit_type: PermitType::General,
            title: String::new(),
            details: serde_json::Value::Null,
            work_start: Utc::now(),
            work_end: Utc::now(),
        };
        assert!(request.validate().is_err());
    }
}
