//! Approval ledger models
//! 审批角色、审批决策与审批记录

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// 审批角色（固定集合，按审批顺序排列）
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, sqlx::Type,
)]
#[serde(rename_all = "snake_case")]
#[sqlx(type_name = "approval_role", rename_all = "snake_case")]
pub enum ApprovalRole {
    /// 区域经理
    AreaManager,
    /// 安全员
    SafetyOfficer,
    /// 现场负责人
    SiteLeader,
}

impl ApprovalRole {
    /// 所有角色，顺序即解析和展示顺序
    pub const ALL: [ApprovalRole; 3] = [
        ApprovalRole::AreaManager,
        ApprovalRole::SafetyOfficer,
        ApprovalRole::SiteLeader,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ApprovalRole::AreaManager => "area_manager",
            ApprovalRole::SafetyOfficer => "safety_officer",
            ApprovalRole::SiteLeader => "site_leader",
        }
    }
}

impl fmt::Display for ApprovalRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ApprovalRole {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_lowercase().replace([' ', '-'], "_");
        match normalized.as_str() {
            "area_manager" | "areamanager" => Ok(ApprovalRole::AreaManager),
            "safety_officer" | "safetyofficer" => Ok(ApprovalRole::SafetyOfficer),
            "site_leader" | "siteleader" => Ok(ApprovalRole::SiteLeader),
            _ => Err(format!("Unknown approval role: {}", s)),
        }
    }
}

/// 审批决策状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(type_name = "approval_decision", rename_all = "snake_case")]
pub enum ApprovalDecision {
    /// 待审批
    Pending,
    /// 已批准
    Approved,
    /// 已拒绝
    Rejected,
}

impl ApprovalDecision {
    pub fn as_str(&self) -> &'static str {
        match self {
            ApprovalDecision::Pending => "pending",
            ApprovalDecision::Approved => "approved",
            ApprovalDecision::Rejected => "rejected",
        }
    }

    pub fn is_decided(&self) -> bool {
        !matches!(self, ApprovalDecision::Pending)
    }
}

impl fmt::Display for ApprovalDecision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 审批记录
///
/// 许可证和延期申请共用同一结构，`parent_id` 指向所属的许可证或延期申请。
/// 审批人在创建时绑定，之后不再重新解析。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct ApprovalRecord {
    pub id: Uuid,
    pub parent_id: Uuid,
    pub role: ApprovalRole,
    pub approver_id: Uuid,

    // 决策
    pub decision: ApprovalDecision,
    pub signature: Option<String>,
    pub reason: Option<String>,
    pub decided_at: Option<DateTime<Utc>>,

    pub created_at: DateTime<Utc>,
}

impl ApprovalRecord {
    /// 为某个角色创建待审批记录
    pub fn pending(parent_id: Uuid, role: ApprovalRole, approver_id: Uuid) -> Self {
        Self {
            id: Uuid::new_v4(),
            parent_id,
            role,
            approver_id,
            decision: ApprovalDecision::Pending,
            signature: None,
            reason: None,
            decided_at: None,
            created_at: Utc::now(),
        }
    }

    pub fn is_pending(&self) -> bool {
        self.decision == ApprovalDecision::Pending
    }
}

/// 某个站点上某个角色对应的审批人
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RequiredApprover {
    pub role: ApprovalRole,
    pub user_id: Uuid,
}

/// 批准请求
#[derive(Debug, Deserialize)]
pub struct ApproveRequest {
    #[serde(default)]
    pub signature: String,
    /// 同一用户在站点上持有多个角色时指定角色
    #[serde(default)]
    pub role: Option<ApprovalRole>,
}

/// 拒绝请求
#[derive(Debug, Deserialize)]
pub struct RejectRequest {
    #[serde(default)]
    pub reason: String,
    #[serde(default)]
    pub role: Option<ApprovalRole>,
}

/// 已决策列表过滤条件
#[derive(Debug, Deserialize)]
pub struct DecidedFilter {
    pub outcome: ApprovalDecision,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_role_from_str() {
        assert_eq!("area_manager".parse::<ApprovalRole>(), Ok(ApprovalRole::AreaManager));
        assert_eq!("Safety Officer".parse::<ApprovalRole>(), Ok(ApprovalRole::SafetyOfficer));
        assert_eq!(" site-leader ".parse::<ApprovalRole>(), Ok(ApprovalRole::SiteLeader));
        assert!("supervisor".parse::<ApprovalRole>().is_err());
    }

    #[test]
    fn test_role_order() {
        let mut roles = vec![
            ApprovalRole::SiteLeader,
            ApprovalRole::AreaManager,
            ApprovalRole::SafetyOfficer,
        ];
        roles.sort();
        assert_eq!(roles, ApprovalRole::ALL.to_vec());
    }

    #[test]
    fn test_role_serde_wire_name() {
        let json = serde_json::to_string(&ApprovalRole::SafetyOfficer).unwrap();
        assert_eq!(json, "\"safety_officer\"");
    }

    #[test]
    fn test_pending_record() {
        let parent = Uuid::new_v4();
        let approver = Uuid::new_v4();
        let record = ApprovalRecord::pending(parent, ApprovalRole::SiteLeader, approver);
        assert!(record.is_pending());
        assert_eq!(record.parent_id, parent);
        assert!(record.signature.is_none());
        assert!(record.decided_at.is_none());
    }
}
