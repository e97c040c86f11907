//! Site role assignment models

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::approval::ApprovalRole;

/// 站点角色分配（每个角色最多一人，未分配的角色不参与审批）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct SiteRoleAssignment {
    pub site_id: Uuid,
    pub area_manager_id: Option<Uuid>,
    pub safety_officer_id: Option<Uuid>,
    pub site_leader_id: Option<Uuid>,
    pub updated_at: DateTime<Utc>,
}

impl SiteRoleAssignment {
    pub fn new(site_id: Uuid) -> Self {
        Self {
            site_id,
            area_manager_id: None,
            safety_officer_id: None,
            site_leader_id: None,
            updated_at: Utc::now(),
        }
    }

    pub fn with(mut self, role: ApprovalRole, user_id: Option<Uuid>) -> Self {
        match role {
            ApprovalRole::AreaManager => self.area_manager_id = user_id,
            ApprovalRole::SafetyOfficer => self.safety_officer_id = user_id,
            ApprovalRole::SiteLeader => self.site_leader_id = user_id,
        }
        self
    }

    /// 获取某个角色的分配人
    pub fn assignee(&self, role: ApprovalRole) -> Option<Uuid> {
        match role {
            ApprovalRole::AreaManager => self.area_manager_id,
            ApprovalRole::SafetyOfficer => self.safety_officer_id,
            ApprovalRole::SiteLeader => self.site_leader_id,
        }
    }
}
