//! Role resolver
//! 将站点解析为各审批角色的具体审批人

use std::sync::Arc;
use tracing::{debug, instrument, warn};
use uuid::Uuid;

use crate::error::{AppError, Result};
use crate::models::approval::{ApprovalRole, RequiredApprover};
use crate::repository::RoleDirectory;

/// 角色解析器
pub struct RoleResolver {
    directory: Arc<dyn RoleDirectory>,
}

impl RoleResolver {
    pub fn new(directory: Arc<dyn RoleDirectory>) -> Self {
        Self { directory }
    }

    /// 解析站点需要的审批人，按 AreaManager、SafetyOfficer、SiteLeader 排序，
    /// 只包含已分配的角色
    #[instrument(skip(self))]
    pub async fn resolve_required_roles(&self, site_id: Uuid) -> Result<Vec<RequiredApprover>> {
        let assignment = self.directory.site_assignment(site_id).await?;

        let approvers: Vec<RequiredApprover> = match assignment {
            Some(assignment) => ApprovalRole::ALL
                .into_iter()
                .filter_map(|role| {
                    assignment
                        .assignee(role)
                        .map(|user_id| RequiredApprover { role, user_id })
                })
                .collect(),
            None => Vec::new(),
        };

        if approvers.is_empty() {
            warn!(%site_id, "No approvers configured for site");
            return Err(AppError::NoApproversConfigured { site_id });
        }

        debug!(%site_id, count = approvers.len(), "Resolved required approvers");
        Ok(approvers)
    }
}
