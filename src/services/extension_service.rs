//! Extension workflow service
//! 延期申请：在缩减的角色集合上重跑一次审批流程

use chrono::{DateTime, Utc};
use std::sync::Arc;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::config::ExtensionPolicy;
use crate::error::{AppError, Result};
use crate::models::{
    approval::{ApprovalRecord, ApprovalRole},
    extension::{ExtensionDetail, ExtensionRequest, ExtensionStatus},
    permit::{Permit, PermitStatus},
};
use crate::realtime::{NotificationSink, PermitEvent};
use crate::repository::{ExtensionDecisionOutcome, PermitStore};
use crate::services::ledger::{self, DecisionUpdate};

/// 延期服务
pub struct ExtensionService {
    store: Arc<dyn PermitStore>,
    notifier: Arc<dyn NotificationSink>,
    policy: ExtensionPolicy,
}

impl ExtensionService {
    pub fn new(
        store: Arc<dyn PermitStore>,
        notifier: Arc<dyn NotificationSink>,
        policy: ExtensionPolicy,
    ) -> Self {
        Self {
            store,
            notifier,
            policy,
        }
    }

    /// 发起延期申请
    ///
    /// 审批人取自许可证自身已绑定的审批记录，只保留延期策略要求的角色。
    /// 这里对结束时间的检查只用于尽早失败，最终校验在存储层锁定许可证后完成。
    #[instrument(skip(self, reason))]
    pub async fn request_extension(
        &self,
        permit_id: Uuid,
        requester_id: Uuid,
        new_end_time: DateTime<Utc>,
        reason: &str,
    ) -> Result<ExtensionRequest> {
        let reason = reason.trim();
        if reason.is_empty() {
            return Err(AppError::validation("Extension reason is required"));
        }

        let permit = self.load_permit(permit_id).await?;
        if new_end_time <= permit.work_end {
            return Err(AppError::validation(format!(
                "New end time must be after the current end time {}",
                permit.work_end
            )));
        }

        let roles = self.policy.roles_for(permit.permit_type);
        let bound = self.store.permit_approvals(permit_id).await?;

        let extension_id = Uuid::new_v4();
        let approvals: Vec<ApprovalRecord> = roles
            .iter()
            .filter_map(|role| bound.iter().find(|r| r.role == *role))
            .map(|r| ApprovalRecord::pending(extension_id, r.role, r.approver_id))
            .collect();

        if approvals.is_empty() {
            warn!(%permit_id, permit_type = %permit.permit_type, "No extension approvers bound to permit");
            return Err(AppError::NoApproversConfigured {
                site_id: permit.site_id,
            });
        }

        let extension = ExtensionRequest {
            id: extension_id,
            permit_id,
            original_end: permit.work_end,
            requested_end: new_end_time,
            reason: reason.to_string(),
            requested_by: requester_id,
            status: ExtensionStatus::Pending,
            created_at: Utc::now(),
            resolved_at: None,
        };

        let inserted = self.store.insert_extension(&extension, &approvals).await?;
        let extension = inserted.extension;

        metrics::counter!("ptw.extensions.requested").increment(1);
        info!(
            %permit_id,
            %extension_id,
            approvers = approvals.len(),
            "Extension requested"
        );

        self.notifier.notify(PermitEvent::ExtensionRequested {
            permit_id,
            extension_id,
            requested_by: requester_id,
        });
        self.notifier.notify(PermitEvent::StatusChanged {
            permit_id,
            old_status: inserted.previous_status,
            new_status: inserted.permit.status,
        });

        Ok(extension)
    }

    pub async fn approve_extension(
        &self,
        extension_id: Uuid,
        user_id: Uuid,
        signature: &str,
    ) -> Result<ExtensionRequest> {
        let update = DecisionUpdate::approve(extension_id, user_id, signature)?;
        self.decide(extension_id, None, update).await
    }

    pub async fn reject_extension(
        &self,
        extension_id: Uuid,
        user_id: Uuid,
        reason: &str,
    ) -> Result<ExtensionRequest> {
        let update = DecisionUpdate::reject(extension_id, user_id, reason)?;
        self.decide(extension_id, None, update).await
    }

    pub async fn approve_extension_as_role(
        &self,
        extension_id: Uuid,
        user_id: Uuid,
        role: ApprovalRole,
        signature: &str,
    ) -> Result<ExtensionRequest> {
        let update = DecisionUpdate::approve(extension_id, user_id, signature)?;
        self.decide(extension_id, Some(role), update).await
    }

    pub async fn reject_extension_as_role(
        &self,
        extension_id: Uuid,
        user_id: Uuid,
        role: ApprovalRole,
        reason: &str,
    ) -> Result<ExtensionRequest> {
        let update = DecisionUpdate::reject(extension_id, user_id, reason)?;
        self.decide(extension_id, Some(role), update).await
    }

    #[instrument(
        skip(self, update),
        fields(user_id = %update.actor_id, decision = %update.decision, role)
    )]
    async fn decide(
        &self,
        extension_id: Uuid,
        requested_role: Option<ApprovalRole>,
        update: DecisionUpdate,
    ) -> Result<ExtensionRequest> {
        self.load_extension(extension_id).await?;
        let records = self.store.extension_approvals(extension_id).await?;
        let role = ledger::select_role(extension_id, &records, update.actor_id, requested_role)?;
        tracing::Span::current().record("role", role.as_str());

        let outcome = self
            .store
            .decide_extension(extension_id, role, &update)
            .await
            .inspect_err(|e| {
                if e.is_conflict() {
                    warn!(%extension_id, role = %role, error = %e, "Extension decision refused");
                }
            })?;

        metrics::counter!(
            "ptw.decisions.total",
            "target" => "extension",
            "decision" => update.decision.as_str()
        )
        .increment(1);
        info!(
            %extension_id,
            permit_id = %outcome.permit.id,
            role = %role,
            status = %outcome.extension.status.as_str(),
            "Extension decision recorded"
        );

        self.publish_decision(role, &update, &outcome);
        Ok(outcome.extension)
    }

    fn publish_decision(
        &self,
        role: ApprovalRole,
        update: &DecisionUpdate,
        outcome: &ExtensionDecisionOutcome,
    ) {
        let permit_id = outcome.permit.id;
        let extension_id = outcome.extension.id;

        self.notifier.notify(PermitEvent::ExtensionDecisionRecorded {
            permit_id,
            extension_id,
            role,
            decision: update.decision,
        });

        if outcome.extension.status.is_terminal() {
            self.notifier.notify(PermitEvent::ExtensionResolved {
                permit_id,
                extension_id,
                status: outcome.extension.status,
            });
            self.notifier.notify(PermitEvent::StatusChanged {
                permit_id,
                old_status: PermitStatus::ExtensionRequested,
                new_status: outcome.permit.status,
            });
        }
    }

    /// 获取延期申请详情
    #[instrument(skip(self))]
    pub async fn get_extension(&self, extension_id: Uuid) -> Result<ExtensionDetail> {
        let extension = self.load_extension(extension_id).await?;
        let approvals = self.store.extension_approvals(extension_id).await?;
        Ok(ExtensionDetail {
            extension,
            approvals,
        })
    }

    /// 许可证的全部延期申请
    #[instrument(skip(self))]
    pub async fn list_extensions(&self, permit_id: Uuid) -> Result<Vec<ExtensionRequest>> {
        self.load_permit(permit_id).await?;
        self.store.list_extensions(permit_id).await
    }

    /// 该用户仍需审批的延期申请
    #[instrument(skip(self))]
    pub async fn list_pending_extensions_for(&self, user_id: Uuid) -> Result<Vec<ExtensionRequest>> {
        self.store.list_pending_extensions_for(user_id).await
    }

    async fn load_permit(&self, permit_id: Uuid) -> Result<Permit> {
        self.store
            .find_permit(permit_id)
            .await?
            .ok_or_else(|| AppError::not_found(format!("Permit {} not found", permit_id)))
    }

    async fn load_extension(&self, extension_id: Uuid) -> Result<ExtensionRequest> {
        self.store.find_extension(extension_id).await?.ok_or_else(|| {
            AppError::not_found(format!("Extension request {} not found", extension_id))
        })
    }
}
