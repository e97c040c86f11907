//! Permit workflow service
//! 许可证创建、逐角色审批与生命周期迁移

use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::types::Json;
use std::sync::Arc;
use tracing::{info, instrument, warn};
use uuid::Uuid;
use validator::Validate;

use crate::error::{AppError, Result};
use crate::models::{
    approval::{ApprovalDecision, ApprovalRecord, ApprovalRole},
    extension::ExtensionStatus,
    permit::{CreatePermitRequest, Permit, PermitDetail, PermitStatus},
};
use crate::realtime::{NotificationSink, PermitEvent};
use crate::repository::{PermitDecisionOutcome, PermitStore, RoleDirectory};
use crate::services::{
    ledger::{self, DecisionUpdate},
    role_resolver::RoleResolver,
    status::{self, AggregateStatus},
};

/// 可以开工的状态
const STARTABLE: &[PermitStatus] = &[PermitStatus::Approved, PermitStatus::ReadyToStart];

/// 可以关闭的状态
const CLOSABLE: &[PermitStatus] = &[
    PermitStatus::Approved,
    PermitStatus::ReadyToStart,
    PermitStatus::Active,
    PermitStatus::Extended,
    PermitStatus::ExtensionRejected,
];

/// 一致性检查结果
#[derive(Debug, Clone, Serialize)]
pub struct ConsistencyReport {
    pub permit_id: Uuid,
    pub stored_status: PermitStatus,
    pub derived_status: AggregateStatus,
    pub permit_consistent: bool,
    pub extensions: Vec<ExtensionConsistency>,
}

impl ConsistencyReport {
    pub fn is_consistent(&self) -> bool {
        self.permit_consistent && self.extensions.iter().all(|e| e.consistent)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ExtensionConsistency {
    pub extension_id: Uuid,
    pub stored_status: ExtensionStatus,
    pub derived_status: AggregateStatus,
    pub consistent: bool,
}

/// 许可证服务
pub struct PermitService {
    store: Arc<dyn PermitStore>,
    resolver: RoleResolver,
    notifier: Arc<dyn NotificationSink>,
    serial_prefix: String,
}

impl PermitService {
    pub fn new(
        store: Arc<dyn PermitStore>,
        directory: Arc<dyn RoleDirectory>,
        notifier: Arc<dyn NotificationSink>,
        serial_prefix: impl Into<String>,
    ) -> Self {
        Self {
            store,
            resolver: RoleResolver::new(directory),
            notifier,
            serial_prefix: serial_prefix.into(),
        }
    }

    /// 创建许可证
    ///
    /// 审批人在此时解析并绑定到审批记录上，之后站点角色的变更不影响该许可证。
    #[instrument(skip(self, request), fields(site_id = %request.site_id, permit_type = %request.permit_type))]
    pub async fn create_permit(
        &self,
        request: CreatePermitRequest,
        creator_id: Uuid,
    ) -> Result<Permit> {
        request.validate()?;
        if request.work_end <= request.work_start {
            return Err(AppError::validation("work_end must be after work_start"));
        }

        let approvers = self.resolver.resolve_required_roles(request.site_id).await?;

        let now = Utc::now();
        let seq = self.store.next_serial().await?;
        let permit = Permit {
            id: Uuid::new_v4(),
            serial: format_serial(&self.serial_prefix, now, seq),
            site_id: request.site_id,
            permit_type: request.permit_type,
            title: request.title.trim().to_string(),
            details: Json(request.details),
            work_start: request.work_start,
            work_end: request.work_end,
            status: PermitStatus::Initiated,
            created_by: creator_id,
            created_at: now,
            updated_at: now,
        };

        let approvals: Vec<ApprovalRecord> = approvers
            .iter()
            .map(|a| ApprovalRecord::pending(permit.id, a.role, a.user_id))
            .collect();

        self.store.insert_permit(&permit, &approvals).await?;

        metrics::counter!("ptw.permits.created", "permit_type" => permit.permit_type.as_str())
            .increment(1);
        info!(
            permit_id = %permit.id,
            serial = %permit.serial,
            approvers = approvals.len(),
            "Permit created"
        );

        self.notifier.notify(PermitEvent::PermitCreated {
            permit_id: permit.id,
            serial: permit.serial.clone(),
            site_id: permit.site_id,
            approvers: approvals.iter().map(|r| r.approver_id).collect(),
        });

        Ok(permit)
    }

    /// 获取许可证详情
    #[instrument(skip(self))]
    pub async fn get_permit(&self, permit_id: Uuid) -> Result<PermitDetail> {
        let permit = self.load_permit(permit_id).await?;
        let approvals = self.store.permit_approvals(permit_id).await?;
        let extensions = self.store.list_extensions(permit_id).await?;

        Ok(PermitDetail {
            permit,
            approvals,
            extensions,
        })
    }

    /// 批准（使用该用户绑定的第一个待审批角色）
    pub async fn approve(&self, permit_id: Uuid, user_id: Uuid, signature: &str) -> Result<Permit> {
        let update = DecisionUpdate::approve(permit_id, user_id, signature)?;
        self.decide(permit_id, None, update).await
    }

    /// 拒绝（使用该用户绑定的第一个待审批角色）
    pub async fn reject(&self, permit_id: Uuid, user_id: Uuid, reason: &str) -> Result<Permit> {
        let update = DecisionUpdate::reject(permit_id, user_id, reason)?;
        self.decide(permit_id, None, update).await
    }

    /// 以指定角色批准
    pub async fn approve_as_role(
        &self,
        permit_id: Uuid,
        user_id: Uuid,
        role: ApprovalRole,
        signature: &str,
    ) -> Result<Permit> {
        let update = DecisionUpdate::approve(permit_id, user_id, signature)?;
        self.decide(permit_id, Some(role), update).await
    }

    /// 以指定角色拒绝
    pub async fn reject_as_role(
        &self,
        permit_id: Uuid,
        user_id: Uuid,
        role: ApprovalRole,
        reason: &str,
    ) -> Result<Permit> {
        let update = DecisionUpdate::reject(permit_id, user_id, reason)?;
        self.decide(permit_id, Some(role), update).await
    }

    #[instrument(
        skip(self, update),
        fields(user_id = %update.actor_id, decision = %update.decision, role)
    )]
    async fn decide(
        &self,
        permit_id: Uuid,
        requested_role: Option<ApprovalRole>,
        update: DecisionUpdate,
    ) -> Result<Permit> {
        self.load_permit(permit_id).await?;
        let records = self.store.permit_approvals(permit_id).await?;
        let role = ledger::select_role(permit_id, &records, update.actor_id, requested_role)?;
        tracing::Span::current().record("role", role.as_str());

        let outcome = self
            .store
            .decide_permit(permit_id, role, &update)
            .await
            .inspect_err(|e| {
                if e.is_conflict() {
                    warn!(%permit_id, role = %role, error = %e, "Decision refused");
                }
            })?;

        metrics::counter!(
            "ptw.decisions.total",
            "target" => "permit",
            "decision" => update.decision.as_str()
        )
        .increment(1);
        info!(
            %permit_id,
            role = %role,
            status = %outcome.permit.status,
            "Decision recorded"
        );

        self.publish_decision(role, update.decision, &outcome);
        Ok(outcome.permit)
    }

    fn publish_decision(
        &self,
        role: ApprovalRole,
        decision: ApprovalDecision,
        outcome: &PermitDecisionOutcome,
    ) {
        let permit_id = outcome.permit.id;
        self.notifier.notify(PermitEvent::DecisionRecorded {
            permit_id,
            role,
            decision,
        });

        if outcome.previous_status != outcome.permit.status {
            self.notifier.notify(PermitEvent::StatusChanged {
                permit_id,
                old_status: outcome.previous_status,
                new_status: outcome.permit.status,
            });
        }
    }

    /// 现场负责人确认准备就绪：Approved -> ReadyToStart
    #[instrument(skip(self))]
    pub async fn mark_ready_to_start(&self, permit_id: Uuid, supervisor_id: Uuid) -> Result<Permit> {
        self.transition(
            permit_id,
            &[PermitStatus::Approved],
            PermitStatus::ReadyToStart,
            "mark ready",
        )
        .await
    }

    /// 开工：只能在作业时间窗口内进行
    #[instrument(skip(self))]
    pub async fn start_permit(&self, permit_id: Uuid) -> Result<Permit> {
        let permit = self.load_permit(permit_id).await?;

        let now = Utc::now();
        if STARTABLE.contains(&permit.status) && !permit.window_contains(now) {
            return Err(AppError::validation(format!(
                "Permit {} can only start between {} and {}",
                permit.serial, permit.work_start, permit.work_end
            )));
        }

        self.transition(permit_id, STARTABLE, PermitStatus::Active, "start")
            .await
    }

    /// 关闭许可证（终态）
    #[instrument(skip(self))]
    pub async fn close_permit(&self, permit_id: Uuid) -> Result<Permit> {
        self.transition(permit_id, CLOSABLE, PermitStatus::Closed, "close")
            .await
    }

    async fn transition(
        &self,
        permit_id: Uuid,
        allowed_from: &[PermitStatus],
        to: PermitStatus,
        action: &'static str,
    ) -> Result<Permit> {
        let before = self.load_permit(permit_id).await?;
        let permit = self
            .store
            .transition_permit(permit_id, allowed_from, to, action)
            .await?;

        info!(%permit_id, from = %before.status, to = %permit.status, "Permit status changed");
        self.notifier.notify(PermitEvent::StatusChanged {
            permit_id,
            old_status: before.status,
            new_status: permit.status,
        });

        Ok(permit)
    }

    /// 该用户仍需审批的许可证
    #[instrument(skip(self))]
    pub async fn list_pending_for(&self, user_id: Uuid) -> Result<Vec<Permit>> {
        self.store.list_pending_for(user_id).await
    }

    /// 该用户已批准或已拒绝的许可证
    #[instrument(skip(self))]
    pub async fn list_decided_for(
        &self,
        user_id: Uuid,
        outcome: ApprovalDecision,
    ) -> Result<Vec<Permit>> {
        if !outcome.is_decided() {
            return Err(AppError::validation(
                "outcome must be either approved or rejected",
            ));
        }
        self.store.list_decided_for(user_id, outcome).await
    }

    /// 用审批记录重新推导状态，并与存储的状态比较
    #[instrument(skip(self))]
    pub async fn verify_consistency(&self, permit_id: Uuid) -> Result<ConsistencyReport> {
        let permit = self.load_permit(permit_id).await?;
        let approvals = self.store.permit_approvals(permit_id).await?;

        let mut extensions = Vec::new();
        for extension in self.store.list_extensions(permit_id).await? {
            let records = self.store.extension_approvals(extension.id).await?;
            extensions.push(ExtensionConsistency {
                extension_id: extension.id,
                stored_status: extension.status,
                derived_status: status::derive_from_records(&records),
                consistent: status::extension_status_consistent(extension.status, &records),
            });
        }

        let report = ConsistencyReport {
            permit_id,
            stored_status: permit.status,
            derived_status: status::derive_from_records(&approvals),
            permit_consistent: status::permit_status_consistent(permit.status, &approvals),
            extensions,
        };

        if !report.is_consistent() {
            warn!(%permit_id, status = %permit.status, "Permit status drift detected");
        }

        Ok(report)
    }

    async fn load_permit(&self, permit_id: Uuid) -> Result<Permit> {
        self.store
            .find_permit(permit_id)
            .await?
            .ok_or_else(|| AppError::not_found(format!("Permit {} not found", permit_id)))
    }
}

/// 许可证编号：{前缀}-{YYYYMMDD}-{序号}
pub fn format_serial(prefix: &str, at: DateTime<Utc>, seq: i64) -> String {
    format!("{}-{}-{:05}", prefix.trim(), at.format("%Y%m%d"), seq)
}
