//! Persistence layer
//! 审批引擎依赖的存储抽象：站点角色目录与许可证存储
//!
//! 两个 trait 都以 `Arc<dyn ...>` 的形式注入到服务中。Postgres 实现用于生产，
//! 内存实现用于测试和嵌入式场景，两者遵循相同的原子性约定。

use async_trait::async_trait;
use uuid::Uuid;

use crate::error::{AppError, Result};
use crate::models::{
    approval::{ApprovalDecision, ApprovalRecord, ApprovalRole},
    extension::ExtensionRequest,
    permit::{Permit, PermitStatus},
    site::SiteRoleAssignment,
};
use crate::services::ledger::DecisionUpdate;

pub mod memory;
pub mod permit_repo;
pub mod site_repo;

pub use memory::{MemoryPermitStore, MemoryRoleDirectory};
pub use permit_repo::PgPermitStore;
pub use site_repo::PgRoleDirectory;

/// 站点角色目录（由站点管理模块维护，审批引擎只读）
#[async_trait]
pub trait RoleDirectory: Send + Sync {
    /// 获取站点的角色分配，站点不存在时返回 None
    async fn site_assignment(&self, site_id: Uuid) -> Result<Option<SiteRoleAssignment>>;
}

/// 许可证审批决策结果（决策写入与状态重算在同一原子单元内完成）
#[derive(Debug, Clone)]
pub struct PermitDecisionOutcome {
    pub permit: Permit,
    pub approvals: Vec<ApprovalRecord>,
    pub previous_status: PermitStatus,
}

/// 延期审批决策结果
#[derive(Debug, Clone)]
pub struct ExtensionDecisionOutcome {
    pub extension: ExtensionRequest,
    pub approvals: Vec<ApprovalRecord>,
    pub permit: Permit,
}

/// 延期申请写入结果
#[derive(Debug, Clone)]
pub struct ExtensionInsertOutcome {
    /// 以锁定时的许可证结束时间作为 `original_end` 的最终记录
    pub extension: ExtensionRequest,
    pub permit: Permit,
    pub previous_status: PermitStatus,
}

/// 许可证存储
///
/// 决策方法必须以条件写入（仅当记录仍为待审批时）更新单条记录，并在同一原子单元内
/// 读取更新后的完整记录集合、重算父对象状态。
#[async_trait]
pub trait PermitStore: Send + Sync {
    /// 分配下一个许可证序号
    async fn next_serial(&self) -> Result<i64>;

    /// 原子地写入许可证及其全部待审批记录
    async fn insert_permit(&self, permit: &Permit, approvals: &[ApprovalRecord]) -> Result<()>;

    async fn find_permit(&self, permit_id: Uuid) -> Result<Option<Permit>>;

    async fn permit_approvals(&self, permit_id: Uuid) -> Result<Vec<ApprovalRecord>>;

    /// 对许可证的某个角色执行一次决策
    async fn decide_permit(
        &self,
        permit_id: Uuid,
        role: ApprovalRole,
        update: &DecisionUpdate,
    ) -> Result<PermitDecisionOutcome>;

    /// 条件状态迁移：仅当当前状态属于 `allowed_from` 时迁移到 `to`
    async fn transition_permit(
        &self,
        permit_id: Uuid,
        allowed_from: &[PermitStatus],
        to: PermitStatus,
        action: &'static str,
    ) -> Result<Permit>;

    /// 该用户仍需审批的许可证
    async fn list_pending_for(&self, user_id: Uuid) -> Result<Vec<Permit>>;

    /// 该用户已作出指定决策的许可证
    async fn list_decided_for(
        &self,
        user_id: Uuid,
        outcome: ApprovalDecision,
    ) -> Result<Vec<Permit>>;

    /// 原子地写入延期申请及其审批记录，并将许可证置为 `ExtensionRequested`
    ///
    /// 结束时间的校验与 `original_end` 的取值都基于锁定后的许可证。
    /// 已有未决延期时返回 `ExtensionInProgress`。
    async fn insert_extension(
        &self,
        extension: &ExtensionRequest,
        approvals: &[ApprovalRecord],
    ) -> Result<ExtensionInsertOutcome>;

    async fn find_extension(&self, extension_id: Uuid) -> Result<Option<ExtensionRequest>>;

    async fn extension_approvals(&self, extension_id: Uuid) -> Result<Vec<ApprovalRecord>>;

    async fn list_extensions(&self, permit_id: Uuid) -> Result<Vec<ExtensionRequest>>;

    async fn list_pending_extensions_for(&self, user_id: Uuid) -> Result<Vec<ExtensionRequest>>;

    /// 对延期申请的某个角色执行一次决策，并同步更新许可证
    async fn decide_extension(
        &self,
        extension_id: Uuid,
        role: ApprovalRole,
        update: &DecisionUpdate,
    ) -> Result<ExtensionDecisionOutcome>;
}

/// 条件迁移失败时的错误分类
pub(crate) fn transition_error(permit: &Permit, action: &'static str) -> AppError {
    if permit.status.is_terminal() {
        AppError::TerminalState {
            target: permit.id,
            status: permit.status.to_string(),
        }
    } else {
        AppError::InvalidTransition {
            permit_id: permit.id,
            from: permit.status.to_string(),
            action,
        }
    }
}

/// 发起延期时许可证状态的前置检查
pub(crate) fn check_extension_allowed(permit: &Permit) -> Result<()> {
    if permit.status.accepts_extension_request() {
        Ok(())
    } else {
        Err(transition_error(permit, "request extension for"))
    }
}

/// 针对已锁定的许可证校验延期申请，并以当前结束时间填写 `original_end`
pub(crate) fn stamp_extension(
    permit: &Permit,
    extension: &ExtensionRequest,
) -> Result<ExtensionRequest> {
    check_extension_allowed(permit)?;
    if extension.requested_end <= permit.work_end {
        return Err(AppError::validation(format!(
            "New end time must be after the current end time {}",
            permit.work_end
        )));
    }

    let mut stamped = extension.clone();
    stamped.original_end = permit.work_end;
    Ok(stamped)
}
