//! In-memory store
//! 基于 DashMap 的存储实现，每个许可证（连同其延期申请）是一个条目，
//! 决策与状态重算在持有条目写锁期间完成

use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;
use std::sync::atomic::{AtomicI64, Ordering};
use uuid::Uuid;

use super::{
    stamp_extension, transition_error, ExtensionDecisionOutcome, ExtensionInsertOutcome,
    PermitDecisionOutcome, PermitStore, RoleDirectory,
};
use crate::error::{AppError, Result};
use crate::models::{
    approval::{ApprovalDecision, ApprovalRecord, ApprovalRole},
    extension::{ExtensionRequest, ExtensionStatus},
    permit::{Permit, PermitStatus},
    site::SiteRoleAssignment,
};
use crate::services::{ledger, ledger::DecisionUpdate, status};

/// 内存角色目录
#[derive(Default)]
pub struct MemoryRoleDirectory {
    sites: DashMap<Uuid, SiteRoleAssignment>,
}

impl MemoryRoleDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// 写入或替换站点的角色分配
    pub fn upsert(&self, assignment: SiteRoleAssignment) {
        self.sites.insert(assignment.site_id, assignment);
    }
}

#[async_trait]
impl RoleDirectory for MemoryRoleDirectory {
    async fn site_assignment(&self, site_id: Uuid) -> Result<Option<SiteRoleAssignment>> {
        Ok(self.sites.get(&site_id).map(|entry| entry.value().clone()))
    }
}

struct ExtensionEntry {
    extension: ExtensionRequest,
    approvals: Vec<ApprovalRecord>,
}

struct PermitEntry {
    permit: Permit,
    approvals: Vec<ApprovalRecord>,
    extensions: Vec<ExtensionEntry>,
}

/// 内存许可证存储
pub struct MemoryPermitStore {
    permits: DashMap<Uuid, PermitEntry>,
    // extension_id -> permit_id
    extension_index: DashMap<Uuid, Uuid>,
    serial: AtomicI64,
}

impl Default for MemoryPermitStore {
    fn default() -> Self {
        Self {
            permits: DashMap::new(),
            extension_index: DashMap::new(),
            serial: AtomicI64::new(0),
        }
    }
}

impl MemoryPermitStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn permit_id_of_extension(&self, extension_id: Uuid) -> Result<Uuid> {
        self.extension_index
            .get(&extension_id)
            .map(|entry| *entry.value())
            .ok_or_else(|| AppError::not_found("Extension request not found"))
    }

    fn collect_permits<F>(&self, predicate: F) -> Vec<Permit>
    where
        F: Fn(&PermitEntry) -> bool,
    {
        let mut permits: Vec<Permit> = self
            .permits
            .iter()
            .filter(|entry| predicate(entry.value()))
            .map(|entry| entry.value().permit.clone())
            .collect();
        permits.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        permits
    }
}

#[async_trait]
impl PermitStore for MemoryPermitStore {
    async fn next_serial(&self) -> Result<i64> {
        Ok(self.serial.fetch_add(1, Ordering::SeqCst) + 1)
    }

    async fn insert_permit(&self, permit: &Permit, approvals: &[ApprovalRecord]) -> Result<()> {
        if self.permits.contains_key(&permit.id) {
            return Err(AppError::internal_error("Duplicate permit id"));
        }
        self.permits.insert(
            permit.id,
            PermitEntry {
                permit: permit.clone(),
                approvals: approvals.to_vec(),
                extensions: Vec::new(),
            },
        );
        Ok(())
    }

    async fn find_permit(&self, permit_id: Uuid) -> Result<Option<Permit>> {
        Ok(self.permits.get(&permit_id).map(|entry| entry.permit.clone()))
    }

    async fn permit_approvals(&self, permit_id: Uuid) -> Result<Vec<ApprovalRecord>> {
        Ok(self
            .permits
            .get(&permit_id)
            .map(|entry| entry.approvals.clone())
            .unwrap_or_default())
    }

    async fn decide_permit(
        &self,
        permit_id: Uuid,
        role: ApprovalRole,
        update: &DecisionUpdate,
    ) -> Result<PermitDecisionOutcome> {
        let mut entry = self
            .permits
            .get_mut(&permit_id)
            .ok_or_else(|| AppError::not_found("Permit not found"))?;
        let entry = entry.value_mut();

        let terminal = entry
            .permit
            .status
            .is_terminal()
            .then(|| entry.permit.status.as_str());
        ledger::record_decision(permit_id, &mut entry.approvals, role, update, terminal)?;

        let previous_status = entry.permit.status;
        if previous_status.in_approval_phase() {
            let aggregate = status::derive_from_records(&entry.approvals);
            entry.permit.status = status::permit_status_for(aggregate);
        }
        entry.permit.updated_at = Utc::now();

        Ok(PermitDecisionOutcome {
            permit: entry.permit.clone(),
            approvals: entry.approvals.clone(),
            previous_status,
        })
    }

    async fn transition_permit(
        &self,
        permit_id: Uuid,
        allowed_from: &[PermitStatus],
        to: PermitStatus,
        action: &'static str,
    ) -> Result<Permit> {
        let mut entry = self
            .permits
            .get_mut(&permit_id)
            .ok_or_else(|| AppError::not_found("Permit not found"))?;

        if !allowed_from.contains(&entry.permit.status) {
            return Err(transition_error(&entry.permit, action));
        }

        entry.permit.status = to;
        entry.permit.updated_at = Utc::now();
        Ok(entry.permit.clone())
    }

    async fn list_pending_for(&self, user_id: Uuid) -> Result<Vec<Permit>> {
        Ok(self.collect_permits(|entry| {
            entry.permit.status.in_approval_phase()
                && entry
                    .approvals
                    .iter()
                    .any(|r| r.approver_id == user_id && r.is_pending())
        }))
    }

    async fn list_decided_for(
        &self,
        user_id: Uuid,
        outcome: ApprovalDecision,
    ) -> Result<Vec<Permit>> {
        Ok(self.collect_permits(|entry| {
            entry
                .approvals
                .iter()
                .any(|r| r.approver_id == user_id && r.decision == outcome)
        }))
    }

    async fn insert_extension(
        &self,
        extension: &ExtensionRequest,
        approvals: &[ApprovalRecord],
    ) -> Result<ExtensionInsertOutcome> {
        let mut entry = self
            .permits
            .get_mut(&extension.permit_id)
            .ok_or_else(|| AppError::not_found("Permit not found"))?;
        let entry = entry.value_mut();

        if let Some(outstanding) = entry
            .extensions
            .iter()
            .find(|e| e.extension.status == ExtensionStatus::Pending)
        {
            return Err(AppError::ExtensionInProgress {
                permit_id: entry.permit.id,
                extension_id: outstanding.extension.id,
            });
        }
        let extension = stamp_extension(&entry.permit, extension)?;

        entry.extensions.push(ExtensionEntry {
            extension: extension.clone(),
            approvals: approvals.to_vec(),
        });
        self.extension_index.insert(extension.id, extension.permit_id);

        let previous_status = entry.permit.status;
        entry.permit.status = PermitStatus::ExtensionRequested;
        entry.permit.updated_at = Utc::now();
        Ok(ExtensionInsertOutcome {
            extension,
            permit: entry.permit.clone(),
            previous_status,
        })
    }

    async fn find_extension(&self, extension_id: Uuid) -> Result<Option<ExtensionRequest>> {
        let Some(permit_id) = self.extension_index.get(&extension_id).map(|e| *e.value()) else {
            return Ok(None);
        };
        Ok(self.permits.get(&permit_id).and_then(|entry| {
            entry
                .extensions
                .iter()
                .find(|e| e.extension.id == extension_id)
                .map(|e| e.extension.clone())
        }))
    }

    async fn extension_approvals(&self, extension_id: Uuid) -> Result<Vec<ApprovalRecord>> {
        let Some(permit_id) = self.extension_index.get(&extension_id).map(|e| *e.value()) else {
            return Ok(Vec::new());
        };
        Ok(self
            .permits
            .get(&permit_id)
            .and_then(|entry| {
                entry
                    .extensions
                    .iter()
                    .find(|e| e.extension.id == extension_id)
                    .map(|e| e.approvals.clone())
            })
            .unwrap_or_default())
    }

    async fn list_extensions(&self, permit_id: Uuid) -> Result<Vec<ExtensionRequest>> {
        Ok(self
            .permits
            .get(&permit_id)
            .map(|entry| entry.extensions.iter().map(|e| e.extension.clone()).collect())
            .unwrap_or_default())
    }

    async fn list_pending_extensions_for(&self, user_id: Uuid) -> Result<Vec<ExtensionRequest>> {
        let mut extensions: Vec<ExtensionRequest> = self
            .permits
            .iter()
            .flat_map(|entry| {
                entry
                    .extensions
                    .iter()
                    .filter(|e| {
                        e.extension.status == ExtensionStatus::Pending
                            && e.approvals
                                .iter()
                                .any(|r| r.approver_id == user_id && r.is_pending())
                    })
                    .map(|e| e.extension.clone())
                    .collect::<Vec<_>>()
            })
            .collect();
        extensions.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(extensions)
    }

    async fn decide_extension(
        &self,
        extension_id: Uuid,
        role: ApprovalRole,
        update: &DecisionUpdate,
    ) -> Result<ExtensionDecisionOutcome> {
        let permit_id = self.permit_id_of_extension(extension_id)?;
        let mut entry = self
            .permits
            .get_mut(&permit_id)
            .ok_or_else(|| AppError::not_found("Permit not found"))?;
        let PermitEntry {
            permit, extensions, ..
        } = entry.value_mut();

        let ext = extensions
            .iter_mut()
            .find(|e| e.extension.id == extension_id)
            .ok_or_else(|| AppError::not_found("Extension request not found"))?;

        let terminal = if ext.extension.status.is_terminal() {
            Some(ext.extension.status.as_str())
        } else if permit.status.is_terminal() {
            Some(permit.status.as_str())
        } else {
            None
        };
        ledger::record_decision(extension_id, &mut ext.approvals, role, update, terminal)?;

        let aggregate = status::derive_from_records(&ext.approvals);
        let now = Utc::now();
        ext.extension.status = status::extension_status_for(aggregate);
        if ext.extension.status.is_terminal() {
            ext.extension.resolved_at = Some(now);
        }

        permit.status = status::permit_status_after_extension(aggregate);
        if ext.extension.status == ExtensionStatus::Approved {
            permit.work_end = ext.extension.requested_end;
        }
        permit.updated_at = now;

        Ok(ExtensionDecisionOutcome {
            extension: ext.extension.clone(),
            approvals: ext.approvals.clone(),
            permit: permit.clone(),
        })
    }
}
