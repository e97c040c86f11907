//! Approval ledger rules
//! 单条审批记录的决策前置条件与变更规则
//!
//! 存储层在原子区段内调用这些规则：内存存储在持有条目锁时直接调用
//! [`record_decision`]，Postgres 存储用条件更新完成写入，失败时再用
//! [`check_decidable`] 判定具体错误。

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::error::{AppError, Result};
use crate::models::approval::{ApprovalDecision, ApprovalRecord, ApprovalRole};

/// 一次已校验的决策
#[derive(Debug, Clone, PartialEq)]
pub struct DecisionUpdate {
    pub actor_id: Uuid,
    pub decision: ApprovalDecision,
    pub signature: Option<String>,
    pub reason: Option<String>,
    pub decided_at: DateTime<Utc>,
}

impl DecisionUpdate {
    /// 批准决策，签名不能为空
    pub fn approve(target: Uuid, actor_id: Uuid, signature: &str) -> Result<Self> {
        let signature = signature.trim();
        if signature.is_empty() {
            return Err(AppError::SignatureRequired { target });
        }
        Ok(Self {
            actor_id,
            decision: ApprovalDecision::Approved,
            signature: Some(signature.to_string()),
            reason: None,
            decided_at: Utc::now(),
        })
    }

    /// 拒绝决策，原因不能为空
    pub fn reject(target: Uuid, actor_id: Uuid, reason: &str) -> Result<Self> {
        let reason = reason.trim();
        if reason.is_empty() {
            return Err(AppError::ReasonRequired { target });
        }
        Ok(Self {
            actor_id,
            decision: ApprovalDecision::Rejected,
            signature: None,
            reason: Some(reason.to_string()),
            decided_at: Utc::now(),
        })
    }
}

/// 确定本次决策针对哪个角色
///
/// 显式指定角色时直接使用；否则取该用户绑定的第一个待审批角色。
/// 用户绑定的角色都已决策时回退到第一个绑定角色（后续检查返回 `AlreadyDecided`），
/// 未绑定任何角色时返回 `NotAuthorized`。
pub fn select_role(
    target: Uuid,
    records: &[ApprovalRecord],
    actor_id: Uuid,
    requested: Option<ApprovalRole>,
) -> Result<ApprovalRole> {
    if let Some(role) = requested {
        return Ok(role);
    }

    let mut bound = records.iter().filter(|r| r.approver_id == actor_id).peekable();
    let first_bound = match bound.peek() {
        Some(record) => record.role,
        None => {
            return Err(AppError::NotAuthorized {
                target,
                user_id: actor_id,
            })
        }
    };

    Ok(bound
        .find(|r| r.is_pending())
        .map(|r| r.role)
        .unwrap_or(first_bound))
}

/// 检查某条记录当前是否可以由该用户决策
///
/// 顺序：记录绑定 -> 父对象终态 -> 记录待审批。
pub fn check_decidable(
    target: Uuid,
    record: Option<&ApprovalRecord>,
    role: ApprovalRole,
    actor_id: Uuid,
    terminal_status: Option<&str>,
) -> Result<()> {
    let record = match record {
        Some(record) if record.approver_id == actor_id => record,
        _ => {
            return Err(AppError::NotAuthorized {
                target,
                user_id: actor_id,
            })
        }
    };

    if let Some(status) = terminal_status {
        return Err(AppError::TerminalState {
            target,
            status: status.to_string(),
        });
    }

    if !record.is_pending() {
        return Err(AppError::AlreadyDecided { target, role });
    }

    Ok(())
}

/// 在记录集合上执行一次决策；失败时不做任何修改
pub fn record_decision(
    target: Uuid,
    records: &mut [ApprovalRecord],
    role: ApprovalRole,
    update: &DecisionUpdate,
    terminal_status: Option<&str>,
) -> Result<()> {
    let index = records.iter().position(|r| r.role == role);
    check_decidable(
        target,
        index.map(|i| &records[i]),
        role,
        update.actor_id,
        terminal_status,
    )?;

    if let Some(i) = index {
        apply(&mut records[i], update);
    }
    Ok(())
}

/// 写入决策字段
pub fn apply(record: &mut ApprovalRecord, update: &DecisionUpdate) {
    record.decision = update.decision;
    record.signature = update.signature.clone();
    record.reason = update.reason.clone();
    record.decided_at = Some(update.decided_at);
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ledger(approvers: &[(ApprovalRole, Uuid)]) -> (Uuid, Vec<ApprovalRecord>) {
        let parent = Uuid::new_v4();
        let records = approvers
            .iter()
            .map(|(role, user)| ApprovalRecord::pending(parent, *role, *user))
            .collect();
        (parent, records)
    }

    #[test]
    fn test_approve_requires_signature() {
        let target = Uuid::new_v4();
        let result = DecisionUpdate::approve(target, Uuid::new_v4(), "   ");
        assert!(matches!(result, Err(AppError::SignatureRequired { .. })));
    }

    #[test]
    fn test_reject_requires_reason() {
        let target = Uuid::new_v4();
        let result = DecisionUpdate::reject(target, Uuid::new_v4(), "");
        assert!(matches!(result, Err(AppError::ReasonRequired { .. })));
    }

    #[test]
    fn test_record_decision_by_bound_approver() {
        let u1 = Uuid::new_v4();
        let (parent, mut records) = ledger(&[(ApprovalRole::AreaManager, u1)]);
        let update = DecisionUpdate::approve(parent, u1, "sig-u1").unwrap();

        record_decision(parent, &mut records, ApprovalRole::AreaManager, &update, None).unwrap();

        assert_eq!(records[0].decision, ApprovalDecision::Approved);
        assert_eq!(records[0].signature.as_deref(), Some("sig-u1"));
        assert!(records[0].decided_at.is_some());
    }

    #[test]
    fn test_record_decision_wrong_actor() {
        let u1 = Uuid::new_v4();
        let (parent, mut records) = ledger(&[(ApprovalRole::AreaManager, u1)]);
        let update = DecisionUpdate::approve(parent, Uuid::new_v4(), "sig").unwrap();

        let result =
            record_decision(parent, &mut records, ApprovalRole::AreaManager, &update, None);

        assert!(matches!(result, Err(AppError::NotAuthorized { .. })));
        assert!(records[0].is_pending());
    }

    #[test]
    fn test_record_decision_role_not_required() {
        let u1 = Uuid::new_v4();
        let (parent, mut records) = ledger(&[(ApprovalRole::AreaManager, u1)]);
        let update = DecisionUpdate::approve(parent, u1, "sig").unwrap();

        let result = record_decision(parent, &mut records, ApprovalRole::SiteLeader, &update, None);
        assert!(matches!(result, Err(AppError::NotAuthorized { .. })));
    }

    #[test]
    fn test_second_decision_is_rejected_without_overwrite() {
        let u1 = Uuid::new_v4();
        let (parent, mut records) = ledger(&[(ApprovalRole::SafetyOfficer, u1)]);
        let first = DecisionUpdate::approve(parent, u1, "first").unwrap();
        record_decision(parent, &mut records, ApprovalRole::SafetyOfficer, &first, None).unwrap();
        let snapshot = records[0].clone();

        let second = DecisionUpdate::reject(parent, u1, "changed my mind").unwrap();
        let result =
            record_decision(parent, &mut records, ApprovalRole::SafetyOfficer, &second, None);

        assert!(matches!(
            result,
            Err(AppError::AlreadyDecided {
                role: ApprovalRole::SafetyOfficer,
                ..
            })
        ));
        assert_eq!(records[0], snapshot);
    }

    #[test]
    fn test_terminal_parent_blocks_decision() {
        let u1 = Uuid::new_v4();
        let (parent, mut records) = ledger(&[(ApprovalRole::AreaManager, u1)]);
        let update = DecisionUpdate::approve(parent, u1, "sig").unwrap();

        let result = record_decision(
            parent,
            &mut records,
            ApprovalRole::AreaManager,
            &update,
            Some("rejected"),
        );

        assert!(matches!(result, Err(AppError::TerminalState { .. })));
        assert!(records[0].is_pending());
    }

    #[test]
    fn test_select_role_prefers_pending() {
        let u1 = Uuid::new_v4();
        let (parent, mut records) =
            ledger(&[(ApprovalRole::AreaManager, u1), (ApprovalRole::SafetyOfficer, u1)]);
        records[0].decision = ApprovalDecision::Approved;

        let role = select_role(parent, &records, u1, None).unwrap();
        assert_eq!(role, ApprovalRole::SafetyOfficer);
    }

    #[test]
    fn test_select_role_all_decided_falls_back_to_first_bound() {
        let u1 = Uuid::new_v4();
        let (parent, mut records) = ledger(&[(ApprovalRole::SiteLeader, u1)]);
        records[0].decision = ApprovalDecision::Approved;

        let role = select_role(parent, &records, u1, None).unwrap();
        assert_eq!(role, ApprovalRole::SiteLeader);
    }

    #[test]
    fn test_select_role_unbound_user() {
        let (parent, records) = ledger(&[(ApprovalRole::SiteLeader, Uuid::new_v4())]);
        let result = select_role(parent, &records, Uuid::new_v4(), None);
        assert!(matches!(result, Err(AppError::NotAuthorized { .. })));
    }
}
