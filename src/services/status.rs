//! Status derivation
//! 从审批记录集合推导聚合状态（纯函数，无副作用）

use serde::Serialize;

use crate::models::{
    approval::{ApprovalDecision, ApprovalRecord},
    extension::ExtensionStatus,
    permit::PermitStatus,
};

/// 审批记录集合的聚合状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AggregateStatus {
    PendingApproval,
    Approved,
    Rejected,
}

/// 推导聚合状态
///
/// 任一拒绝即为拒绝；全部批准才为批准；其余情况（包括空集合）为审批中。
pub fn derive_aggregate<I>(decisions: I) -> AggregateStatus
where
    I: IntoIterator<Item = ApprovalDecision>,
{
    let mut any = false;
    let mut all_approved = true;

    for decision in decisions {
        any = true;
        match decision {
            ApprovalDecision::Rejected => return AggregateStatus::Rejected,
            ApprovalDecision::Pending => all_approved = false,
            ApprovalDecision::Approved => {}
        }
    }

    if any && all_approved {
        AggregateStatus::Approved
    } else {
        AggregateStatus::PendingApproval
    }
}

/// 对审批记录推导聚合状态
pub fn derive_from_records(records: &[ApprovalRecord]) -> AggregateStatus {
    derive_aggregate(records.iter().map(|r| r.decision))
}

/// 初始审批阶段中，一次决策之后许可证应处的状态
pub fn permit_status_for(aggregate: AggregateStatus) -> PermitStatus {
    match aggregate {
        AggregateStatus::PendingApproval => PermitStatus::PendingApproval,
        AggregateStatus::Approved => PermitStatus::Approved,
        AggregateStatus::Rejected => PermitStatus::Rejected,
    }
}

/// 延期申请状态
pub fn extension_status_for(aggregate: AggregateStatus) -> ExtensionStatus {
    match aggregate {
        AggregateStatus::PendingApproval => ExtensionStatus::Pending,
        AggregateStatus::Approved => ExtensionStatus::Approved,
        AggregateStatus::Rejected => ExtensionStatus::Rejected,
    }
}

/// 延期审批结果落到许可证上的状态；仍在审批中时许可证保持 `ExtensionRequested`
pub fn permit_status_after_extension(aggregate: AggregateStatus) -> PermitStatus {
    match aggregate {
        AggregateStatus::PendingApproval => PermitStatus::ExtensionRequested,
        AggregateStatus::Approved => PermitStatus::Extended,
        AggregateStatus::Rejected => PermitStatus::ExtensionRejected,
    }
}

/// 存储的许可证状态是否与其审批记录一致
pub fn permit_status_consistent(status: PermitStatus, records: &[ApprovalRecord]) -> bool {
    let aggregate = derive_from_records(records);
    let any_decided = records.iter().any(|r| r.decision.is_decided());

    match status {
        PermitStatus::Initiated => aggregate == AggregateStatus::PendingApproval && !any_decided,
        PermitStatus::PendingApproval => {
            aggregate == AggregateStatus::PendingApproval && any_decided
        }
        PermitStatus::Rejected => aggregate == AggregateStatus::Rejected,
        PermitStatus::Approved
        | PermitStatus::ReadyToStart
        | PermitStatus::Active
        | PermitStatus::ExtensionRequested
        | PermitStatus::Extended
        | PermitStatus::ExtensionRejected
        | PermitStatus::Closed => aggregate == AggregateStatus::Approved,
    }
}

/// 存储的延期状态是否与其审批记录一致
pub fn extension_status_consistent(status: ExtensionStatus, records: &[ApprovalRecord]) -> bool {
    extension_status_for(derive_from_records(records)) == status
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::approval::ApprovalRole;
    use uuid::Uuid;

    use ApprovalDecision::{Approved, Pending, Rejected};

    fn records(decisions: &[ApprovalDecision]) -> Vec<ApprovalRecord> {
        let parent = Uuid::new_v4();
        decisions
            .iter()
            .zip(ApprovalRole::ALL)
            .map(|(decision, role)| {
                let mut record = ApprovalRecord::pending(parent, role, Uuid::new_v4());
                record.decision = *decision;
                record
            })
            .collect()
    }

    #[test]
    fn test_any_rejection_short_circuits() {
        assert_eq!(derive_aggregate([Pending, Rejected, Pending]), AggregateStatus::Rejected);
        assert_eq!(derive_aggregate([Approved, Approved, Rejected]), AggregateStatus::Rejected);
        assert_eq!(derive_aggregate([Rejected]), AggregateStatus::Rejected);
    }

    #[test]
    fn test_all_approved() {
        assert_eq!(derive_aggregate([Approved, Approved]), AggregateStatus::Approved);
        assert_eq!(derive_aggregate([Approved]), AggregateStatus::Approved);
    }

    #[test]
    fn test_pending_otherwise() {
        assert_eq!(derive_aggregate([Approved, Pending]), AggregateStatus::PendingApproval);
        assert_eq!(derive_aggregate([Pending, Pending]), AggregateStatus::PendingApproval);
    }

    #[test]
    fn test_empty_set_is_never_approved() {
        assert_eq!(derive_aggregate([]), AggregateStatus::PendingApproval);
    }

    #[test]
    fn test_permit_consistency() {
        assert!(permit_status_consistent(PermitStatus::Initiated, &records(&[Pending, Pending])));
        assert!(!permit_status_consistent(PermitStatus::Initiated, &records(&[Approved, Pending])));
        assert!(permit_status_consistent(
            PermitStatus::PendingApproval,
            &records(&[Approved, Pending])
        ));
        assert!(permit_status_consistent(PermitStatus::Rejected, &records(&[Rejected, Pending])));
        assert!(permit_status_consistent(PermitStatus::Active, &records(&[Approved, Approved])));
        assert!(!permit_status_consistent(PermitStatus::Closed, &records(&[Approved, Pending])));
    }

    #[test]
    fn test_extension_consistency() {
        assert!(extension_status_consistent(ExtensionStatus::Pending, &records(&[Approved, Pending])));
        assert!(extension_status_consistent(
            ExtensionStatus::Rejected,
            &records(&[Approved, Rejected])
        ));
        assert!(!extension_status_consistent(
            ExtensionStatus::Approved,
            &records(&[Approved, Pending])
        ));
    }
}
