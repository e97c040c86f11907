//! Permit notification events
//! 审批事件的发布：外部通知模块订阅事件总线后自行投递

use serde::Serialize;
use tokio::sync::broadcast;
use uuid::Uuid;

use crate::models::{
    approval::{ApprovalDecision, ApprovalRole},
    extension::ExtensionStatus,
    permit::PermitStatus,
};

/// 审批事件
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum PermitEvent {
    /// 新许可证已创建，等待审批
    PermitCreated {
        permit_id: Uuid,
        serial: String,
        site_id: Uuid,
        approvers: Vec<Uuid>,
    },
    /// 某个角色作出了决策
    DecisionRecorded {
        permit_id: Uuid,
        role: ApprovalRole,
        decision: ApprovalDecision,
    },
    /// 许可证状态变更
    StatusChanged {
        permit_id: Uuid,
        old_status: PermitStatus,
        new_status: PermitStatus,
    },
    /// 新延期申请
    ExtensionRequested {
        permit_id: Uuid,
        extension_id: Uuid,
        requested_by: Uuid,
    },
    /// 延期申请上某个角色作出了决策
    ExtensionDecisionRecorded {
        permit_id: Uuid,
        extension_id: Uuid,
        role: ApprovalRole,
        decision: ApprovalDecision,
    },
    /// 延期申请已有最终结果
    ExtensionResolved {
        permit_id: Uuid,
        extension_id: Uuid,
        status: ExtensionStatus,
    },
}

impl PermitEvent {
    /// 获取事件类型名称
    pub fn event_type(&self) -> &'static str {
        match self {
            PermitEvent::PermitCreated { .. } => "permit_created",
            PermitEvent::DecisionRecorded { .. } => "decision_recorded",
            PermitEvent::StatusChanged { .. } => "status_changed",
            PermitEvent::ExtensionRequested { .. } => "extension_requested",
            PermitEvent::ExtensionDecisionRecorded { .. } => "extension_decision_recorded",
            PermitEvent::ExtensionResolved { .. } => "extension_resolved",
        }
    }

    pub fn permit_id(&self) -> Uuid {
        match self {
            PermitEvent::PermitCreated { permit_id, .. }
            | PermitEvent::DecisionRecorded { permit_id, .. }
            | PermitEvent::StatusChanged { permit_id, .. }
            | PermitEvent::ExtensionRequested { permit_id, .. }
            | PermitEvent::ExtensionDecisionRecorded { permit_id, .. }
            | PermitEvent::ExtensionResolved { permit_id, .. } => *permit_id,
        }
    }
}

/// 通知出口
///
/// 发布是即发即弃的：实现不得阻塞，也不得把投递失败传回调用方。
pub trait NotificationSink: Send + Sync {
    fn notify(&self, event: PermitEvent);
}

/// 事件总线
#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<PermitEvent>,
}

impl EventBus {
    /// 创建新的事件总线
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    /// 订阅事件
    pub fn subscribe(&self) -> broadcast::Receiver<PermitEvent> {
        self.sender.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl NotificationSink for EventBus {
    fn notify(&self, event: PermitEvent) {
        let event_type = event.event_type();
        let permit_id = event.permit_id();

        // 没有订阅者时 send 返回错误，事件直接丢弃
        if let Err(e) = self.sender.send(event) {
            metrics::counter!("ptw.notifications.dropped", "event" => event_type).increment(1);
            tracing::warn!(
                event = event_type,
                %permit_id,
                error = %e,
                "Notification dropped"
            );
        } else {
            metrics::counter!("ptw.notifications.published", "event" => event_type).increment(1);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_publish_and_receive() {
        let bus = EventBus::new(16);
        let mut rx = bus.subscribe();
        let permit_id = Uuid::new_v4();

        bus.notify(PermitEvent::DecisionRecorded {
            permit_id,
            role: ApprovalRole::SafetyOfficer,
            decision: ApprovalDecision::Approved,
        });

        let event = rx.recv().await.unwrap();
        assert_eq!(event.event_type(), "decision_recorded");
        assert_eq!(event.permit_id(), permit_id);
    }

    #[test]
    fn test_publish_without_subscribers_does_not_fail() {
        let bus = EventBus::new(4);
        assert_eq!(bus.subscriber_count(), 0);
        bus.notify(PermitEvent::StatusChanged {
            permit_id: Uuid::new_v4(),
            old_status: PermitStatus::Initiated,
            new_status: PermitStatus::PendingApproval,
        });
    }

    #[test]
    fn test_event_json_shape() {
        let permit_id = Uuid::new_v4();
        let event = PermitEvent::DecisionRecorded {
            permit_id,
            role: ApprovalRole::SiteLeader,
            decision: ApprovalDecision::Rejected,
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "decision_recorded");
        assert_eq!(json["data"]["role"], "site_leader");
        assert_eq!(json["data"]["decision"], "rejected");
    }
}
