//! PostgreSQL 存储层集成测试
//!
//! 需要可用的数据库（`PTW_TEST_DATABASE_URL`），运行方式：`cargo test -- --ignored`

use chrono::{Duration, Utc};
use ptw_service::{
    db::{self, HealthStatus},
    error::AppError,
    models::{
        approval::{ApprovalDecision, ApprovalRecord, ApprovalRole},
        extension::{ExtensionRequest, ExtensionStatus},
        permit::PermitStatus,
    },
    repository::PermitStore,
};
use std::sync::Arc;
use uuid::Uuid;

mod common;
use common::PgEnv;

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
#[ignore] // 需要数据库
async fn test_pg_concurrent_approvals_of_same_role_have_one_winner() {
    let env = PgEnv::new().await;
    let (u1, u2) = (Uuid::new_v4(), Uuid::new_v4());
    let site_id = env.site(Some(u1), Some(u2), None).await;

    for round in 0..10 {
        let permit = env.create_permit(site_id).await;
        let permit_id = permit.id;

        let handles: Vec<_> = ["sig-a", "sig-b"]
            .into_iter()
            .map(|signature| {
                let service = Arc::clone(&env.state.permit_service);
                tokio::spawn(async move { service.approve(permit_id, u1, signature).await })
            })
            .collect();

        let mut successes = 0;
        let mut already_decided = 0;
        for handle in handles {
            match handle.await.unwrap() {
                Ok(_) => successes += 1,
                Err(AppError::AlreadyDecided {
                    role: ApprovalRole::AreaManager,
                    ..
                }) => already_decided += 1,
                Err(e) => panic!("round {}: unexpected error {:?}", round, e),
            }
        }
        assert_eq!(successes, 1);
        assert_eq!(already_decided, 1);

        let detail = env.permits().get_permit(permit_id).await.unwrap();
        assert_eq!(detail.approvals[0].decision, ApprovalDecision::Approved);
        assert!(detail.approvals[1].is_pending());
        assert_eq!(detail.permit.status, PermitStatus::PendingApproval);
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
#[ignore] // 需要数据库
async fn test_pg_concurrent_approvals_of_different_roles_reach_approved() {
    let env = PgEnv::new().await;
    let approvers = [Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4()];
    let site_id = env
        .site(Some(approvers[0]), Some(approvers[1]), Some(approvers[2]))
        .await;

    for _ in 0..10 {
        let permit = env.create_permit(site_id).await;
        let permit_id = permit.id;

        let handles: Vec<_> = approvers
            .iter()
            .map(|&user| {
                let service = Arc::clone(&env.state.permit_service);
                tokio::spawn(async move { service.approve(permit_id, user, "signed").await })
            })
            .collect();
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        let detail = env.permits().get_permit(permit_id).await.unwrap();
        assert!(detail
            .approvals
            .iter()
            .all(|r| r.decision == ApprovalDecision::Approved));
        assert_eq!(detail.permit.status, PermitStatus::Approved);

        let report = env.permits().verify_consistency(permit_id).await.unwrap();
        assert!(report.is_consistent());
    }
}

#[tokio::test]
#[ignore] // 需要数据库
async fn test_pg_decision_on_rejected_permit_is_rolled_back() {
    let env = PgEnv::new().await;
    let (u1, u2) = (Uuid::new_v4(), Uuid::new_v4());
    let site_id = env.site(Some(u1), Some(u2), None).await;
    let permit = env.create_permit(site_id).await;

    let rejected = env
        .permits()
        .reject(permit.id, u1, "gas test missing")
        .await
        .unwrap();
    assert_eq!(rejected.status, PermitStatus::Rejected);

    let result = env.permits().approve(permit.id, u2, "sig-u2").await;
    assert!(matches!(result, Err(AppError::TerminalState { target, .. }) if target == permit.id));

    let detail = env.permits().get_permit(permit.id).await.unwrap();
    assert_eq!(detail.permit.status, PermitStatus::Rejected);
    assert_eq!(detail.approvals[0].decision, ApprovalDecision::Rejected);
    assert!(detail.approvals[1].is_pending());
    assert!(detail.approvals[1].signature.is_none());
}

#[tokio::test]
#[ignore] // 需要数据库
async fn test_pg_lifecycle_transitions_are_conditional() {
    let env = PgEnv::new().await;
    let u1 = Uuid::new_v4();
    let site_id = env.site(Some(u1), None, None).await;
    let permit = env.create_permit(site_id).await;

    let result = env
        .store
        .transition_permit(
            permit.id,
            &[PermitStatus::Approved, PermitStatus::ReadyToStart],
            PermitStatus::Active,
            "start",
        )
        .await;
    assert!(matches!(result, Err(AppError::InvalidTransition { .. })));

    env.permits().approve(permit.id, u1, "sig").await.unwrap();
    let ready = env
        .permits()
        .mark_ready_to_start(permit.id, Uuid::new_v4())
        .await
        .unwrap();
    assert_eq!(ready.status, PermitStatus::ReadyToStart);

    let active = env.permits().start_permit(permit.id).await.unwrap();
    assert_eq!(active.status, PermitStatus::Active);

    let closed = env.permits().close_permit(permit.id).await.unwrap();
    assert_eq!(closed.status, PermitStatus::Closed);

    let result = env.permits().close_permit(permit.id).await;
    assert!(matches!(result, Err(AppError::TerminalState { .. })));
}

#[tokio::test]
#[ignore] // 需要数据库
async fn test_pg_rejected_extension_keeps_end_time() {
    let env = PgEnv::new().await;
    let (am, so, sl) = (Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4());
    let site_id = env.site(Some(am), Some(so), Some(sl)).await;
    let permit = env.active_permit(site_id, &[am, so, sl]).await;

    let extension = env
        .extensions()
        .request_extension(permit.id, Uuid::new_v4(), permit.work_end + Duration::hours(4), "crane late")
        .await
        .unwrap();
    assert_eq!(extension.original_end, permit.work_end);

    let second = env
        .extensions()
        .request_extension(permit.id, Uuid::new_v4(), permit.work_end + Duration::hours(5), "again")
        .await;
    assert!(matches!(
        second,
        Err(AppError::ExtensionInProgress { extension_id, .. }) if extension_id == extension.id
    ));

    env.extensions()
        .approve_extension(extension.id, so, "sig-so")
        .await
        .unwrap();
    let resolved = env
        .extensions()
        .reject_extension(extension.id, sl, "schedule conflict")
        .await
        .unwrap();
    assert_eq!(resolved.status, ExtensionStatus::Rejected);
    assert!(resolved.resolved_at.is_some());

    let current = env.permits().get_permit(permit.id).await.unwrap().permit;
    assert_eq!(current.status, PermitStatus::ExtensionRejected);
    assert_eq!(current.work_end, permit.work_end);

    let result = env.extensions().approve_extension(extension.id, so, "late").await;
    assert!(matches!(result, Err(AppError::TerminalState { target, .. }) if target == extension.id));

    let again = env
        .extensions()
        .request_extension(permit.id, Uuid::new_v4(), permit.work_end + Duration::hours(4), "revised")
        .await;
    assert!(again.is_ok());
}

#[tokio::test]
#[ignore] // 需要数据库
async fn test_pg_approved_extension_moves_end_time() {
    let env = PgEnv::new().await;
    let (am, so, sl) = (Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4());
    let site_id = env.site(Some(am), Some(so), Some(sl)).await;
    let permit = env.active_permit(site_id, &[am, so, sl]).await;
    let t1 = permit.work_end;

    let granted = env
        .extensions()
        .request_extension(permit.id, Uuid::new_v4(), t1 + Duration::hours(10), "long job")
        .await
        .unwrap();
    env.extensions()
        .approve_extension(granted.id, sl, "sig-sl")
        .await
        .unwrap();
    let resolved = env
        .extensions()
        .approve_extension(granted.id, so, "sig-so")
        .await
        .unwrap();
    assert_eq!(resolved.status, ExtensionStatus::Approved);

    let current = env.permits().get_permit(permit.id).await.unwrap().permit;
    assert_eq!(current.status, PermitStatus::Extended);
    assert_eq!(current.work_end, t1 + Duration::hours(10));

    // 基于旧结束时间准备的申请在锁定许可证后被拒绝
    let stale = ExtensionRequest {
        id: Uuid::new_v4(),
        permit_id: permit.id,
        original_end: t1,
        requested_end: t1 + Duration::hours(2),
        reason: "prepared before the previous extension resolved".to_string(),
        requested_by: Uuid::new_v4(),
        status: ExtensionStatus::Pending,
        created_at: Utc::now(),
        resolved_at: None,
    };
    let approvals = vec![ApprovalRecord::pending(stale.id, ApprovalRole::SafetyOfficer, so)];
    let result = env.store.insert_extension(&stale, &approvals).await;
    assert!(matches!(result, Err(AppError::Validation(_))));

    let current = env.permits().get_permit(permit.id).await.unwrap();
    assert_eq!(current.permit.work_end, t1 + Duration::hours(10));
    assert_eq!(current.extensions.len(), 1);
}

#[tokio::test]
#[ignore] // 需要数据库
async fn test_pg_health_check_sees_migrated_schema() {
    let env = PgEnv::new().await;

    let status = db::health_check(&env.pool).await;
    assert_eq!(status, HealthStatus::Healthy);
}
