//! Permit repository (Postgres)
//!
//! 决策写入使用条件更新 `... AND decision = 'pending'`，同一角色的并发决策只有一个能成功。
//! 写入成功后再锁定父记录行重算状态，不同角色的决策写入互不阻塞，
//! 状态重算读取的是已提交的完整记录集合。

use async_trait::async_trait;
use sqlx::{PgPool, Postgres, Transaction};
use tracing::{debug, error};
use uuid::Uuid;

use super::{
    stamp_extension, transition_error, ExtensionDecisionOutcome, ExtensionInsertOutcome,
    PermitDecisionOutcome, PermitStore,
};
use crate::error::{AppError, Result};
use crate::models::{
    approval::{ApprovalDecision, ApprovalRecord, ApprovalRole},
    extension::{ExtensionRequest, ExtensionStatus},
    permit::{Permit, PermitStatus},
};
use crate::services::{ledger, ledger::DecisionUpdate, status};

pub struct PgPermitStore {
    db: PgPool,
}

impl PgPermitStore {
    pub fn new(db: PgPool) -> Self {
        Self { db }
    }

    async fn insert_approvals(
        tx: &mut Transaction<'_, Postgres>,
        table: &str,
        approvals: &[ApprovalRecord],
    ) -> Result<()> {
        let sql = format!(
            r#"
            INSERT INTO {table} (
                id, parent_id, role, approver_id,
                decision, signature, reason, decided_at, created_at
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            "#
        );

        for record in approvals {
            sqlx::query(&sql)
                .bind(record.id)
                .bind(record.parent_id)
                .bind(record.role)
                .bind(record.approver_id)
                .bind(record.decision)
                .bind(&record.signature)
                .bind(&record.reason)
                .bind(record.decided_at)
                .bind(record.created_at)
                .execute(&mut **tx)
                .await?;
        }
        Ok(())
    }

    /// 条件写入一条审批记录，返回是否命中
    async fn write_decision(
        tx: &mut Transaction<'_, Postgres>,
        table: &str,
        parent_id: Uuid,
        role: ApprovalRole,
        update: &DecisionUpdate,
    ) -> Result<bool> {
        let sql = format!(
            r#"
            UPDATE {table}
            SET decision = $4, signature = $5, reason = $6, decided_at = $7
            WHERE parent_id = $1 AND role = $2 AND approver_id = $3 AND decision = 'pending'
            "#
        );

        let result = sqlx::query(&sql)
            .bind(parent_id)
            .bind(role)
            .bind(update.actor_id)
            .bind(update.decision)
            .bind(&update.signature)
            .bind(&update.reason)
            .bind(update.decided_at)
            .execute(&mut **tx)
            .await
            .map_err(|e| {
                error!(error = %e, %parent_id, %role, "Failed to write approval decision");
                AppError::from(e)
            })?;

        Ok(result.rows_affected() == 1)
    }

    async fn load_approvals<'e, E>(executor: E, table: &str, parent_id: Uuid) -> Result<Vec<ApprovalRecord>>
    where
        E: sqlx::PgExecutor<'e>,
    {
        let sql = format!("SELECT * FROM {table} WHERE parent_id = $1 ORDER BY role");
        let records = sqlx::query_as::<_, ApprovalRecord>(&sql)
            .bind(parent_id)
            .fetch_all(executor)
            .await?;
        Ok(records)
    }

    async fn lock_permit(tx: &mut Transaction<'_, Postgres>, permit_id: Uuid) -> Result<Permit> {
        sqlx::query_as::<_, Permit>("SELECT * FROM permits WHERE id = $1 FOR UPDATE")
            .bind(permit_id)
            .fetch_optional(&mut **tx)
            .await?
            .ok_or_else(|| AppError::not_found("Permit not found"))
    }

    async fn lock_extension(
        tx: &mut Transaction<'_, Postgres>,
        extension_id: Uuid,
    ) -> Result<ExtensionRequest> {
        sqlx::query_as::<_, ExtensionRequest>(
            "SELECT * FROM extension_requests WHERE id = $1 FOR UPDATE",
        )
        .bind(extension_id)
        .fetch_optional(&mut **tx)
        .await?
        .ok_or_else(|| AppError::not_found("Extension request not found"))
    }

    /// 条件写入未命中时，判定具体失败原因
    async fn classify_miss(
        tx: &mut Transaction<'_, Postgres>,
        table: &str,
        target: Uuid,
        role: ApprovalRole,
        actor_id: Uuid,
        terminal_status: Option<&str>,
    ) -> AppError {
        let sql = format!("SELECT * FROM {table} WHERE parent_id = $1 AND role = $2");
        let record = match sqlx::query_as::<_, ApprovalRecord>(&sql)
            .bind(target)
            .bind(role)
            .fetch_optional(&mut **tx)
            .await
        {
            Ok(record) => record,
            Err(e) => return AppError::from(e),
        };

        match ledger::check_decidable(target, record.as_ref(), role, actor_id, terminal_status) {
            Err(e) => e,
            // 记录在两次读取之间不会回到待审批
            Ok(()) => AppError::AlreadyDecided { target, role },
        }
    }

    async fn pending_extension_id<'e, E>(executor: E, permit_id: Uuid) -> Result<Option<Uuid>>
    where
        E: sqlx::PgExecutor<'e>,
    {
        let id = sqlx::query_scalar::<_, Uuid>(
            "SELECT id FROM extension_requests WHERE permit_id = $1 AND status = 'pending'",
        )
        .bind(permit_id)
        .fetch_optional(executor)
        .await?;
        Ok(id)
    }
}

#[async_trait]
impl PermitStore for PgPermitStore {
    async fn next_serial(&self) -> Result<i64> {
        let seq = sqlx::query_scalar::<_, i64>("SELECT nextval('permit_serial_seq')")
            .fetch_one(&self.db)
            .await?;
        Ok(seq)
    }

    async fn insert_permit(&self, permit: &Permit, approvals: &[ApprovalRecord]) -> Result<()> {
        let mut tx = self.db.begin().await?;

        sqlx::query(
            r#"
            INSERT INTO permits (
                id, serial, site_id, permit_type, title, details,
                work_start, work_end, status, created_by, created_at, updated_at
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
            "#,
        )
        .bind(permit.id)
        .bind(&permit.serial)
        .bind(permit.site_id)
        .bind(permit.permit_type)
        .bind(&permit.title)
        .bind(&permit.details)
        .bind(permit.work_start)
        .bind(permit.work_end)
        .bind(permit.status)
        .bind(permit.created_by)
        .bind(permit.created_at)
        .bind(permit.updated_at)
        .execute(&mut *tx)
        .await
        .map_err(|e| {
            error!(error = %e, permit_id = %permit.id, "Failed to insert permit");
            AppError::from(e)
        })?;

        Self::insert_approvals(&mut tx, "permit_approvals", approvals).await?;

        tx.commit().await?;
        Ok(())
    }

    async fn find_permit(&self, permit_id: Uuid) -> Result<Option<Permit>> {
        let permit = sqlx::query_as::<_, Permit>("SELECT * FROM permits WHERE id = $1")
            .bind(permit_id)
            .fetch_optional(&self.db)
            .await?;
        Ok(permit)
    }

    async fn permit_approvals(&self, permit_id: Uuid) -> Result<Vec<ApprovalRecord>> {
        Self::load_approvals(&self.db, "permit_approvals", permit_id).await
    }

    async fn decide_permit(
        &self,
        permit_id: Uuid,
        role: ApprovalRole,
        update: &DecisionUpdate,
    ) -> Result<PermitDecisionOutcome> {
        let mut tx = self.db.begin().await?;

        let written =
            Self::write_decision(&mut tx, "permit_approvals", permit_id, role, update).await?;
        let permit = Self::lock_permit(&mut tx, permit_id).await?;
        let terminal = permit.status.is_terminal().then(|| permit.status.as_str());

        if !written {
            let err = Self::classify_miss(
                &mut tx,
                "permit_approvals",
                permit_id,
                role,
                update.actor_id,
                terminal,
            )
            .await;
            debug!(%permit_id, %role, error = %err, "Decision not applied");
            return Err(err);
        }

        // 终态时丢弃事务，已写入的记录随之回滚
        if let Some(status) = terminal {
            return Err(AppError::TerminalState {
                target: permit_id,
                status: status.to_string(),
            });
        }

        let approvals = Self::load_approvals(&mut *tx, "permit_approvals", permit_id).await?;
        let previous_status = permit.status;
        let next_status = if previous_status.in_approval_phase() {
            status::permit_status_for(status::derive_from_records(&approvals))
        } else {
            previous_status
        };

        let permit = sqlx::query_as::<_, Permit>(
            "UPDATE permits SET status = $2, updated_at = NOW() WHERE id = $1 RETURNING *",
        )
        .bind(permit_id)
        .bind(next_status)
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;

        Ok(PermitDecisionOutcome {
            permit,
            approvals,
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
        let updated = sqlx::query_as::<_, Permit>(
            r#"
            UPDATE permits SET status = $2, updated_at = NOW()
            WHERE id = $1 AND status = ANY($3)
            RETURNING *
            "#,
        )
        .bind(permit_id)
        .bind(to)
        .bind(allowed_from)
        .fetch_optional(&self.db)
        .await?;

        if let Some(permit) = updated {
            return Ok(permit);
        }

        let current = self
            .find_permit(permit_id)
            .await?
            .ok_or_else(|| AppError::not_found("Permit not found"))?;
        Err(transition_error(&current, action))
    }

    async fn list_pending_for(&self, user_id: Uuid) -> Result<Vec<Permit>> {
        let permits = sqlx::query_as::<_, Permit>(
            r#"
            SELECT p.* FROM permits p
            WHERE p.status IN ('initiated', 'pending_approval')
              AND EXISTS (
                SELECT 1 FROM permit_approvals a
                WHERE a.parent_id = p.id AND a.approver_id = $1 AND a.decision = 'pending'
              )
            ORDER BY p.created_at DESC
            "#,
        )
        .bind(user_id)
        .fetch_all(&self.db)
        .await?;
        Ok(permits)
    }

    async fn list_decided_for(
        &self,
        user_id: Uuid,
        outcome: ApprovalDecision,
    ) -> Result<Vec<Permit>> {
        let permits = sqlx::query_as::<_, Permit>(
            r#"
            SELECT p.* FROM permits p
            WHERE EXISTS (
                SELECT 1 FROM permit_approvals a
                WHERE a.parent_id = p.id AND a.approver_id = $1 AND a.decision = $2
            )
            ORDER BY p.created_at DESC
            "#,
        )
        .bind(user_id)
        .bind(outcome)
        .fetch_all(&self.db)
        .await?;
        Ok(permits)
    }

    async fn insert_extension(
        &self,
        extension: &ExtensionRequest,
        approvals: &[ApprovalRecord],
    ) -> Result<ExtensionInsertOutcome> {
        let mut tx = self.db.begin().await?;

        let permit = Self::lock_permit(&mut tx, extension.permit_id).await?;
        if let Some(extension_id) = Self::pending_extension_id(&mut *tx, permit.id).await? {
            return Err(AppError::ExtensionInProgress {
                permit_id: permit.id,
                extension_id,
            });
        }
        let extension = stamp_extension(&permit, extension)?;

        let inserted = sqlx::query(
            r#"
            INSERT INTO extension_requests (
                id, permit_id, original_end, requested_end, reason,
                requested_by, status, created_at, resolved_at
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            "#,
        )
        .bind(extension.id)
        .bind(extension.permit_id)
        .bind(extension.original_end)
        .bind(extension.requested_end)
        .bind(&extension.reason)
        .bind(extension.requested_by)
        .bind(extension.status)
        .bind(extension.created_at)
        .bind(extension.resolved_at)
        .execute(&mut *tx)
        .await;

        if let Err(e) = inserted {
            // 部分唯一索引兜底：每个许可证最多一个未决延期
            let unique_violation = matches!(
                &e,
                sqlx::Error::Database(db_err) if db_err.is_unique_violation()
            );
            if !unique_violation {
                return Err(AppError::from(e));
            }
            tx.rollback().await?;
            return match Self::pending_extension_id(&self.db, extension.permit_id).await? {
                Some(outstanding) => Err(AppError::ExtensionInProgress {
                    permit_id: extension.permit_id,
                    extension_id: outstanding,
                }),
                None => Err(AppError::from(e)),
            };
        }

        Self::insert_approvals(&mut tx, "extension_approvals", approvals).await?;

        let updated = sqlx::query_as::<_, Permit>(
            "UPDATE permits SET status = 'extension_requested', updated_at = NOW() WHERE id = $1 RETURNING *",
        )
        .bind(extension.permit_id)
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(ExtensionInsertOutcome {
            extension,
            permit: updated,
            previous_status: permit.status,
        })
    }

    async fn find_extension(&self, extension_id: Uuid) -> Result<Option<ExtensionRequest>> {
        let extension =
            sqlx::query_as::<_, ExtensionRequest>("SELECT * FROM extension_requests WHERE id = $1")
                .bind(extension_id)
                .fetch_optional(&self.db)
                .await?;
        Ok(extension)
    }

    async fn extension_approvals(&self, extension_id: Uuid) -> Result<Vec<ApprovalRecord>> {
        Self::load_approvals(&self.db, "extension_approvals", extension_id).await
    }

    async fn list_extensions(&self, permit_id: Uuid) -> Result<Vec<ExtensionRequest>> {
        let extensions = sqlx::query_as::<_, ExtensionRequest>(
            "SELECT * FROM extension_requests WHERE permit_id = $1 ORDER BY created_at",
        )
        .bind(permit_id)
        .fetch_all(&self.db)
        .await?;
        Ok(extensions)
    }

    async fn list_pending_extensions_for(&self, user_id: Uuid) -> Result<Vec<ExtensionRequest>> {
        let extensions = sqlx::query_as::<_, ExtensionRequest>(
            r#"
            SELECT e.* FROM extension_requests e
            WHERE e.status = 'pending'
              AND EXISTS (
                SELECT 1 FROM extension_approvals a
                WHERE a.parent_id = e.id AND a.approver_id = $1 AND a.decision = 'pending'
              )
            ORDER BY e.created_at DESC
            "#,
        )
        .bind(user_id)
        .fetch_all(&self.db)
        .await?;
        Ok(extensions)
    }

    async fn decide_extension(
        &self,
        extension_id: Uuid,
        role: ApprovalRole,
        update: &DecisionUpdate,
    ) -> Result<ExtensionDecisionOutcome> {
        let mut tx = self.db.begin().await?;

        let written =
            Self::write_decision(&mut tx, "extension_approvals", extension_id, role, update)
                .await?;
        let extension = Self::lock_extension(&mut tx, extension_id).await?;
        let permit = Self::lock_permit(&mut tx, extension.permit_id).await?;

        let terminal = if extension.status.is_terminal() {
            Some(extension.status.as_str())
        } else if permit.status.is_terminal() {
            Some(permit.status.as_str())
        } else {
            None
        };

        if !written {
            return Err(Self::classify_miss(
                &mut tx,
                "extension_approvals",
                extension_id,
                role,
                update.actor_id,
                terminal,
            )
            .await);
        }

        if let Some(status) = terminal {
            return Err(AppError::TerminalState {
                target: extension_id,
                status: status.to_string(),
            });
        }

        let approvals = Self::load_approvals(&mut *tx, "extension_approvals", extension_id).await?;
        let aggregate = status::derive_from_records(&approvals);
        let extension_status = status::extension_status_for(aggregate);

        let extension = sqlx::query_as::<_, ExtensionRequest>(
            r#"
            UPDATE extension_requests
            SET status = $2,
                resolved_at = CASE WHEN $2 = 'pending'::extension_status THEN NULL ELSE NOW() END
            WHERE id = $1
            RETURNING *
            "#,
        )
        .bind(extension_id)
        .bind(extension_status)
        .fetch_one(&mut *tx)
        .await?;

        let work_end = if extension_status == ExtensionStatus::Approved {
            extension.requested_end
        } else {
            permit.work_end
        };

        let permit = sqlx::query_as::<_, Permit>(
            r#"
            UPDATE permits SET status = $2, work_end = $3, updated_at = NOW()
            WHERE id = $1
            RETURNING *
            "#,
        )
        .bind(permit.id)
        .bind(status::permit_status_after_extension(aggregate))
        .bind(work_end)
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;

        Ok(ExtensionDecisionOutcome {
            extension,
            approvals,
            permit,
        })
    }
}
