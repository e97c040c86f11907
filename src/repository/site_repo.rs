//! Site role assignment repository (站点角色分配数据访问)

use async_trait::async_trait;
use sqlx::PgPool;
use uuid::Uuid;

use super::RoleDirectory;
use crate::{error::Result, models::site::SiteRoleAssignment};

pub struct PgRoleDirectory {
    db: PgPool,
}

impl PgRoleDirectory {
    pub fn new(db: PgPool) -> Self {
        Self { db }
    }
}

#[async_trait]
impl RoleDirectory for PgRoleDirectory {
    async fn site_assignment(&self, site_id: Uuid) -> Result<Option<SiteRoleAssignment>> {
        let assignment = sqlx::query_as::<_, SiteRoleAssignment>(
            r#"
            SELECT site_id, area_manager_id, safety_officer_id, site_leader_id, updated_at
            FROM site_role_assignments
            WHERE site_id = $1
            "#,
        )
        .bind(site_id)
        .fetch_optional(&self.db)
        .await?;

        Ok(assignment)
    }
}
