//! Database access
//! 许可证库的连接池、嵌入式迁移，以及供 /ready 使用的库表完整性检查

use crate::config::DatabaseConfig;
use secrecy::ExposeSecret;
use sqlx::{postgres::PgPoolOptions, PgPool};
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// 审批引擎依赖的库对象，缺少任何一个都视为未就绪
pub const SCHEMA_OBJECTS: &[&str] = &[
    "site_role_assignments",
    "permits",
    "permit_approvals",
    "extension_requests",
    "extension_approvals",
    "permit_serial_seq",
];

pub async fn create_pool(config: &DatabaseConfig) -> Result<PgPool, DbError> {
    let options = PgPoolOptions::new()
        .max_connections(config.max_connections)
        .min_connections(config.min_connections)
        .acquire_timeout(Duration::from_secs(config.acquire_timeout_secs))
        .idle_timeout(Duration::from_secs(config.idle_timeout_secs))
        .max_lifetime(Duration::from_secs(config.max_lifetime_secs))
        .test_before_acquire(true);

    let pool = options
        .connect(config.url.expose_secret())
        .await
        .map_err(|e| {
            error!(error = %e, "Failed to connect to permit database");
            DbError::ConnectionFailed(e.to_string())
        })?;

    info!(
        max_connections = config.max_connections,
        min_connections = config.min_connections,
        "Permit database pool ready"
    );
    Ok(pool)
}

/// 应用 `migrations/` 下的库表迁移
pub async fn run_migrations(pool: &PgPool) -> Result<(), DbError> {
    let migrator = sqlx::migrate!("./migrations");
    info!(migrations = migrator.iter().count(), "Applying permit schema migrations");

    migrator.run(pool).await.map_err(|e| {
        error!(error = %e, "Permit schema migration failed");
        DbError::MigrationFailed(e.to_string())
    })
}

/// 检查数据库可达且许可证库表齐全
pub async fn health_check(pool: &PgPool) -> HealthStatus {
    let expected: Vec<String> = SCHEMA_OBJECTS.iter().map(|name| name.to_string()).collect();

    let missing = sqlx::query_scalar::<_, String>(
        "SELECT name FROM unnest($1::text[]) AS name WHERE to_regclass(name) IS NULL",
    )
    .bind(&expected)
    .fetch_all(pool)
    .await;

    match missing {
        Ok(missing) if missing.is_empty() => {
            debug!("Permit database ready");
            HealthStatus::Healthy
        }
        Ok(missing) => {
            warn!(missing = ?missing, "Permit schema incomplete");
            HealthStatus::SchemaIncomplete(missing)
        }
        Err(e) => {
            warn!(error = %e, "Permit database unreachable");
            HealthStatus::Unreachable(e.to_string())
        }
    }
}

pub fn record_pool_metrics(pool: &PgPool) {
    let size = pool.size() as f64;
    let idle = pool.num_idle() as f64;
    metrics::gauge!("ptw.db.pool.size").set(size);
    metrics::gauge!("ptw.db.pool.idle").set(idle);
    metrics::gauge!("ptw.db.pool.in_use").set(size - idle);
}

#[derive(Debug, thiserror::Error)]
pub enum DbError {
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Migration failed: {0}")]
    MigrationFailed(String),
}

/// 数据库就绪状态
#[derive(Debug, Clone, PartialEq)]
pub enum HealthStatus {
    Healthy,
    /// 列出缺失的库对象
    SchemaIncomplete(Vec<String>),
    Unreachable(String),
}

impl HealthStatus {
    pub fn is_healthy(&self) -> bool {
        matches!(self, HealthStatus::Healthy)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            HealthStatus::Healthy => "healthy",
            HealthStatus::SchemaIncomplete(_) => "schema_incomplete",
            HealthStatus::Unreachable(_) => "unreachable",
        }
    }

    pub fn message(&self) -> Option<String> {
        match self {
            HealthStatus::Healthy => None,
            HealthStatus::SchemaIncomplete(missing) => Some(format!("missing: {}", missing.join(", "))),
            HealthStatus::Unreachable(reason) => Some(reason.clone()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_schema_objects_cover_permit_tables() {
        assert!(SCHEMA_OBJECTS.contains(&"permits"));
        assert!(SCHEMA_OBJECTS.contains(&"permit_serial_seq"));
        assert!(SCHEMA_OBJECTS.contains(&"extension_approvals"));
    }

    #[test]
    fn test_health_status_reports_missing_objects() {
        assert!(HealthStatus::Healthy.is_healthy());
        assert_eq!(HealthStatus::Healthy.message(), None);

        let incomplete = HealthStatus::SchemaIncomplete(vec![
            "permits".to_string(),
            "permit_serial_seq".to_string(),
        ]);
        assert!(!incomplete.is_healthy());
        assert_eq!(incomplete.as_str(), "schema_incomplete");
        assert_eq!(
            incomplete.message().as_deref(),
            Some("missing: permits, permit_serial_seq")
        );

        let down = HealthStatus::Unreachable("Connection refused".to_string());
        assert_eq!(down.as_str(), "unreachable");
    }
}
