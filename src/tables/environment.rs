//! One row per resolution run, plus every build variable of that run.
use crate::{
    config::{BuildEnv, ACTIVE_PLATFORM, TARGET, TARGET_ARCH},
    db::EnvironmentId,
    error::GraphError,
};
use sqlx::{sqlite::SqliteConnection, FromRow};

const CREATE_ENVIRONMENT_TABLE: &str = "\
CREATE TABLE IF NOT EXISTS environment (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    date TEXT,
    version TEXT,
    arch TEXT,
    target TEXT,
    active_platform TEXT
)";

const CREATE_ENVIRONMENT_VALUES_TABLE: &str = "\
CREATE TABLE IF NOT EXISTS environment_values (
    id INTEGER,
    key TEXT,
    value TEXT,
    FOREIGN KEY(id) REFERENCES environment(id)
)";

const INSERT_ENVIRONMENT_ROW: &str = "\
INSERT INTO environment (date, version, arch, target, active_platform)
VALUES (strftime('%Y-%m-%d %H:%M:%f', 'now'), ?, ?, ?, ?)";

const INSERT_ENVIRONMENT_VALUE: &str = "\
INSERT INTO environment_values (id, key, value)
VALUES (?, ?, ?)";

#[derive(Debug, Clone, PartialEq, Eq, FromRow)]
pub struct Environment {
    pub id: i64,
    pub date: String,
    pub version: String,
    pub arch: Option<String>,
    pub target: Option<String>,
    pub active_platform: Option<String>,
}

impl Environment {
    pub fn env_id(&self) -> EnvironmentId {
        EnvironmentId(self.id)
    }
}

pub async fn create_tables(conn: &mut SqliteConnection) -> Result<(), GraphError> {
    sqlx::query(CREATE_ENVIRONMENT_TABLE)
        .execute(&mut *conn)
        .await?;
    sqlx::query(CREATE_ENVIRONMENT_VALUES_TABLE)
        .execute(&mut *conn)
        .await?;
    Ok(())
}

/// Insert the environment row for a new run. Missing variables are recorded as NULL; generators
/// that need them reject the environment when they are constructed.
pub async fn record(
    conn: &mut SqliteConnection,
    env: &BuildEnv,
) -> Result<EnvironmentId, GraphError> {
    let id = sqlx::query(INSERT_ENVIRONMENT_ROW)
        .bind(env.version())
        .bind(env.get(TARGET_ARCH))
        .bind(env.get(TARGET))
        .bind(env.get(ACTIVE_PLATFORM))
        .execute(&mut *conn)
        .await?
        .last_insert_rowid();
    for (key, value) in env.iter() {
        sqlx::query(INSERT_ENVIRONMENT_VALUE)
            .bind(id)
            .bind(key)
            .bind(value)
            .execute(&mut *conn)
            .await?;
    }
    tracing::debug!(
        "[environment] Recorded environment {} with {} variables",
        id,
        env.len()
    );
    Ok(EnvironmentId(id))
}

/// The most recently recorded environment, if any run has been recorded.
pub async fn latest(conn: &mut SqliteConnection) -> Result<Option<Environment>, GraphError> {
    Ok(sqlx::query_as::<_, Environment>(
        "SELECT * FROM environment ORDER BY date DESC, id DESC LIMIT 1",
    )
    .fetch_optional(&mut *conn)
    .await?)
}

pub async fn all(conn: &mut SqliteConnection) -> Result<Vec<Environment>, GraphError> {
    Ok(
        sqlx::query_as::<_, Environment>("SELECT * FROM environment ORDER BY id")
            .fetch_all(&mut *conn)
            .await?,
    )
}

pub async fn values(
    conn: &mut SqliteConnection,
    env: EnvironmentId,
) -> Result<BuildEnv, GraphError> {
    let rows = sqlx::query_as::<_, (String, String)>(
        "SELECT key, value FROM environment_values WHERE id = ?",
    )
    .bind(env.0)
    .fetch_all(&mut *conn)
    .await?;
    Ok(rows.into_iter().collect())
}
