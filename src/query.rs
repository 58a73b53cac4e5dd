//! Read-side queries over a populated store.
//!
//! These answer the structural questions downstream tooling asks of a resolution run: which
//! components were built, which library instances each links, what links a given instance, which
//! modules a firmware volume embeds, and which components none embeds. All of them read through
//! the compiler's pool, so they observe only committed runs.
use crate::{
    db::{DbConnection, EntityKind, EnvironmentId},
    error::GraphError,
    tables::{
        environment::{self, Environment},
        instanced_fv::InstancedFvRow,
        instanced_inf::InstancedInfRow,
        module::ModuleRow,
    },
};
use sqlx::{QueryBuilder, Sqlite};

/// Rows of `instanced_inf` in scope, and the component rows counted as used: embedded in a
/// firmware volume of their own environment, or applications when those are ignored.
const USED_COMPONENTS: &str = "\
WITH params(env, ignore_app, fv_table, module_table) AS (SELECT ?, ?, ?, ?),
scoped AS (
    SELECT i.* FROM instanced_inf i, params p WHERE p.env IS NULL OR i.env = p.env
),
used AS (
    SELECT c.env, c.dsc, c.arch, c.path FROM scoped c, params p
    WHERE c.component IS NULL AND (
        (p.ignore_app AND c.module_type = 'UEFI_APPLICATION' COLLATE NOCASE)
        OR EXISTS (
            SELECT 1 FROM junction j JOIN instanced_fv f ON f.id = CAST(j.key1 AS INTEGER)
            WHERE j.table1 = p.fv_table AND j.table2 = p.module_table
              AND j.key2 = c.path AND f.env = c.env
        )
    )
)";

const UNUSED_COMPONENT_PATHS: &str = "
SELECT DISTINCT path FROM scoped
WHERE component IS NULL AND path NOT IN (SELECT path FROM used)
ORDER BY path";

const UNUSED_LIBRARY_PATHS: &str = "
, linked AS (
    SELECT l.path, EXISTS (
        SELECT 1 FROM used u
        WHERE u.env = l.env AND u.dsc = l.dsc AND u.arch = l.arch AND u.path = l.component
    ) AS in_use
    FROM scoped l WHERE l.component IS NOT NULL
)
SELECT DISTINCT path FROM linked
WHERE NOT in_use AND path NOT IN (SELECT path FROM linked WHERE in_use)
ORDER BY path";

/// Components no firmware volume embeds, and the library instances only they link.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UnusedComponents {
    /// Sorted, distinct component paths.
    pub components: Vec<String>,
    /// Sorted, distinct library instance paths not linked by any used component.
    pub libraries: Vec<String>,
}

/// A component row of one environment and every library instance linked into it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ComponentRecord {
    pub row: InstancedInfRow,
    /// Sorted, distinct library instance paths of the component tree.
    pub libraries: Vec<String>,
}

impl DbConnection {
    pub async fn environments(&self) -> Result<Vec<Environment>, GraphError> {
        let mut conn = self.pool().acquire().await?;
        environment::all(&mut conn).await
    }

    pub async fn latest_environment(&self) -> Result<Option<Environment>, GraphError> {
        let mut conn = self.pool().acquire().await?;
        environment::latest(&mut conn).await
    }

    /// Resolve `env`, falling back to the latest recorded environment.
    async fn environment_or_latest(
        &self,
        env: Option<EnvironmentId>,
    ) -> Result<Option<EnvironmentId>, GraphError> {
        match env {
            Some(env) => Ok(Some(env)),
            None => Ok(self
                .latest_environment()
                .await?
                .map(|latest| latest.env_id())),
        }
    }

    /// Inventory rows of library instances, optionally only those providing `class`.
    pub async fn library_instances(
        &self,
        class: Option<&str>,
    ) -> Result<Vec<ModuleRow>, GraphError> {
        let mut qb = QueryBuilder::<Sqlite>::new(
            "SELECT path, guid, library_class, repo FROM module WHERE library_class IS NOT NULL",
        );
        if let Some(class) = class {
            qb.push(" AND library_class = ")
                .push_bind(class)
                .push(" COLLATE NOCASE");
        }
        qb.push(" ORDER BY path");
        Ok(qb.build_query_as::<ModuleRow>().fetch_all(self.pool()).await?)
    }

    /// Component rows of `env` (the latest environment if `None`), optionally filtered on base
    /// name. An environment without rows yields an empty result.
    pub async fn components(
        &self,
        env: Option<EnvironmentId>,
        name: Option<&str>,
    ) -> Result<Vec<ComponentRecord>, GraphError> {
        let Some(env) = self.environment_or_latest(env).await? else {
            return Ok(Vec::default());
        };
        let mut qb = QueryBuilder::<Sqlite>::new(
            "SELECT id, env, dsc, path, name, arch, component, module_type FROM instanced_inf \
             WHERE component IS NULL AND env = ",
        );
        qb.push_bind(env.0);
        if let Some(name) = name {
            qb.push(" AND name = ").push_bind(name);
        }
        qb.push(" ORDER BY id");
        let rows = qb
            .build_query_as::<InstancedInfRow>()
            .fetch_all(self.pool())
            .await?;

        let mut records = Vec::with_capacity(rows.len());
        for row in rows {
            let libraries = sqlx::query_scalar::<_, String>(
                "SELECT DISTINCT path FROM instanced_inf \
                 WHERE env = ? AND component = ? AND arch = ? AND dsc = ? ORDER BY path",
            )
            .bind(row.env)
            .bind(&row.path)
            .bind(&row.arch)
            .bind(&row.dsc)
            .fetch_all(self.pool())
            .await?;
            records.push(ComponentRecord { row, libraries });
        }
        Ok(records)
    }

    /// Instanced module rows directly linked by the row `id`, in link order.
    pub async fn dependencies(&self, id: i64) -> Result<Vec<InstancedInfRow>, GraphError> {
        Ok(sqlx::query_as::<_, InstancedInfRow>(
            "SELECT i.id, i.env, i.dsc, i.path, i.name, i.arch, i.component, i.module_type \
             FROM junction j JOIN instanced_inf i ON i.id = CAST(j.key2 AS INTEGER) \
             WHERE j.table1 = ? AND j.key1 = ? AND j.table2 = ? ORDER BY j.rowid",
        )
        .bind(EntityKind::InstancedInf.table_name())
        .bind(id.to_string())
        .bind(EntityKind::InstancedInf.table_name())
        .fetch_all(self.pool())
        .await?)
    }

    /// Instanced module rows that directly link the row `id`.
    pub async fn dependents(&self, id: i64) -> Result<Vec<InstancedInfRow>, GraphError> {
        Ok(sqlx::query_as::<_, InstancedInfRow>(
            "SELECT i.id, i.env, i.dsc, i.path, i.name, i.arch, i.component, i.module_type \
             FROM junction j JOIN instanced_inf i ON i.id = CAST(j.key1 AS INTEGER) \
             WHERE j.table1 = ? AND j.table2 = ? AND j.key2 = ? ORDER BY i.id",
        )
        .bind(EntityKind::InstancedInf.table_name())
        .bind(EntityKind::InstancedInf.table_name())
        .bind(id.to_string())
        .fetch_all(self.pool())
        .await?)
    }

    /// Firmware volume rows of `env`, the latest environment if `None`.
    pub async fn volumes(
        &self,
        env: Option<EnvironmentId>,
    ) -> Result<Vec<InstancedFvRow>, GraphError> {
        let Some(env) = self.environment_or_latest(env).await? else {
            return Ok(Vec::default());
        };
        Ok(sqlx::query_as::<_, InstancedFvRow>(
            "SELECT id, env, fv_name, fdf, path FROM instanced_fv WHERE env = ? ORDER BY id",
        )
        .bind(env.0)
        .fetch_all(self.pool())
        .await?)
    }

    /// Components built for the platform but embedded in no firmware volume of their run.
    ///
    /// With `env` set only that environment is considered. With `None` every recorded
    /// environment is, and a path is reported only if none of its instances is used. With
    /// `ignore_app`, `UEFI_APPLICATION` components count as used along with their libraries.
    pub async fn unused_components(
        &self,
        env: Option<EnvironmentId>,
        ignore_app: bool,
    ) -> Result<UnusedComponents, GraphError> {
        let env = env.map(|env| env.0);
        let components =
            sqlx::query_scalar::<_, String>(&format!("{USED_COMPONENTS}{UNUSED_COMPONENT_PATHS}"))
                .bind(env)
                .bind(ignore_app)
                .bind(EntityKind::InstancedFv.table_name())
                .bind(EntityKind::Module.table_name())
                .fetch_all(self.pool())
                .await?;
        let libraries =
            sqlx::query_scalar::<_, String>(&format!("{USED_COMPONENTS}{UNUSED_LIBRARY_PATHS}"))
                .bind(env)
                .bind(ignore_app)
                .bind(EntityKind::InstancedFv.table_name())
                .bind(EntityKind::Module.table_name())
                .fetch_all(self.pool())
                .await?;
        tracing::debug!(
            "[query] {} unused components and {} unused libraries",
            components.len(),
            libraries.len()
        );
        Ok(UnusedComponents {
            components,
            libraries,
        })
    }

    /// Module paths embedded in the firmware volume row `id`, in layout order.
    pub async fn volume_modules(&self, id: i64) -> Result<Vec<String>, GraphError> {
        Ok(sqlx::query_scalar::<_, String>(
            "SELECT key2 FROM junction WHERE table1 = ? AND key1 = ? AND table2 = ? ORDER BY rowid",
        )
        .bind(EntityKind::InstancedFv.table_name())
        .bind(id.to_string())
        .bind(EntityKind::Module.table_name())
        .fetch_all(self.pool())
        .await?)
    }
}
