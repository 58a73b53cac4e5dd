use crate::{
    config::{BuildEnv, ACTIVE_PLATFORM, FLASH_DEFINITION, TARGET, TARGET_ARCH},
    db::{insert_edges, Edge, EntityKind},
    error::GraphError,
    paths::{to_posix, WorkspacePaths},
    tables::{GenerationContext, TableGenerator},
    view::FirmwareVolume,
};
use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use sqlx::{sqlite::SqliteConnection, FromRow};
use std::{
    path::{Path, PathBuf},
    time::Instant,
};

const CREATE_INSTANCED_FV_TABLE: &str = "\
CREATE TABLE IF NOT EXISTS instanced_fv (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    env INTEGER,
    fv_name TEXT,
    fdf TEXT,
    path TEXT,
    FOREIGN KEY(env) REFERENCES environment(id)
)";

const INSERT_INSTANCED_FV_ROW: &str = "\
INSERT INTO instanced_fv (env, fv_name, fdf, path)
VALUES (?, ?, ?, ?)";

static RULE_OVERRIDE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)^\s*RuleOverride\s*=\s*\S+\s+").expect("RuleOverride pattern is valid")
});

#[derive(Debug, Clone, PartialEq, Eq, FromRow)]
pub struct InstancedFvRow {
    pub id: i64,
    pub env: i64,
    pub fv_name: String,
    pub fdf: String,
    pub path: String,
}

/// The module path of an `INF` statement, without a leading `RuleOverride = <rule>`.
pub fn module_reference(statement: &str) -> &str {
    match RULE_OVERRIDE.find(statement) {
        Some(m) => statement[m.end()..].trim(),
        None => statement.trim(),
    }
}

fn volume_modules(volume: &FirmwareVolume, workspace: &WorkspacePaths) -> Vec<String> {
    volume
        .modules
        .iter()
        .map(|statement| workspace.relative(module_reference(statement)))
        .collect()
}

/// Records the firmware volumes of the active flash layout and the modules each one embeds.
#[derive(Debug, Clone)]
pub struct InstancedFvTable {
    env: BuildEnv,
    fdf: String,
}

impl InstancedFvTable {
    pub fn new(env: &BuildEnv) -> Result<Self, GraphError> {
        let fdf = to_posix(env.require(FLASH_DEFINITION)?);
        env.require(ACTIVE_PLATFORM)?;
        env.target_archs()?;
        env.require(TARGET)?;
        Ok(InstancedFvTable {
            env: env.clone(),
            fdf,
        })
    }

    pub fn flash_definition(&self) -> &str {
        &self.fdf
    }

    fn fdf_name(&self) -> String {
        Path::new(&self.fdf)
            .file_name()
            .map(|name| name.to_string_lossy().to_string())
            .unwrap_or_else(|| self.fdf.clone())
    }
}

/// Build variables that must agree between construction and the run being populated.
const RUN_KEYS: [&str; 4] = [FLASH_DEFINITION, ACTIVE_PLATFORM, TARGET_ARCH, TARGET];

#[async_trait]
impl TableGenerator for InstancedFvTable {
    fn name(&self) -> &str {
        "InstancedFvTable"
    }

    async fn create_tables(&self, conn: &mut SqliteConnection) -> Result<(), GraphError> {
        sqlx::query(CREATE_INSTANCED_FV_TABLE)
            .execute(&mut *conn)
            .await?;
        Ok(())
    }

    async fn populate(
        &self,
        conn: &mut SqliteConnection,
        ctx: &GenerationContext<'_>,
    ) -> Result<(), GraphError> {
        let start = Instant::now();
        self.env.ensure_same(ctx.build_env, &RUN_KEYS)?;
        let layout = ctx
            .documents
            .flash_layout(&PathBuf::from(&self.fdf), ctx.build_env)?;
        let fdf_name = self.fdf_name();
        let fdf_path = ctx.workspace.relative(&self.fdf);

        let mut edge_count = 0;
        for volume in layout.volumes.iter() {
            let id = sqlx::query(INSERT_INSTANCED_FV_ROW)
                .bind(ctx.env.0)
                .bind(&volume.name)
                .bind(&fdf_name)
                .bind(&fdf_path)
                .execute(&mut *conn)
                .await?
                .last_insert_rowid();
            let edges = volume_modules(volume, ctx.workspace)
                .into_iter()
                .map(|module| Edge::new(EntityKind::InstancedFv, id, EntityKind::Module, module))
                .collect::<Vec<Edge>>();
            edge_count += insert_edges(conn, &edges).await?;
        }
        tracing::info!(
            "[InstancedFvTable] Recorded {} firmware volumes and {} embedded modules from {} in {:.2?}",
            layout.volumes.len(),
            edge_count,
            fdf_name,
            start.elapsed()
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_log::test;

    #[test]
    fn rule_override_is_stripped() {
        assert_eq!(module_reference("TestPkg/Driver/Driver.inf"), "TestPkg/Driver/Driver.inf");
        assert_eq!(
            module_reference("RuleOverride = RESET_VECTOR TestPkg/ResetVector/ResetVector.inf"),
            "TestPkg/ResetVector/ResetVector.inf"
        );
        assert_eq!(
            module_reference("  ruleoverride=ACPITABLE   TestPkg/Acpi/Acpi.inf "),
            "TestPkg/Acpi/Acpi.inf"
        );
    }

    #[test]
    fn volume_modules_are_workspace_relative() {
        let workspace = WorkspacePaths::new("/ws").with_package_paths(["/ws/Features"]);
        let volume = FirmwareVolume {
            name: "FVMAIN".to_string(),
            modules: vec![
                "/ws/TestPkg/Driver/Driver.inf".to_string(),
                "RuleOverride = UI /ws/Features/FeaturePkg/Ui/Ui.inf".to_string(),
                "TestPkg\\Pei\\Pei.inf".to_string(),
            ],
        };
        assert_eq!(
            volume_modules(&volume, &workspace),
            vec![
                "TestPkg/Driver/Driver.inf",
                "FeaturePkg/Ui/Ui.inf",
                "TestPkg/Pei/Pei.inf"
            ]
        );
    }

    #[test]
    fn construction_requires_flash_definition() {
        let env = BuildEnv::from_iter([
            (ACTIVE_PLATFORM, "TestPkg/TestPkg.dsc"),
            (TARGET_ARCH, "X64"),
            (TARGET, "DEBUG"),
        ]);
        let err = InstancedFvTable::new(&env).unwrap_err();
        assert!(matches!(err, GraphError::Config(ref msg) if msg.contains(FLASH_DEFINITION)));

        let table = InstancedFvTable::new(&env.with(FLASH_DEFINITION, "TestPkg\\TestPkg.fdf"))
            .unwrap();
        assert_eq!(table.flash_definition(), "TestPkg/TestPkg.fdf");
        assert_eq!(table.fdf_name(), "TestPkg.fdf");
    }
}
