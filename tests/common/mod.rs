//! Shared test utilities for integration tests.
//!
//! Import from integration test files as:
//! ```ignore
//! mod common;
//! ```

use edk2_graph::{
    compiler::GraphCompiler,
    config::{BuildEnv, ACTIVE_PLATFORM, FLASH_DEFINITION, TARGET, TARGET_ARCH},
    db::{db_init, DbConnection, StoreLocation},
    paths::WorkspacePaths,
    tables::instanced_inf::InstancedInfRow,
    view::{
        MemoryDocuments, ModuleDescription, ScopedName, BASE_NAME, FILE_GUID, LIBRARY_CLASS,
        MODULE_TYPE,
    },
};
use std::{path::PathBuf, sync::Arc};

pub const WORKSPACE: &str = "/ws";
pub const DSC: &str = "TestPkg/TestPkg.dsc";
pub const FDF: &str = "TestPkg/TestPkg.fdf";

/// Initialize tracing for tests, respecting RUST_LOG env var.
///
/// Safe to call multiple times; subsequent calls are no-ops.
#[allow(dead_code)]
pub fn init_logging() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init()
        .ok();
}

/// Build variables for a DEBUG build of the test platform.
#[allow(dead_code)]
pub fn build_env(archs: &str) -> BuildEnv {
    BuildEnv::from_iter([
        (ACTIVE_PLATFORM, DSC),
        (TARGET_ARCH, archs),
        (TARGET, "DEBUG"),
        (FLASH_DEFINITION, FDF),
    ])
}

/// A non-library module needing `classes` in every architecture.
#[allow(dead_code)]
pub fn driver(name: &str, module_type: &str, classes: &[&str]) -> ModuleDescription {
    ModuleDescription {
        sources: vec![format!("{name}.c")],
        library_classes: classes.iter().map(|c| ScopedName::common(*c)).collect(),
        ..Default::default()
    }
    .define(BASE_NAME, name)
    .define(MODULE_TYPE, module_type)
    .define(FILE_GUID, format!("{:08x}-0000-0000-0000-000000000000", name.len()))
}

/// A library instance of `class` needing `classes`.
#[allow(dead_code)]
pub fn library(name: &str, class: &str, classes: &[&str]) -> ModuleDescription {
    driver(name, "BASE", classes).define(LIBRARY_CLASS, class)
}

#[allow(dead_code)]
pub fn fixture_path(name: &str) -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("tests")
        .join("fixtures")
        .join(name)
}

/// A compiler over a fresh in-memory store and `documents`, rooted at [`WORKSPACE`].
#[allow(dead_code)]
pub async fn memory_compiler(documents: MemoryDocuments) -> GraphCompiler {
    let db = db_init(StoreLocation::Memory).await.unwrap();
    GraphCompiler::new(
        db,
        WorkspacePaths::new(WORKSPACE),
        Arc::new(documents.rooted(WORKSPACE)),
    )
}

#[allow(dead_code)]
pub async fn instanced_rows(db: &DbConnection) -> Vec<InstancedInfRow> {
    sqlx::query_as::<_, InstancedInfRow>("SELECT * FROM instanced_inf ORDER BY id")
        .fetch_all(db.pool())
        .await
        .unwrap()
}

/// Number of `instanced_inf -> instanced_inf` junction edges.
#[allow(dead_code)]
pub async fn link_edge_count(db: &DbConnection) -> i64 {
    sqlx::query_scalar::<_, i64>(
        "SELECT COUNT(*) FROM junction WHERE table1 = 'instanced_inf' AND table2 = 'instanced_inf'",
    )
    .fetch_one(db.pool())
    .await
    .unwrap()
}
