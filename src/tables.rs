//! Table generators: the units of work a [`GraphCompiler`](crate::compiler::GraphCompiler) runs.
//!
//! Each generator owns its schema and its population logic. The compiler first calls
//! [`TableGenerator::create_tables`] on every registered generator, then
//! [`TableGenerator::populate`] on each in registration order, committing after every generator.
//! A generator only ever sees the connection of the transaction opened for it, so its own writes
//! are visible to its later reads but become durable only once it returns successfully.
//!
//! ## Built-in generators
//!
//! - [`ModuleTable`]: flat inventory of every module description in the workspace
//! - [`InstancedInfTable`]: per-component library instance resolution for the active platform
//! - [`InstancedFvTable`]: firmware volumes of the flash layout and the modules they embed
//!
//! The environment tables are maintained by the compiler itself, see [`environment`].
use crate::{
    config::BuildEnv, db::EnvironmentId, error::GraphError, paths::WorkspacePaths,
    view::DocumentSource,
};
use async_trait::async_trait;
use sqlx::sqlite::SqliteConnection;
use std::sync::Arc;

pub mod environment;
pub mod instanced_fv;
pub mod instanced_inf;
pub mod module;

pub use instanced_fv::InstancedFvTable;
pub use instanced_inf::InstancedInfTable;
pub use module::ModuleTable;

/// Everything a generator needs from the run it participates in.
pub struct GenerationContext<'a> {
    /// The environment row recorded for this run.
    pub env: EnvironmentId,
    pub build_env: &'a BuildEnv,
    pub workspace: &'a WorkspacePaths,
    pub documents: Arc<dyn DocumentSource>,
}

#[async_trait]
pub trait TableGenerator: Send + Sync {
    /// Name used in log output.
    fn name(&self) -> &str;

    async fn create_tables(&self, conn: &mut SqliteConnection) -> Result<(), GraphError>;

    async fn populate(
        &self,
        conn: &mut SqliteConnection,
        ctx: &GenerationContext<'_>,
    ) -> Result<(), GraphError>;
}
