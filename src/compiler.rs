use crate::{
    config::BuildEnv,
    db::{drop_all_tables, DbConnection, EnvironmentId, StoreMode, CREATE_JUNCTION_TABLE},
    error::GraphError,
    paths::WorkspacePaths,
    tables::{environment, GenerationContext, TableGenerator},
    view::DocumentSource,
};
use std::{sync::Arc, time::Instant};

/// Runs an ordered worklist of [`TableGenerator`]s against one store.
///
/// Generators run in registration order. Later generators may read rows written by earlier ones
/// in the same run, so the instanced-module resolution should come after anything it joins
/// against. Each generator populates inside its own transaction:
/// - a generator that returns an error leaves nothing behind
/// - generators that completed before it stay committed
///
/// The environment row for the run is recorded by the compiler itself before any generator
/// populates, and its id is handed to every generator through [`GenerationContext`].
pub struct GraphCompiler {
    db: DbConnection,
    workspace: WorkspacePaths,
    documents: Arc<dyn DocumentSource>,
    generators: Vec<Box<dyn TableGenerator>>,
    mode: StoreMode,
}

impl GraphCompiler {
    /// Create a compiler over an opened store.
    ///
    /// # Arguments
    /// * `db` - The store every generator writes into, see [`crate::db::db_init`]
    /// * `workspace` - Workspace root and package search paths used to relativize stored paths
    /// * `documents` - Source of parsed module, platform and flash layout descriptions
    pub fn new(
        db: DbConnection,
        workspace: WorkspacePaths,
        documents: Arc<dyn DocumentSource>,
    ) -> Self {
        GraphCompiler {
            db,
            workspace,
            documents,
            generators: Vec::default(),
            mode: StoreMode::default(),
        }
    }

    pub fn with_mode(mut self, mode: StoreMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn mode(&self) -> StoreMode {
        self.mode
    }

    pub fn register<G: TableGenerator + 'static>(&mut self, generator: G) -> &mut Self {
        self.generators.push(Box::new(generator));
        self
    }

    pub fn register_all<I>(&mut self, generators: I) -> &mut Self
    where
        I: IntoIterator<Item = Box<dyn TableGenerator>>,
    {
        self.generators.extend(generators);
        self
    }

    /// Empty the worklist. Rows already in the store are untouched.
    pub fn clear(&mut self) {
        self.generators.clear();
    }

    pub fn generators(&self) -> &[Box<dyn TableGenerator>] {
        &self.generators
    }

    pub fn connection(&self) -> &DbConnection {
        &self.db
    }

    pub fn workspace(&self) -> &WorkspacePaths {
        &self.workspace
    }

    /// Run every registered generator for `env` and return the id of the environment recorded for
    /// this run.
    ///
    /// The first failing generator aborts the run and its error is returned. Its own writes are
    /// rolled back; the environment row and everything committed by earlier generators remain.
    pub async fn parse(&self, env: &BuildEnv) -> Result<EnvironmentId, GraphError> {
        let start = Instant::now();
        tracing::debug!(
            "[GraphCompiler] Starting run with {} generators in {:?} mode",
            self.generators.len(),
            self.mode
        );

        let mut tx = self.db.pool().begin().await?;
        if self.mode == StoreMode::Fresh {
            drop_all_tables(&mut tx).await?;
        }
        sqlx::query(CREATE_JUNCTION_TABLE).execute(&mut *tx).await?;
        environment::create_tables(&mut tx).await?;
        for generator in self.generators.iter() {
            generator.create_tables(&mut tx).await?;
        }
        tx.commit().await?;

        let mut tx = self.db.pool().begin().await?;
        let env_id = environment::record(&mut tx, env).await?;
        tx.commit().await?;

        let ctx = GenerationContext {
            env: env_id,
            build_env: env,
            workspace: &self.workspace,
            documents: Arc::clone(&self.documents),
        };
        for generator in self.generators.iter() {
            let generator_start = Instant::now();
            tracing::debug!("[GraphCompiler] Running {}", generator.name());
            let mut tx = self.db.pool().begin().await?;
            if let Err(e) = generator.populate(&mut tx, &ctx).await {
                tracing::error!(
                    "[GraphCompiler] {} failed, discarding its rows: {}",
                    generator.name(),
                    e
                );
                return Err(e);
            }
            tx.commit().await?;
            tracing::debug!(
                "[GraphCompiler] Finished {} in {:.2?}",
                generator.name(),
                generator_start.elapsed()
            );
        }

        tracing::info!(
            "[GraphCompiler] Environment {} complete in {:.2?}",
            env_id,
            start.elapsed()
        );
        Ok(env_id)
    }

    /// Release the store. Dropping the compiler without closing releases it as well.
    pub async fn close(self) {
        self.db.close().await;
    }
}
