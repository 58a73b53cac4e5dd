//! # edk2-graph
//!
//! Resolves an EDK II build description (platform `.dsc`, module `.inf` and flash layout `.fdf`
//! files) into a relational dependency graph stored in SQLite.
//!
//! ## Overview
//!
//! A run is driven by a [`compiler::GraphCompiler`] holding an ordered list of
//! [`tables::TableGenerator`]s. Each generator owns a set of tables, and every relationship between
//! rows of any table is recorded as an edge in one generic `junction` table. After a run the store
//! answers questions such as "which library instances does this driver link", "which components
//! use this instance" or "which modules end up in this firmware volume".
//!
//! The built-in generators are:
//!
//! - [`tables::ModuleTable`]: flat inventory of every module description in the workspace
//! - [`tables::InstancedInfTable`]: library class resolution of every component of the active
//!   platform, one row per library instance per component
//! - [`tables::InstancedFvTable`]: firmware volumes of the flash layout and their modules
//!
//! Parsing the description languages themselves is left to a [`view::DocumentSource`]; the
//! generators only consume its structured, conditional-free views.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use edk2_graph::{
//!     compiler::GraphCompiler,
//!     config::BuildEnv,
//!     db::{db_init, StoreLocation},
//!     paths::WorkspacePaths,
//!     tables::{InstancedInfTable, ModuleTable},
//!     view::MemoryDocuments,
//! };
//! use std::sync::Arc;
//!
//! #[tokio::main(flavor = "current_thread")]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let env = BuildEnv::load("build_env.toml")?;
//!     let documents = MemoryDocuments::load("descriptions.toml")?.rooted("/ws");
//!     let db = db_init(StoreLocation::File("graph.db".into())).await?;
//!
//!     let mut compiler = GraphCompiler::new(db, WorkspacePaths::new("/ws"), Arc::new(documents));
//!     compiler
//!         .register(ModuleTable::new(0))
//!         .register(InstancedInfTable::new(&env)?);
//!     let env_id = compiler.parse(&env).await?;
//!
//!     for component in compiler.connection().components(Some(env_id), None).await? {
//!         println!("{} links {:?}", component.row.path, component.libraries);
//!     }
//!     compiler.close().await;
//!     Ok(())
//! }
//! ```
//!
//! ## Library class resolution
//!
//! See [`tables::instanced_inf`] for the scope priority chain and deduplication rules.

pub mod compiler;
pub mod config;
pub mod db;
pub mod error;
pub mod paths;
pub mod query;
pub mod tables;
pub mod view;

pub use error::*;
