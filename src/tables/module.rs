use crate::{
    db::{insert_edges, Edge, EntityKind},
    error::GraphError,
    paths::{to_posix, WorkspacePaths},
    tables::{GenerationContext, TableGenerator},
    view::DocumentSource,
};
use async_trait::async_trait;
use rayon::prelude::*;
use sqlx::{sqlite::SqliteConnection, FromRow};
use std::{
    path::{Path, PathBuf},
    sync::Arc,
    time::Instant,
};
use walkdir::{DirEntry, WalkDir};

const CREATE_MODULE_TABLE: &str = "\
CREATE TABLE IF NOT EXISTS module (
    path TEXT PRIMARY KEY,
    guid TEXT,
    library_class TEXT,
    repo TEXT
)";

const INSERT_MODULE_ROW: &str = "\
INSERT OR REPLACE INTO module (path, guid, library_class, repo)
VALUES (?, ?, ?, ?)";

/// Directory under the workspace root holding build output.
pub const BUILD_OUTPUT_DIR: &str = "Build";

/// Module description file extension.
pub const MODULE_EXT: &str = "inf";

/// Repository label for modules outside of every configured submodule.
pub const BASE_REPO: &str = "BASE";

#[derive(Debug, Clone, PartialEq, Eq, FromRow)]
pub struct ModuleRow {
    pub path: String,
    pub guid: String,
    pub library_class: Option<String>,
    pub repo: String,
}

/// Everything recorded for a single module description file.
#[derive(Debug, Clone, PartialEq, Eq)]
struct ModuleEntry {
    row: ModuleRow,
    libraries: Vec<String>,
    sources: Vec<String>,
    pcds: Vec<String>,
}

impl ModuleEntry {
    fn edges(&self) -> Vec<Edge> {
        let key = &self.row.path;
        self.libraries
            .iter()
            .map(|lib| Edge::new(EntityKind::Module, key, EntityKind::LibraryClass, lib))
            .chain(
                self.sources
                    .iter()
                    .map(|src| Edge::new(EntityKind::Module, key, EntityKind::Source, src)),
            )
            .chain(
                self.pcds
                    .iter()
                    .map(|pcd| Edge::new(EntityKind::Module, key, EntityKind::Pcd, pcd)),
            )
            .collect()
    }
}

/// Inventory of every module description in the workspace, independent of any platform.
///
/// Files are parsed in parallel; rows are written sequentially afterwards so the store only ever
/// has one writer.
#[derive(Debug, Clone, Default)]
pub struct ModuleTable {
    jobs: usize,
    submodules: Vec<(String, PathBuf)>,
}

impl ModuleTable {
    /// `jobs` is the number of parse workers, `0` for one per available core.
    pub fn new(jobs: usize) -> Self {
        ModuleTable {
            jobs,
            submodules: Vec::default(),
        }
    }

    /// Label modules under `path` with the repository `name` instead of [`BASE_REPO`].
    pub fn with_submodule<N: Into<String>, P: Into<PathBuf>>(mut self, name: N, path: P) -> Self {
        self.submodules.push((name.into(), path.into()));
        self
    }

    fn repo_for(&self, path: &Path) -> String {
        self.submodules
            .iter()
            .find(|(_, root)| path.starts_with(root))
            .map(|(name, _)| name.clone())
            .unwrap_or_else(|| BASE_REPO.to_string())
    }

    fn parse_file(
        &self,
        path: &Path,
        workspace: &WorkspacePaths,
        documents: &dyn DocumentSource,
    ) -> Result<ModuleEntry, GraphError> {
        let module = documents.module(path)?;
        Ok(ModuleEntry {
            row: ModuleRow {
                path: workspace.package_relative(path),
                guid: module.guid().unwrap_or_default().to_string(),
                library_class: module.library_class().map(str::to_string),
                repo: self.repo_for(path),
            },
            libraries: module
                .all_libraries()
                .into_iter()
                .map(str::to_string)
                .collect(),
            sources: module.sources.iter().map(|src| to_posix(src)).collect(),
            pcds: module.pcds.clone(),
        })
    }

    /// Parse `files` on a dedicated rayon pool, off the async runtime's worker threads.
    async fn parse_all(
        &self,
        files: Vec<PathBuf>,
        ctx: &GenerationContext<'_>,
    ) -> Result<Vec<ModuleEntry>, GraphError> {
        let table = self.clone();
        let workspace = ctx.workspace.clone();
        let documents = Arc::clone(&ctx.documents);
        tokio::task::spawn_blocking(move || {
            let pool = rayon::ThreadPoolBuilder::new()
                .num_threads(table.jobs)
                .build()?;
            pool.install(|| {
                files
                    .par_iter()
                    .map(|path| table.parse_file(path, &workspace, documents.as_ref()))
                    .collect::<Result<Vec<ModuleEntry>, GraphError>>()
            })
        })
        .await?
    }
}

/// Sorted module description files under `root`, skipping build output and hidden directories.
pub fn module_files<P: AsRef<Path>>(root: P) -> Result<Vec<PathBuf>, GraphError> {
    fn is_skipped(entry: &DirEntry) -> bool {
        let name = entry.file_name().to_str().unwrap_or_default();
        entry.file_type().is_dir()
            && (name.starts_with('.') || (entry.depth() == 1 && name == BUILD_OUTPUT_DIR))
    }
    let root = root.as_ref();
    let mut files = Vec::default();
    for entry in WalkDir::new(root)
        .into_iter()
        .filter_entry(|e| e.depth() == 0 || !is_skipped(e))
    {
        let entry = entry?;
        let is_module = entry.file_type().is_file()
            && entry
                .path()
                .extension()
                .map(|ext| ext.eq_ignore_ascii_case(MODULE_EXT))
                .unwrap_or(false);
        if is_module {
            files.push(entry.into_path());
        }
    }
    files.sort();
    Ok(files)
}

#[async_trait]
impl TableGenerator for ModuleTable {
    fn name(&self) -> &str {
        "ModuleTable"
    }

    async fn create_tables(&self, conn: &mut SqliteConnection) -> Result<(), GraphError> {
        sqlx::query(CREATE_MODULE_TABLE).execute(&mut *conn).await?;
        Ok(())
    }

    async fn populate(
        &self,
        conn: &mut SqliteConnection,
        ctx: &GenerationContext<'_>,
    ) -> Result<(), GraphError> {
        let start = Instant::now();
        let files = module_files(ctx.workspace.workspace())?;
        let entries = self.parse_all(files, ctx).await?;
        tracing::debug!(
            "[ModuleTable] Parsed {} module descriptions in {:.2?}",
            entries.len(),
            start.elapsed()
        );

        let mut edge_count = 0;
        for entry in entries.iter() {
            sqlx::query(INSERT_MODULE_ROW)
                .bind(&entry.row.path)
                .bind(&entry.row.guid)
                .bind(&entry.row.library_class)
                .bind(&entry.row.repo)
                .execute(&mut *conn)
                .await?;
            edge_count += insert_edges(conn, &entry.edges()).await?;
        }
        tracing::info!(
            "[ModuleTable] Recorded {} modules and {} edges",
            entries.len(),
            edge_count
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        compiler::GraphCompiler,
        config::BuildEnv,
        db::{db_init, StoreLocation},
        view::{
            FlashLayout, ModuleDescription, PlatformDescription, ScopedName, BASE_NAME, FILE_GUID,
            LIBRARY_CLASS,
        },
    };
    use std::{
        fs,
        sync::{mpsc, Mutex},
        time::Duration,
    };
    use tokio::sync::oneshot;
    use test_log::test;

    #[test]
    fn module_files_skip_build_output() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        for rel in [
            "TestPkg/Driver/Driver.inf",
            "TestPkg/Library/Lib.INF",
            "Build/TestPkg/DEBUG/Driver.inf",
            ".hidden/Ignored.inf",
            "TestPkg/Driver/Driver.c",
        ] {
            let path = root.join(rel);
            fs::create_dir_all(path.parent().unwrap()).unwrap();
            fs::write(path, "").unwrap();
        }
        let files = module_files(root).unwrap();
        assert_eq!(
            files,
            vec![
                root.join("TestPkg/Driver/Driver.inf"),
                root.join("TestPkg/Library/Lib.INF"),
            ]
        );
    }

    #[test]
    fn parse_file_collects_row_and_edges() {
        let dir = tempfile::tempdir().unwrap();
        let pkg = dir.path().join("TestPkg");
        fs::create_dir_all(pkg.join("Library")).unwrap();
        fs::write(pkg.join("TestPkg.dec"), "").unwrap();
        let inf = pkg.join("Library").join("TestLib1.inf");
        fs::write(&inf, "").unwrap();

        let mut docs = crate::view::MemoryDocuments::new().rooted(dir.path());
        docs.insert_module(
            "TestPkg/Library/TestLib1.inf",
            ModuleDescription {
                sources: vec!["Test.c".into(), "IA32\\Test.c".into()],
                library_classes: vec![
                    ScopedName::common("TestLib2"),
                    ScopedName::for_arch("X64", "TestLib3"),
                ],
                ..Default::default()
            }
            .define(BASE_NAME, "TestLib1")
            .define(FILE_GUID, "00000000-0000-0000-0000-000000000001")
            .define(LIBRARY_CLASS, "TestCls|DXE_DRIVER"),
        );
        let workspace = WorkspacePaths::new(dir.path());
        let table = ModuleTable::new(1).with_submodule("Features", dir.path().join("Features"));

        let entry = table.parse_file(&inf, &workspace, &docs).unwrap();
        assert_eq!(entry.row.path, "TestPkg/Library/TestLib1.inf");
        assert_eq!(entry.row.library_class.as_deref(), Some("TestCls"));
        assert_eq!(entry.row.repo, BASE_REPO);
        assert_eq!(entry.libraries, vec!["TestLib2", "TestLib3"]);
        assert_eq!(entry.sources, vec!["Test.c", "IA32/Test.c"]);
        assert_eq!(entry.edges().len(), 4);
    }

    /// Hands out modules only once the async side of the test has released it.
    struct GatedDocuments {
        inner: crate::view::MemoryDocuments,
        started: Mutex<Option<oneshot::Sender<()>>>,
        release: Mutex<mpsc::Receiver<()>>,
    }

    impl DocumentSource for GatedDocuments {
        fn module(&self, path: &Path) -> Result<ModuleDescription, GraphError> {
            if let Some(started) = self.started.lock().unwrap().take() {
                started.send(()).ok();
            }
            self.release
                .lock()
                .unwrap()
                .recv_timeout(Duration::from_secs(5))
                .map_err(|_| GraphError::Custom("module parse was never released".to_string()))?;
            self.inner.module(path)
        }

        fn platform(&self, path: &Path, env: &BuildEnv) -> Result<PlatformDescription, GraphError> {
            self.inner.platform(path, env)
        }

        fn flash_layout(&self, path: &Path, env: &BuildEnv) -> Result<FlashLayout, GraphError> {
            self.inner.flash_layout(path, env)
        }
    }

    #[test(tokio::test)]
    async fn parsing_leaves_the_runtime_free() {
        let dir = tempfile::tempdir().unwrap();
        let pkg = dir.path().join("TestPkg");
        fs::create_dir_all(&pkg).unwrap();
        fs::write(pkg.join("TestPkg.dec"), "").unwrap();
        fs::write(pkg.join("Driver.inf"), "").unwrap();
        let mut inner = crate::view::MemoryDocuments::new().rooted(dir.path());
        inner.insert_module(
            "TestPkg/Driver.inf",
            ModuleDescription::default().define(BASE_NAME, "Driver"),
        );
        let (started_tx, started_rx) = oneshot::channel();
        let (release_tx, release_rx) = mpsc::channel();
        let documents = GatedDocuments {
            inner,
            started: Mutex::new(Some(started_tx)),
            release: Mutex::new(release_rx),
        };

        let db = db_init(StoreLocation::Memory).await.unwrap();
        let mut compiler = GraphCompiler::new(
            db,
            WorkspacePaths::new(dir.path()),
            Arc::new(documents),
        );
        compiler.register(ModuleTable::new(1));
        let env = BuildEnv::new();
        // On a current-thread runtime the release below only runs if parsing yields the thread.
        let (parsed, _) = tokio::join!(compiler.parse(&env), async move {
            started_rx.await.unwrap();
            release_tx.send(()).unwrap();
        });
        parsed.unwrap();
        assert_eq!(
            compiler
                .connection()
                .count_rows(EntityKind::Module)
                .await
                .unwrap(),
            1
        );
    }
}
