//! Per-component library instance resolution.
//!
//! For the active platform description, every declared component is expanded into the tree of
//! library instances it links, following the platform's `[LibraryClasses]` sections and the
//! component's own `<LibraryClasses>` overrides. Each node of that tree becomes one
//! `instanced_inf` row, so a library used by several components appears once per component.
//! Edges from each row to its sources and to the library rows it links are written to
//! `junction`.
//!
//! ## Library class resolution
//!
//! A library class needed by a module built in scope `ARCH.MODULE_TYPE` resolves to the first
//! instance found in:
//!
//! 1. the component's override block
//! 2. `[LibraryClasses.ARCH.MODULE_TYPE]`
//! 3. `[LibraryClasses.common.MODULE_TYPE]`
//! 4. `[LibraryClasses.ARCH]`
//! 5. `[LibraryClasses]` / `[LibraryClasses.common]`
//!
//! A class that resolves nowhere aborts the whole generator.
//!
//! ## Deduplication
//!
//! One visited set is shared by the whole expansion of a component. A library reachable through
//! several parents is expanded and recorded once; every parent still gets an edge to that single
//! row.
use crate::{
    config::{BuildEnv, ACTIVE_PLATFORM, TARGET, TARGET_ARCH},
    db::{insert_edge, Edge, EntityKind, EnvironmentId},
    error::GraphError,
    paths::{to_posix, WorkspacePaths},
    tables::{GenerationContext, TableGenerator},
    view::{ComponentOverrides, DocumentSource, PlatformDescription, ScopedLibraryMap, COMMON},
};
use async_trait::async_trait;
use sqlx::{sqlite::SqliteConnection, FromRow};
use std::{
    collections::HashSet,
    path::{Path, PathBuf},
    time::Instant,
};

const CREATE_INSTANCED_INF_TABLE: &str = "\
CREATE TABLE IF NOT EXISTS instanced_inf (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    env INTEGER,
    dsc TEXT,
    path TEXT,
    name TEXT,
    arch TEXT,
    component TEXT,
    module_type TEXT,
    FOREIGN KEY(env) REFERENCES environment(id)
)";

const INSERT_INSTANCED_INF_ROW: &str = "\
INSERT INTO instanced_inf (env, dsc, path, name, arch, component, module_type)
VALUES (?, ?, ?, ?, ?, ?, ?)";

const GET_ROW_ID: &str = "\
SELECT id FROM instanced_inf
WHERE env = ? AND path = ? AND dsc = ? AND arch = ? AND component IS ?
LIMIT 1";

#[derive(Debug, Clone, PartialEq, Eq, FromRow)]
pub struct InstancedInfRow {
    pub id: i64,
    pub env: i64,
    pub dsc: String,
    pub path: String,
    pub name: String,
    pub arch: String,
    pub component: Option<String>,
    pub module_type: String,
}

/// One module in the context of the component it is linked into.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstancedModule {
    /// File name of the platform description.
    pub dsc: String,
    pub path: String,
    pub name: String,
    pub guid: String,
    pub module_type: String,
    /// Upper-cased architecture of the component scope.
    pub arch: String,
    /// Path of the owning component, `None` for the component itself.
    pub component: Option<String>,
    pub sources: Vec<String>,
    /// Library instances this module links directly.
    pub libraries: Vec<String>,
}

impl InstancedModule {
    /// The component whose tree this row belongs to.
    fn owner(&self) -> &str {
        self.component.as_deref().unwrap_or(&self.path)
    }
}

/// `ARCH.MODULE_TYPE`, both case-folded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Scope<'a> {
    arch: &'a str,
    module_type: &'a str,
}

impl<'a> Scope<'a> {
    fn parse(scope: &'a str) -> Result<Self, GraphError> {
        match scope.split('.').collect::<Vec<&str>>()[..] {
            [arch, module_type] if !arch.is_empty() && !module_type.is_empty() => {
                Ok(Scope { arch, module_type })
            }
            _ => Err(GraphError::MalformedScope(scope.to_string())),
        }
    }

    /// Scoped library map keys for `class`, highest priority first.
    fn lookup_keys(&self, class: &str) -> [String; 4] {
        [
            format!("{}.{}.{class}", self.arch, self.module_type),
            format!("{COMMON}.{}.{class}", self.module_type),
            format!("{}.{class}", self.arch),
            format!("{COMMON}.{class}"),
        ]
    }
}

/// Resolves library classes against one expanded platform description.
struct Resolver<'a> {
    documents: &'a dyn DocumentSource,
    archs: &'a [String],
    dsc_name: &'a str,
    dsc_path: &'a str,
    library_map: &'a ScopedLibraryMap,
}

impl Resolver<'_> {
    fn resolve(
        &self,
        class: &str,
        scope: &str,
        overrides: &ComponentOverrides,
    ) -> Result<String, GraphError> {
        if let Some(instance) = overrides.get(class) {
            return Ok(instance.to_string());
        }
        let parsed = Scope::parse(scope)?;
        if let Some(instance) = parsed
            .lookup_keys(class)
            .iter()
            .find_map(|key| self.library_map.get(key))
        {
            return Ok(instance.to_string());
        }
        tracing::debug!("scoped library contents: {:?}", self.library_map);
        tracing::debug!("override contents: {:?}", overrides);
        let err = GraphError::UnresolvedLibrary {
            class: class.to_string(),
            scope: scope.to_string(),
            platform: self.dsc_path.to_string(),
        };
        tracing::error!("[InstancedInfTable] {}", err);
        Err(err)
    }

    /// Architectures whose library needs apply to a component built for `scope_arch`.
    fn archs_for<'s>(&'s self, scope_arch: &'s str) -> Vec<&'s str> {
        if scope_arch.eq_ignore_ascii_case(COMMON) {
            self.archs.iter().map(String::as_str).collect()
        } else {
            vec![scope_arch]
        }
    }
}

/// Expansion state for one component: the shared visited set and the rows produced so far.
struct ComponentTraversal<'a> {
    component: &'a str,
    scope: &'a str,
    overrides: &'a ComponentOverrides,
    visited: HashSet<String>,
    rows: Vec<InstancedModule>,
}

impl<'a> ComponentTraversal<'a> {
    fn new(component: &'a str, scope: &'a str, overrides: &'a ComponentOverrides) -> Self {
        ComponentTraversal {
            component,
            scope,
            overrides,
            visited: HashSet::default(),
            rows: Vec::default(),
        }
    }

    fn arch(&self) -> &'a str {
        self.scope.split('.').next().unwrap_or_default()
    }

    /// Depth first: every library row is pushed before the row of the module linking it.
    fn expand(&mut self, resolver: &Resolver<'_>, node: &str) -> Result<(), GraphError> {
        if !self.visited.insert(node.to_string()) {
            return Ok(());
        }
        tracing::debug!("  Parsing Library: [{}]", node);
        let module = resolver.documents.module(Path::new(node))?;

        let mut libraries = Vec::default();
        let mut classes = Vec::<String>::default();
        for arch in resolver.archs_for(self.arch()) {
            for class in module.libraries_for(arch) {
                let class = class.to_lowercase();
                if !classes.contains(&class) {
                    classes.push(class);
                }
            }
        }
        for class in classes.iter() {
            libraries.push(resolver.resolve(class, self.scope, self.overrides)?);
        }
        libraries.extend(
            self.overrides
                .null_libraries
                .iter()
                .filter(|null_lib| null_lib.as_str() != node)
                .cloned(),
        );

        for library in libraries.iter() {
            if !self.visited.contains(library) {
                self.expand(resolver, library)?;
            }
        }

        let name = module.base_name().ok_or_else(|| {
            GraphError::Document(format!("{node} does not define BASE_NAME"))
        })?;
        self.rows.push(InstancedModule {
            dsc: resolver.dsc_name.to_string(),
            path: to_posix(node),
            name: name.to_string(),
            guid: module.guid().unwrap_or_default().to_string(),
            module_type: module.module_type().unwrap_or_default().to_string(),
            arch: self.arch().to_uppercase(),
            component: Some(to_posix(self.component)),
            sources: module.sources.iter().map(|src| to_posix(src)).collect(),
            libraries,
        });
        Ok(())
    }
}

/// Expand every component of `platform` into its instanced module rows.
///
/// Rows come out in dependency order per component. Component rows have `component == None`.
pub fn build_instanced_modules(
    platform: &PlatformDescription,
    documents: &dyn DocumentSource,
    archs: &[String],
    dsc_path: &str,
) -> Result<Vec<InstancedModule>, GraphError> {
    let dsc_name = Path::new(dsc_path)
        .file_name()
        .map(|name| name.to_string_lossy().to_string())
        .unwrap_or_else(|| dsc_path.to_string());
    let resolver = Resolver {
        documents,
        archs,
        dsc_name: &dsc_name,
        dsc_path,
        library_map: &platform.library_classes,
    };

    let mut rows = Vec::default();
    for declared in platform.components.iter() {
        tracing::debug!("Parsing Component: [{}]", declared.path);
        let module = documents.module(Path::new(&declared.path))?;

        // Library instances listed as components are compiled on their own and link nothing.
        if module.is_library() {
            continue;
        }

        let mut scope = declared.scope.to_lowercase();
        if let Some(module_type) = module.module_type() {
            scope.push('.');
            scope.push_str(&module_type.to_lowercase());
        }

        let mut traversal = ComponentTraversal::new(&declared.path, &scope, &declared.overrides);
        traversal.expand(&resolver, &declared.path)?;
        rows.append(&mut traversal.rows);
    }

    for row in rows.iter_mut() {
        if row.component.as_deref() == Some(row.path.as_str()) {
            row.component = None;
        }
    }
    Ok(rows)
}

/// Rewrite every absolute path of `row` relative to its workspace or package root.
fn relativize(row: &mut InstancedModule, workspace: &WorkspacePaths) {
    row.path = workspace.relative(&row.path);
    if let Some(component) = row.component.as_mut() {
        *component = workspace.relative(component);
    }
    for library in row.libraries.iter_mut() {
        *library = workspace.relative(library);
    }
}

async fn row_id(
    conn: &mut SqliteConnection,
    env: EnvironmentId,
    row: &InstancedModule,
    path: &str,
) -> Result<i64, GraphError> {
    let owner = row.owner();
    let component = (path != owner).then_some(owner);
    sqlx::query_scalar::<_, i64>(GET_ROW_ID)
        .bind(env.0)
        .bind(path)
        .bind(&row.dsc)
        .bind(&row.arch)
        .bind(component)
        .fetch_optional(&mut *conn)
        .await?
        .ok_or_else(|| {
            GraphError::NotFound(format!(
                "no instanced_inf row for {path} in component {owner} ({})",
                row.arch
            ))
        })
}

/// Resolves the active platform description into the `instanced_inf` table.
#[derive(Debug, Clone)]
pub struct InstancedInfTable {
    env: BuildEnv,
    dsc: String,
    archs: Vec<String>,
    target: String,
}

impl InstancedInfTable {
    /// Fails with [`GraphError::Config`] unless `ACTIVE_PLATFORM`, `TARGET_ARCH` and `TARGET` are
    /// all set.
    pub fn new(env: &BuildEnv) -> Result<Self, GraphError> {
        let dsc = to_posix(env.require(ACTIVE_PLATFORM)?);
        let archs = env.target_archs()?;
        let target = env.require(TARGET)?.to_string();
        Ok(InstancedInfTable {
            env: env.clone(),
            dsc,
            archs,
            target,
        })
    }

    pub fn active_platform(&self) -> &str {
        &self.dsc
    }

    pub fn archs(&self) -> &[String] {
        &self.archs
    }

    pub fn target(&self) -> &str {
        &self.target
    }
}

/// Build variables that must agree between construction and the run being populated.
const RUN_KEYS: [&str; 3] = [ACTIVE_PLATFORM, TARGET_ARCH, TARGET];

#[async_trait]
impl TableGenerator for InstancedInfTable {
    fn name(&self) -> &str {
        "InstancedInfTable"
    }

    async fn create_tables(&self, conn: &mut SqliteConnection) -> Result<(), GraphError> {
        sqlx::query(CREATE_INSTANCED_INF_TABLE)
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
        let platform = ctx
            .documents
            .platform(&PathBuf::from(&self.dsc), ctx.build_env)?;
        tracing::debug!("All platform descriptions included in {}:", self.dsc);
        for included in platform.included_files.iter() {
            tracing::debug!("  {}", included);
        }

        let mut rows = build_instanced_modules(
            &platform,
            ctx.documents.as_ref(),
            &self.archs,
            &self.dsc,
        )?;
        for row in rows.iter_mut() {
            relativize(row, ctx.workspace);
        }

        let mut ids = Vec::with_capacity(rows.len());
        for row in rows.iter() {
            let id = sqlx::query(INSERT_INSTANCED_INF_ROW)
                .bind(ctx.env.0)
                .bind(&row.dsc)
                .bind(&row.path)
                .bind(&row.name)
                .bind(&row.arch)
                .bind(&row.component)
                .bind(&row.module_type)
                .execute(&mut *conn)
                .await?
                .last_insert_rowid();
            ids.push(id);
        }

        let mut edge_count = 0;
        for (row, id) in rows.iter().zip(ids.iter()) {
            for source in row.sources.iter() {
                insert_edge(
                    conn,
                    &Edge::new(EntityKind::InstancedInf, id, EntityKind::Source, source),
                )
                .await?;
                edge_count += 1;
            }
            for library in row.libraries.iter() {
                let library_id = row_id(conn, ctx.env, row, library).await?;
                insert_edge(
                    conn,
                    &Edge::new(
                        EntityKind::InstancedInf,
                        id,
                        EntityKind::InstancedInf,
                        library_id,
                    ),
                )
                .await?;
                edge_count += 1;
            }
        }
        tracing::info!(
            "[InstancedInfTable] Resolved {} instanced modules and {} edges for {} in {:.2?}",
            rows.len(),
            edge_count,
            self.dsc,
            start.elapsed()
        );
        Ok(())
    }
}
