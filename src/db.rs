//! The relational store every table generator writes into.
//!
//! Besides the tables each generator owns, the store holds one schema-free `junction` table of
//! `(table1, key1, table2, key2)` edges. All graph relationships (module uses source, module links
//! library instance, firmware volume embeds module) are rows in that one table, typed on the Rust
//! side by [`EntityKind`].
use crate::error::GraphError;
use sqlx::{
    sqlite::{Sqlite, SqliteConnectOptions, SqliteConnection, SqlitePoolOptions},
    ConnectOptions, Pool, Row,
};
use std::{
    fmt::{Display, Formatter},
    path::PathBuf,
    str::FromStr,
};

pub const CREATE_JUNCTION_TABLE: &str = "\
CREATE TABLE IF NOT EXISTS junction (
    table1 TEXT,
    key1 TEXT,
    table2 TEXT,
    key2 TEXT
)";

const INSERT_JUNCTION_ROW: &str = "\
INSERT INTO junction (table1, key1, table2, key2)
VALUES (?, ?, ?, ?)";

const LIST_USER_TABLES: &str =
    "SELECT name FROM sqlite_master WHERE type = 'table' AND name NOT LIKE 'sqlite_%'";

/// `(child, parent)` for every foreign key declared by a user table.
const LIST_FOREIGN_KEYS: &str = "\
SELECT m.name, fk.\"table\" FROM sqlite_master m, pragma_foreign_key_list(m.name) fk
WHERE m.type = 'table' AND m.name NOT LIKE 'sqlite_%'";

/// Table names that may appear on either side of a junction edge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum EntityKind {
    Environment,
    InstancedFv,
    InstancedInf,
    LibraryClass,
    Module,
    Pcd,
    Source,
}

impl EntityKind {
    pub fn table_name(&self) -> &'static str {
        match self {
            EntityKind::Environment => "environment",
            EntityKind::InstancedFv => "instanced_fv",
            EntityKind::InstancedInf => "instanced_inf",
            EntityKind::LibraryClass => "library_class",
            EntityKind::Module => "module",
            EntityKind::Pcd => "pcd",
            EntityKind::Source => "source",
        }
    }
}

impl Display for EntityKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.table_name())
    }
}

impl FromStr for EntityKind {
    type Err = GraphError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "environment" => EntityKind::Environment,
            "instanced_fv" => EntityKind::InstancedFv,
            "instanced_inf" => EntityKind::InstancedInf,
            "library_class" => EntityKind::LibraryClass,
            "module" => EntityKind::Module,
            "pcd" => EntityKind::Pcd,
            "source" => EntityKind::Source,
            other => {
                return Err(GraphError::NotFound(format!(
                    "'{other}' is not a junction table name"
                )))
            }
        })
    }
}

/// One `junction` row: `left` uses, links or contains `right`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Edge {
    pub left: (EntityKind, String),
    pub right: (EntityKind, String),
}

impl Edge {
    pub fn new<L: ToString, R: ToString>(
        left_kind: EntityKind,
        left_key: L,
        right_kind: EntityKind,
        right_key: R,
    ) -> Self {
        Edge {
            left: (left_kind, left_key.to_string()),
            right: (right_kind, right_key.to_string()),
        }
    }
}

pub async fn insert_edge(conn: &mut SqliteConnection, edge: &Edge) -> Result<(), GraphError> {
    sqlx::query(INSERT_JUNCTION_ROW)
        .bind(edge.left.0.table_name())
        .bind(&edge.left.1)
        .bind(edge.right.0.table_name())
        .bind(&edge.right.1)
        .execute(&mut *conn)
        .await?;
    Ok(())
}

pub async fn insert_edges<'e, I>(conn: &mut SqliteConnection, edges: I) -> Result<usize, GraphError>
where
    I: IntoIterator<Item = &'e Edge>,
{
    let mut count = 0;
    for edge in edges {
        insert_edge(conn, edge).await?;
        count += 1;
    }
    Ok(count)
}

/// Every edge leaving `(kind, key)`.
pub async fn edges_from(
    conn: &mut SqliteConnection,
    kind: EntityKind,
    key: &str,
) -> Result<Vec<Edge>, GraphError> {
    let rows = sqlx::query_as::<_, (String, String, String, String)>(
        "SELECT table1, key1, table2, key2 FROM junction \
         WHERE table1 = ? AND key1 = ? ORDER BY rowid",
    )
    .bind(kind.table_name())
    .bind(key)
    .fetch_all(&mut *conn)
    .await?;
    rows.into_iter()
        .map(|(t1, k1, t2, k2)| {
            Ok(Edge {
                left: (EntityKind::from_str(&t1)?, k1),
                right: (EntityKind::from_str(&t2)?, k2),
            })
        })
        .collect()
}

/// Surrogate id of an environment row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct EnvironmentId(pub i64);

impl Display for EnvironmentId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Whether a run keeps the rows of earlier runs.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum StoreMode {
    /// New environment rows are appended next to earlier ones.
    #[default]
    Append,
    /// Every table is dropped at the start of the next run.
    Fresh,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreLocation {
    Memory,
    File(PathBuf),
}

#[derive(Debug, Clone)]
pub struct DbConnection(pub Pool<Sqlite>);

impl DbConnection {
    pub fn pool(&self) -> &Pool<Sqlite> {
        &self.0
    }

    pub async fn table_names(&self) -> Result<Vec<String>, GraphError> {
        let rows = sqlx::query(LIST_USER_TABLES).fetch_all(&self.0).await?;
        Ok(rows.iter().map(|row| row.get::<String, usize>(0)).collect())
    }

    pub async fn count_rows(&self, table: EntityKind) -> Result<i64, GraphError> {
        let count = sqlx::query_scalar::<_, i64>(&format!(
            "SELECT COUNT(*) FROM {}",
            table.table_name()
        ))
        .fetch_one(&self.0)
        .await?;
        Ok(count)
    }

    pub async fn close(&self) {
        self.0.close().await;
    }
}

/// Drop every user table. Only called at the start of a run.
///
/// Foreign keys are enforced, so a table is only dropped once no remaining table references it.
pub(crate) async fn drop_all_tables(conn: &mut SqliteConnection) -> Result<(), GraphError> {
    let mut names = sqlx::query_scalar::<_, String>(LIST_USER_TABLES)
        .fetch_all(&mut *conn)
        .await?;
    let references = sqlx::query_as::<_, (String, String)>(LIST_FOREIGN_KEYS)
        .fetch_all(&mut *conn)
        .await?;
    while !names.is_empty() {
        let (ready, blocked): (Vec<String>, Vec<String>) =
            names.iter().cloned().partition(|name| {
                !references.iter().any(|(child, parent)| {
                    parent == name && child != name && names.contains(child)
                })
            });
        // A reference cycle leaves nothing ready; drop the rest as listed.
        let ready = if ready.is_empty() {
            std::mem::take(&mut names)
        } else {
            names = blocked;
            ready
        };
        for name in ready {
            tracing::debug!("[db] Dropping table {}", name);
            sqlx::query(&format!("DROP TABLE IF EXISTS \"{name}\""))
                .execute(&mut *conn)
                .await?;
        }
    }
    Ok(())
}

/// Open (creating if missing) the store. The pool holds a single connection: generators share one
/// writer, and an in-memory database lives exactly as long as that connection.
pub async fn db_init(location: StoreLocation) -> Result<DbConnection, GraphError> {
    let options = match &location {
        StoreLocation::Memory => SqliteConnectOptions::from_str("sqlite::memory:")?,
        StoreLocation::File(path) => SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true),
    }
    .disable_statement_logging();
    tracing::debug!("Initializing graph db at {:?}", location);

    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .min_connections(1)
        .idle_timeout(None)
        .max_lifetime(None)
        .connect_with(options)
        .await?;

    sqlx::query(CREATE_JUNCTION_TABLE).execute(&pool).await?;
    let edge_count = sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM junction")
        .fetch_one(&pool)
        .await?;
    tracing::info!(
        "DB Connection initialized.\n \
         \tStored edge count:\t{}",
        edge_count
    );
    Ok(DbConnection(pool))
}
