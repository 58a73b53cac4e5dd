//! Workspace path resolution.
//!
//! Rows are persisted with posix, workspace-relative paths so that joins stay stable across runs
//! on different machines. [`WorkspacePaths`] knows the workspace root and any additional package
//! search roots and turns absolute paths back into the relative form build descriptions use.
use std::{
    borrow::Cow,
    fs,
    path::{Component, Path, PathBuf},
};

/// Extension identifying a package declaration file.
pub const PACKAGE_EXT: &str = "dec";

/// Utility function to replace separators and convert to unicode (via to_string_lossy) on os path.
pub fn os_path_to_string<P: AsRef<Path>>(os_path_ref: P) -> String {
    os_path_ref
        .as_ref()
        .components()
        .map(|c| match c {
            Component::RootDir => Cow::from("".to_string()),
            _ => c.as_os_str().to_string_lossy(),
        })
        .collect::<Vec<_>>()
        .join("/")
}

/// Normalize a path string written in a build description to forward slashes.
pub fn to_posix(path: &str) -> String {
    path.replace('\\', "/")
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkspacePaths {
    workspace: PathBuf,
    package_paths: Vec<PathBuf>,
}

impl WorkspacePaths {
    pub fn new<P: Into<PathBuf>>(workspace: P) -> Self {
        WorkspacePaths {
            workspace: workspace.into(),
            package_paths: Vec::default(),
        }
    }

    pub fn with_package_paths<I, P>(mut self, package_paths: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: Into<PathBuf>,
    {
        self.package_paths
            .extend(package_paths.into_iter().map(Into::into));
        self
    }

    pub fn workspace(&self) -> &Path {
        &self.workspace
    }

    pub fn package_paths(&self) -> &[PathBuf] {
        &self.package_paths
    }

    /// Search roots, most specific first.
    fn roots(&self) -> Vec<&Path> {
        let mut roots = self
            .package_paths
            .iter()
            .map(PathBuf::as_path)
            .chain(std::iter::once(self.workspace.as_path()))
            .collect::<Vec<&Path>>();
        roots.sort_by_key(|root| std::cmp::Reverse(root.components().count()));
        roots
    }

    /// Rewrite `path` relative to the search root that contains it. Relative paths are only
    /// normalized to posix separators.
    pub fn relative(&self, path: &str) -> String {
        let posix = to_posix(path);
        let as_path = Path::new(&posix);
        if !as_path.is_absolute() {
            return posix;
        }
        for root in self.roots() {
            if let Ok(stripped) = as_path.strip_prefix(root) {
                return os_path_to_string(stripped);
            }
        }
        tracing::warn!(
            "[WorkspacePaths] {} is outside of the workspace and every package path",
            posix
        );
        posix
    }

    /// The nearest ancestor directory of `path` holding a package declaration, bounded by the
    /// search root the path lives under.
    pub fn containing_package(&self, path: &Path) -> Option<PathBuf> {
        let root = self.roots().into_iter().find(|root| path.starts_with(root))?;
        path.ancestors()
            .skip(1)
            .take_while(|dir| dir.starts_with(root) && *dir != root)
            .find(|dir| has_package_declaration(dir))
            .map(Path::to_path_buf)
    }

    /// The path as written from its package directory onwards, e.g.
    /// `MdePkg/Library/BaseLib/BaseLib.inf`. Falls back to [`WorkspacePaths::relative`] when the
    /// path does not belong to a package.
    pub fn package_relative(&self, path: &Path) -> String {
        match self
            .containing_package(path)
            .and_then(|pkg| pkg.parent().map(Path::to_path_buf))
        {
            Some(pkg_parent) => match path.strip_prefix(&pkg_parent) {
                Ok(stripped) => os_path_to_string(stripped),
                Err(_) => self.relative(&os_path_to_string(path)),
            },
            None => self.relative(&os_path_to_string(path)),
        }
    }
}

fn has_package_declaration(dir: &Path) -> bool {
    fs::read_dir(dir)
        .map(|entries| {
            entries.filter_map(|e| e.ok()).any(|entry| {
                entry
                    .path()
                    .extension()
                    .map(|ext| ext.eq_ignore_ascii_case(PACKAGE_EXT))
                    .unwrap_or(false)
            })
        })
        .unwrap_or(false)
}
