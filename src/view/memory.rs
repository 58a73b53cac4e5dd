use crate::{
    config::{BuildEnv, TARGET},
    error::GraphError,
    paths::{os_path_to_string, to_posix},
    view::{DocumentSource, FlashLayout, ModuleDescription, PlatformDescription},
};
use serde::{Deserialize, Serialize};
use std::{
    collections::BTreeMap,
    fs::read_to_string,
    path::{Path, PathBuf},
};

/// A platform description plus the `!if $(TARGET) == ...` guards its components sit under.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemoryPlatform {
    #[serde(flatten)]
    pub description: PlatformDescription,
    /// Component path to the build targets it is declared for. Unguarded components are always
    /// declared.
    #[serde(default)]
    pub target_guards: BTreeMap<String, Vec<String>>,
}

/// An in-memory [`DocumentSource`] keyed by posix path.
///
/// Descriptions can be inserted programmatically or loaded from a TOML fixture:
///
/// ```toml
/// [modules."TestPkg/Driver/Driver.inf"]
/// defines = { BASE_NAME = "Driver", MODULE_TYPE = "DXE_DRIVER" }
/// library_classes = [{ name = "DebugLib" }]
///
/// [platforms."TestPkg/TestPkg.dsc"]
/// components = [{ path = "TestPkg/Driver/Driver.inf", scope = "x64" }]
/// library_classes = { "common.debuglib" = "TestPkg/Library/DebugLib.inf" }
/// ```
///
/// When rooted at a workspace, absolute lookups under that root are matched against the
/// workspace-relative keys.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemoryDocuments {
    #[serde(default)]
    modules: BTreeMap<String, ModuleDescription>,
    #[serde(default)]
    platforms: BTreeMap<String, MemoryPlatform>,
    #[serde(default)]
    flash_layouts: BTreeMap<String, FlashLayout>,
    #[serde(skip)]
    root: Option<PathBuf>,
}

impl MemoryDocuments {
    pub fn new() -> Self {
        MemoryDocuments::default()
    }

    pub fn from_toml_str(content: &str) -> Result<Self, GraphError> {
        Ok(toml::from_str(content)?)
    }

    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, GraphError> {
        tracing::debug!("Reading document fixture {:?}", path.as_ref());
        MemoryDocuments::from_toml_str(&read_to_string(path)?)
    }

    pub fn rooted<P: Into<PathBuf>>(mut self, root: P) -> Self {
        self.root = Some(root.into());
        self
    }

    pub fn insert_module<P: AsRef<str>>(&mut self, path: P, module: ModuleDescription) {
        self.modules.insert(to_posix(path.as_ref()), module);
    }

    pub fn insert_platform<P: AsRef<str>>(&mut self, path: P, platform: PlatformDescription) {
        self.platforms.insert(
            to_posix(path.as_ref()),
            MemoryPlatform {
                description: platform,
                ..Default::default()
            },
        );
    }

    /// Only declare `component` of `platform` when building one of `targets`.
    pub fn guard_component<P, C, T, S>(&mut self, platform: P, component: C, targets: T)
    where
        P: AsRef<str>,
        C: AsRef<str>,
        T: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.platforms
            .entry(to_posix(platform.as_ref()))
            .or_default()
            .target_guards
            .insert(
                to_posix(component.as_ref()),
                targets.into_iter().map(Into::into).collect(),
            );
    }

    pub fn insert_flash_layout<P: AsRef<str>>(&mut self, path: P, layout: FlashLayout) {
        self.flash_layouts.insert(to_posix(path.as_ref()), layout);
    }

    pub fn module_paths(&self) -> impl Iterator<Item = &String> {
        self.modules.keys()
    }

    fn key_for(&self, path: &Path) -> String {
        if let Some(root) = &self.root {
            if let Ok(stripped) = path.strip_prefix(root) {
                return os_path_to_string(stripped);
            }
        }
        to_posix(&os_path_to_string(path))
    }
}

impl DocumentSource for MemoryDocuments {
    fn module(&self, path: &Path) -> Result<ModuleDescription, GraphError> {
        let key = self.key_for(path);
        self.modules
            .get(&key)
            .cloned()
            .ok_or_else(|| GraphError::Document(format!("no module description for {key}")))
    }

    fn platform(&self, path: &Path, env: &BuildEnv) -> Result<PlatformDescription, GraphError> {
        let key = self.key_for(path);
        let platform = self
            .platforms
            .get(&key)
            .ok_or_else(|| GraphError::Document(format!("no platform description for {key}")))?;
        let target = env.get(TARGET).unwrap_or_default();
        let mut description = platform.description.clone();
        description.components.retain(|component| {
            platform
                .target_guards
                .get(&component.path)
                .map(|targets| targets.iter().any(|t| t.eq_ignore_ascii_case(target)))
                .unwrap_or(true)
        });
        if description.included_files.is_empty() {
            description.included_files.push(key);
        }
        Ok(description)
    }

    fn flash_layout(&self, path: &Path, _env: &BuildEnv) -> Result<FlashLayout, GraphError> {
        let key = self.key_for(path);
        self.flash_layouts
            .get(&key)
            .cloned()
            .ok_or_else(|| GraphError::Document(format!("no flash layout for {key}")))
    }
}
