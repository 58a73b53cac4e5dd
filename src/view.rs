//! Structured views over parsed build descriptions.
//!
//! Tokenizing and evaluating the description languages is the job of whatever implements
//! [`DocumentSource`]. By the time a view reaches a table generator, `!include` directives and
//! `!if` conditionals have been applied for the [`BuildEnv`] it was requested with, and every
//! field is available in structured form:
//!
//! - [`ModuleDescription`]: one `.inf` file (defines, sources, needed library classes, PCDs)
//! - [`PlatformDescription`]: one expanded `.dsc` file (components and scoped library mappings)
//! - [`FlashLayout`]: one expanded `.fdf` file (firmware volumes and their embedded modules)
//!
//! [`memory::MemoryDocuments`] is an in-memory source, useful for fixtures and tests.
use crate::{config::BuildEnv, error::GraphError, paths::to_posix};
use serde::{Deserialize, Serialize};
use std::{collections::BTreeMap, path::Path};

pub mod memory;

pub use memory::MemoryDocuments;

pub const FILE_GUID: &str = "FILE_GUID";
pub const BASE_NAME: &str = "BASE_NAME";
pub const MODULE_TYPE: &str = "MODULE_TYPE";
pub const LIBRARY_CLASS: &str = "LIBRARY_CLASS";

/// Scope qualifier used for declarations that apply to every architecture.
pub const COMMON: &str = "common";

/// Library class name of override entries that are linked unconditionally.
pub const NULL_CLASS: &str = "NULL";

pub trait DocumentSource: Send + Sync {
    fn module(&self, path: &Path) -> Result<ModuleDescription, GraphError>;

    fn platform(&self, path: &Path, env: &BuildEnv) -> Result<PlatformDescription, GraphError>;

    fn flash_layout(&self, path: &Path, env: &BuildEnv) -> Result<FlashLayout, GraphError>;
}

/// A name declared in an architecture-scoped section, e.g. `[LibraryClasses.X64]`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScopedName {
    #[serde(default = "common_arch")]
    pub arch: String,
    pub name: String,
}

fn common_arch() -> String {
    COMMON.to_string()
}

impl ScopedName {
    pub fn common<S: Into<String>>(name: S) -> Self {
        ScopedName {
            arch: common_arch(),
            name: name.into(),
        }
    }

    pub fn for_arch<A: Into<String>, S: Into<String>>(arch: A, name: S) -> Self {
        ScopedName {
            arch: arch.into(),
            name: name.into(),
        }
    }

    pub fn applies_to(&self, arch: &str) -> bool {
        self.arch.eq_ignore_ascii_case(COMMON) || self.arch.eq_ignore_ascii_case(arch)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModuleDescription {
    /// `[Defines]` section key/value pairs.
    #[serde(default)]
    pub defines: BTreeMap<String, String>,
    #[serde(default)]
    pub sources: Vec<String>,
    /// `[LibraryClasses]` entries this module needs.
    #[serde(default)]
    pub library_classes: Vec<ScopedName>,
    #[serde(default)]
    pub pcds: Vec<String>,
}

impl ModuleDescription {
    pub fn define<K: Into<String>, V: Into<String>>(mut self, key: K, value: V) -> Self {
        self.defines.insert(key.into(), value.into());
        self
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.defines.get(key).map(String::as_str)
    }

    pub fn guid(&self) -> Option<&str> {
        self.get(FILE_GUID)
    }

    pub fn base_name(&self) -> Option<&str> {
        self.get(BASE_NAME)
    }

    pub fn module_type(&self) -> Option<&str> {
        self.get(MODULE_TYPE)
    }

    /// The library class this module provides, if it is a library instance. `LIBRARY_CLASS` may
    /// carry a `|`-separated list of supported module types which is not part of the name.
    pub fn library_class(&self) -> Option<&str> {
        self.get(LIBRARY_CLASS)
            .and_then(|value| value.split('|').next())
            .map(str::trim)
    }

    pub fn is_library(&self) -> bool {
        self.defines.contains_key(LIBRARY_CLASS)
    }

    /// Needed library class names for `arch`, including `common` entries, in declaration order.
    pub fn libraries_for(&self, arch: &str) -> Vec<&str> {
        self.library_classes
            .iter()
            .filter(|lib| lib.applies_to(arch))
            .filter_map(|lib| lib.name.split_whitespace().next())
            .collect()
    }

    /// Every needed library class name regardless of architecture.
    pub fn all_libraries(&self) -> Vec<&str> {
        self.library_classes
            .iter()
            .filter_map(|lib| lib.name.split_whitespace().next())
            .collect()
    }
}

/// Library class to instance mapping keyed by scope-qualified, case-folded names such as
/// `x64.dxe_driver.debuglib`, `common.peim.debuglib`, `ia32.debuglib` or `common.debuglib`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "BTreeMap<String, String>", into = "BTreeMap<String, String>")]
pub struct ScopedLibraryMap(BTreeMap<String, String>);

impl ScopedLibraryMap {
    pub fn insert<K: AsRef<str>, V: AsRef<str>>(&mut self, key: K, instance: V) {
        self.0
            .insert(key.as_ref().to_lowercase(), to_posix(instance.as_ref()));
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(&key.to_lowercase()).map(String::as_str)
    }

    pub fn remove(&mut self, key: &str) -> Option<String> {
        self.0.remove(&key.to_lowercase())
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<BTreeMap<String, String>> for ScopedLibraryMap {
    fn from(src: BTreeMap<String, String>) -> Self {
        src.into_iter().collect()
    }
}

impl From<ScopedLibraryMap> for BTreeMap<String, String> {
    fn from(src: ScopedLibraryMap) -> Self {
        src.0
    }
}

impl<K: AsRef<str>, V: AsRef<str>> FromIterator<(K, V)> for ScopedLibraryMap {
    fn from_iter<T: IntoIterator<Item = (K, V)>>(iter: T) -> Self {
        let mut map = ScopedLibraryMap::default();
        for (key, instance) in iter {
            map.insert(key, instance);
        }
        map
    }
}

/// The `<LibraryClasses>` block nested under a component in the platform description.
///
/// A `NULL` key under `libraries` is moved into `null_libraries` when deserializing.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "OverrideEntries")]
pub struct ComponentOverrides {
    pub libraries: BTreeMap<String, String>,
    /// `NULL|Path.inf` entries, linked into every module of the component.
    pub null_libraries: Vec<String>,
}

/// Overrides as written, before `NULL` entries are split out.
#[derive(Deserialize)]
struct OverrideEntries {
    #[serde(default)]
    libraries: BTreeMap<String, String>,
    #[serde(default)]
    null_libraries: Vec<String>,
}

impl From<OverrideEntries> for ComponentOverrides {
    fn from(entries: OverrideEntries) -> Self {
        let overrides = entries
            .null_libraries
            .iter()
            .fold(ComponentOverrides::default(), |acc, lib| {
                acc.library(NULL_CLASS, lib)
            });
        entries
            .libraries
            .into_iter()
            .fold(overrides, |acc, (class, lib)| acc.library(class, lib))
    }
}

impl ComponentOverrides {
    pub fn library<C: Into<String>, P: AsRef<str>>(mut self, class: C, instance: P) -> Self {
        let class = class.into();
        if class.eq_ignore_ascii_case(NULL_CLASS) {
            self.null_libraries.push(to_posix(instance.as_ref()));
        } else {
            self.libraries.insert(class, to_posix(instance.as_ref()));
        }
        self
    }

    pub fn get(&self, class: &str) -> Option<&str> {
        self.libraries
            .iter()
            .find(|(name, _)| name.eq_ignore_ascii_case(class))
            .map(|(_, instance)| instance.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeclaredComponent {
    pub path: String,
    /// Lower-cased architecture the component is built for, e.g. `x64`.
    pub scope: String,
    #[serde(default)]
    pub overrides: ComponentOverrides,
}

impl DeclaredComponent {
    pub fn new<P: AsRef<str>, S: AsRef<str>>(path: P, scope: S) -> Self {
        DeclaredComponent {
            path: to_posix(path.as_ref()),
            scope: scope.as_ref().to_lowercase(),
            overrides: ComponentOverrides::default(),
        }
    }

    pub fn with_overrides(mut self, overrides: ComponentOverrides) -> Self {
        self.overrides = overrides;
        self
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlatformDescription {
    #[serde(default)]
    pub components: Vec<DeclaredComponent>,
    #[serde(default)]
    pub library_classes: ScopedLibraryMap,
    /// Every description file that took part in the expansion, the active platform first.
    #[serde(default)]
    pub included_files: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FirmwareVolume {
    pub name: String,
    /// Module references as written, possibly prefixed with `RuleOverride = <rule>`.
    #[serde(default)]
    pub modules: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlashLayout {
    #[serde(default)]
    pub volumes: Vec<FirmwareVolume>,
}
