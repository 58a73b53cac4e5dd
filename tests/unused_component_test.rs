//! Components left out of every firmware volume, and the libraries only they pull in.
mod common;

use common::*;
use edk2_graph::{
    compiler::GraphCompiler,
    db::{db_init, EnvironmentId, StoreLocation},
    paths::WorkspacePaths,
    tables::{InstancedFvTable, InstancedInfTable},
    view::{
        DeclaredComponent, FirmwareVolume, FlashLayout, MemoryDocuments, PlatformDescription,
        ScopedLibraryMap,
    },
};
use std::sync::Arc;
use test_log::test;

const DRIVER1: &str = "TestPkg/Driver1/TestDriver1.inf";
const DRIVER2: &str = "TestPkg/Driver2/TestDriver2.inf";

fn lib(n: usize) -> String {
    format!("TestPkg/Library/TestLib{n}/TestLib{n}.inf")
}

fn flash_layout(modules: &[&str]) -> FlashLayout {
    FlashLayout {
        volumes: vec![FirmwareVolume {
            name: "TESTFV".to_string(),
            modules: modules.iter().map(|m| m.to_string()).collect(),
        }],
    }
}

#[test(tokio::test)]
async fn component_outside_every_volume_is_unused() {
    let env = build_env("X64");
    let mut docs = MemoryDocuments::new();
    docs.insert_module(lib(1), library("TestLib1", "TestCls1", &[]));
    docs.insert_module(lib(2), library("TestLib2", "TestCls2", &[]));
    docs.insert_module(lib(3), library("TestLib3", "TestCls3", &[]));
    docs.insert_module(DRIVER1, driver("TestDriver1", "DXE_DRIVER", &["TestCls1"]));
    docs.insert_module(DRIVER2, driver("TestDriver2", "DXE_DRIVER", &["TestCls2"]));
    docs.insert_platform(
        DSC,
        PlatformDescription {
            components: vec![
                DeclaredComponent::new(DRIVER1, "X64"),
                DeclaredComponent::new(DRIVER2, "X64"),
            ],
            library_classes: ScopedLibraryMap::from_iter([
                ("common.TestCls1".to_string(), lib(1)),
                ("common.TestCls2".to_string(), lib(2)),
            ]),
            ..Default::default()
        },
    );
    docs.insert_flash_layout(FDF, flash_layout(&[DRIVER1]));
    let mut compiler = memory_compiler(docs).await;
    compiler
        .register(InstancedFvTable::new(&env).unwrap())
        .register(InstancedInfTable::new(&env).unwrap());
    compiler.parse(&env).await.unwrap();

    let unused = compiler
        .connection()
        .unused_components(None, false)
        .await
        .unwrap();
    assert_eq!(unused.components, vec![DRIVER2]);
    assert_eq!(unused.libraries, vec![lib(2)]);
}

/// The platform with both drivers built for `arch` only and per-arch library mappings.
fn per_arch_documents(arch: &str) -> MemoryDocuments {
    let mut docs = MemoryDocuments::new();
    docs.insert_module(lib(1), library("TestLib1", "TestCls", &[]));
    docs.insert_module(lib(2), library("TestLib2", "TestCls", &[]));
    docs.insert_module(lib(3), library("TestLib3", "TestCls2", &[]));
    docs.insert_module(lib(4), library("TestLib4", "TestCls2", &[]));
    docs.insert_module(DRIVER1, driver("TestDriver1", "DXE_DRIVER", &["TestCls"]));
    docs.insert_module(DRIVER2, driver("TestDriver2", "DXE_DRIVER", &["TestCls2"]));
    docs.insert_platform(
        DSC,
        PlatformDescription {
            components: vec![
                DeclaredComponent::new(DRIVER1, arch),
                DeclaredComponent::new(DRIVER2, arch),
            ],
            library_classes: ScopedLibraryMap::from_iter([
                ("ia32.TestCls".to_string(), lib(1)),
                ("ia32.TestCls2".to_string(), lib(3)),
                ("x64.TestCls".to_string(), lib(2)),
                ("x64.TestCls2".to_string(), lib(4)),
            ]),
            ..Default::default()
        },
    );
    docs.insert_flash_layout(FDF, flash_layout(&[DRIVER1]));
    docs
}

#[test(tokio::test)]
async fn unused_components_per_environment() {
    let db = db_init(StoreLocation::Memory).await.unwrap();
    let mut ids = Vec::default();
    for arch in ["IA32", "X64"] {
        let env = build_env(arch);
        let mut compiler = GraphCompiler::new(
            db.clone(),
            WorkspacePaths::new(WORKSPACE),
            Arc::new(per_arch_documents(arch).rooted(WORKSPACE)),
        );
        compiler
            .register(InstancedFvTable::new(&env).unwrap())
            .register(InstancedInfTable::new(&env).unwrap());
        ids.push(compiler.parse(&env).await.unwrap());
    }
    assert_eq!(ids, vec![EnvironmentId(1), EnvironmentId(2)]);

    let ia32 = db.unused_components(Some(ids[0]), false).await.unwrap();
    assert_eq!(ia32.components, vec![DRIVER2]);
    assert_eq!(ia32.libraries, vec![lib(3)]);

    let x64 = db.unused_components(Some(ids[1]), false).await.unwrap();
    assert_eq!(x64.components, vec![DRIVER2]);
    assert_eq!(x64.libraries, vec![lib(4)]);

    // Across runs the driver is reported once, with the libraries of both builds.
    let all = db.unused_components(None, false).await.unwrap();
    assert_eq!(all.components, vec![DRIVER2]);
    assert_eq!(all.libraries, vec![lib(3), lib(4)]);
}

#[test(tokio::test)]
async fn applications_can_be_ignored() {
    let env = build_env("X64");
    let mut docs = MemoryDocuments::new();
    docs.insert_module(lib(1), library("TestLib1", "TestCls1", &[]));
    docs.insert_module(
        DRIVER1,
        driver("TestDriver1", "UEFI_APPLICATION", &["TestCls1"]),
    );
    docs.insert_platform(
        DSC,
        PlatformDescription {
            components: vec![DeclaredComponent::new(DRIVER1, "X64")],
            library_classes: ScopedLibraryMap::from_iter([(
                "common.TestCls1".to_string(),
                lib(1),
            )]),
            ..Default::default()
        },
    );
    docs.insert_flash_layout(FDF, flash_layout(&[]));
    let mut compiler = memory_compiler(docs).await;
    compiler
        .register(InstancedFvTable::new(&env).unwrap())
        .register(InstancedInfTable::new(&env).unwrap());
    compiler.parse(&env).await.unwrap();

    let db = compiler.connection();
    let unused = db.unused_components(None, false).await.unwrap();
    assert_eq!(unused.components, vec![DRIVER1]);
    assert_eq!(unused.libraries, vec![lib(1)]);

    let unused = db.unused_components(None, true).await.unwrap();
    assert!(unused.components.is_empty());
    assert!(unused.libraries.is_empty());
}
