//! Common test utilities for integration tests
#![allow(dead_code)]

use mindplan::{MemoryStore, PlanConfig, Resolution, resolve};
use std::path::{Path, PathBuf};

pub const HEADER: &str = "<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n<project_plan version=\"1.0\">\n";
pub const FOOTER: &str = "</project_plan>\n";

/// Wrap node markup into a complete plan file
pub fn plan_xml(body: &str) -> String {
    format!("{}{}{}", HEADER, body, FOOTER)
}

/// A self-closing node line in canonical form
pub fn leaf(indent: usize, id: &str, title: &str) -> String {
    format!(
        "{}<node title=\"{}\" priority=\"medium\" status=\"pending\" id=\"{}\"/>\n",
        "  ".repeat(indent),
        title,
        id
    )
}

/// `root.xml`: R(r1) with child L(l1) and an import of `mod.xml`
pub fn scenario_root() -> String {
    plan_xml(&format!(
        "  <node title=\"R\" priority=\"medium\" status=\"pending\" id=\"r1\">\n{}    <import src=\"mod.xml\"/>\n  </node>\n",
        leaf(2, "l1", "L")
    ))
}

/// `mod.xml`: M(m1) with child C(c1)
pub fn scenario_mod() -> String {
    plan_xml(&format!(
        "  <node title=\"M\" priority=\"medium\" status=\"pending\" id=\"m1\">\n{}  </node>\n",
        leaf(2, "c1", "C")
    ))
}

pub fn root_path() -> PathBuf {
    PathBuf::from("/plans/root.xml")
}

pub fn mod_path() -> PathBuf {
    PathBuf::from("/plans/mod.xml")
}

/// In-memory store holding the root.xml / mod.xml scenario
pub fn scenario_store() -> MemoryStore {
    MemoryStore::new()
        .with_file(root_path(), scenario_root())
        .with_file(mod_path(), scenario_mod())
}

pub async fn load(store: &MemoryStore, root: impl AsRef<Path>) -> Resolution {
    resolve(store, root, &PlanConfig::default()).await
}

/// Sorted ids of the nodes a file defines after a fresh resolve
pub async fn ids_in(store: &MemoryStore, root: impl AsRef<Path>, file: impl AsRef<Path>) -> Vec<String> {
    let resolution = load(store, root).await;
    resolution
        .provenance
        .nodes_in(file.as_ref())
        .into_iter()
        .map(str::to_string)
        .collect()
}

/// Write files below a temp directory
pub fn write_files(dir: &Path, files: &[(&str, String)]) {
    for (name, contents) in files {
        let path = dir.join(name);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).unwrap();
        }
        std::fs::write(path, contents).unwrap();
    }
}
