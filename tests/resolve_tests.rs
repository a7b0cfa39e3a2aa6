//! Import resolution tests
mod common;

use common::*;
use mindplan::{Entry, ImportState, MemoryStore, PlanIssue, Severity};
use std::path::Path;

// ルートとモジュールが正しくマージされること
#[tokio::test]
async fn test_scenario_merged_tree_and_provenance() {
    let store = scenario_store();
    let resolution = load(&store, root_path()).await;

    assert!(resolution.errors.is_empty(), "{:?}", resolution.errors);
    assert!(resolution.warnings.is_empty(), "{:?}", resolution.warnings);

    let roots: Vec<_> = resolution.document.roots().collect();
    assert_eq!(roots.len(), 1);
    let r = roots[0];
    assert_eq!(r.id, "r1");
    let children: Vec<&str> = r.child_nodes().map(|n| n.id.as_str()).collect();
    assert_eq!(children, vec!["l1", "m1"]);
    assert!(r.children.iter().all(|e| matches!(e, Entry::Node(_))));
    let m = resolution.document.find("m1").unwrap();
    assert_eq!(m.child_nodes().map(|n| n.id.as_str()).collect::<Vec<_>>(), vec!["c1"]);

    let provenance = &resolution.provenance;
    for id in ["r1", "l1"] {
        assert_eq!(provenance.source_file(id), Some(root_path().as_path()));
    }
    for id in ["m1", "c1"] {
        assert_eq!(provenance.source_file(id), Some(mod_path().as_path()));
    }
    assert_eq!(resolution.files_loaded(), 2);
}

// 同じルートを2回解決しても結果が同一であること
#[tokio::test]
async fn test_resolution_is_idempotent() {
    let store = scenario_store();
    let first = load(&store, root_path()).await;
    let second = load(&store, root_path()).await;
    assert_eq!(first.document, second.document);
    assert_eq!(first.provenance, second.provenance);
    assert_eq!(first.errors, second.errors);
    assert_eq!(first.warnings, second.warnings);
}

// A→B→A の循環で警告が1つだけ出ること
#[tokio::test]
async fn test_two_file_cycle() {
    let store = MemoryStore::new()
        .with_file("/c/a.xml", plan_xml(&format!("{}  <import src=\"b.xml\"/>\n", leaf(1, "a", "A"))))
        .with_file("/c/b.xml", plan_xml(&format!("{}  <import src=\"a.xml\"/>\n", leaf(1, "b", "B"))));
    let resolution = load(&store, "/c/a.xml").await;

    assert_eq!(resolution.document.ids(), vec!["a", "b"]);
    assert!(resolution.errors.is_empty(), "{:?}", resolution.errors);
    assert_eq!(resolution.warnings.len(), 1);
    match &resolution.warnings[0] {
        PlanIssue::Cycle { importer, src, chain } => {
            assert_eq!(importer, Path::new("/c/b.xml"));
            assert_eq!(src, "a.xml");
            assert_eq!(chain.len(), 3);
        }
        other => panic!("unexpected issue {:?}", other),
    }
    assert_eq!(resolution.warnings[0].severity(), Severity::Warning);
}

// 長い循環と自己参照でも停止すること
#[tokio::test]
async fn test_longer_cycle_and_self_import() {
    let store = MemoryStore::new()
        .with_file("/c/a.xml", plan_xml(&format!("{}  <import src=\"b.xml\"/>\n", leaf(1, "a", "A"))))
        .with_file("/c/b.xml", plan_xml(&format!("{}  <import src=\"./sub/../c.xml\"/>\n", leaf(1, "b", "B"))))
        .with_file("/c/c.xml", plan_xml(&format!("{}  <import src=\"a.xml\"/>\n", leaf(1, "c", "C"))))
        .with_file("/c/self.xml", plan_xml(&format!("{}  <import src=\"self.xml\"/>\n", leaf(1, "s", "S"))));

    let resolution = load(&store, "/c/a.xml").await;
    assert_eq!(resolution.document.ids(), vec!["a", "b", "c"]);
    assert_eq!(resolution.warnings.len(), 1);

    let resolution = load(&store, "/c/self.xml").await;
    assert_eq!(resolution.document.ids(), vec!["s"]);
    assert_eq!(resolution.warnings.len(), 1);
    assert_eq!(resolution.provenance.imports()[0].state, ImportState::Cyclic);
}

// 2つの独立した循環にはそれぞれ警告が出ること
#[tokio::test]
async fn test_one_warning_per_closed_cycle() {
    let store = MemoryStore::new()
        .with_file(
            "/c/a.xml",
            plan_xml(&format!(
                "{}  <import src=\"b.xml\"/>\n  <import src=\"c.xml\"/>\n",
                leaf(1, "a", "A")
            )),
        )
        .with_file("/c/b.xml", plan_xml(&format!("{}  <import src=\"a.xml\"/>\n", leaf(1, "b", "B"))))
        .with_file("/c/c.xml", plan_xml(&format!("{}  <import src=\"a.xml\"/>\n", leaf(1, "c", "C"))));
    let resolution = load(&store, "/c/a.xml").await;
    assert_eq!(resolution.document.ids(), vec!["a", "b", "c"]);
    assert_eq!(
        resolution
            .warnings
            .iter()
            .filter(|w| matches!(w, PlanIssue::Cycle { .. }))
            .count(),
        2
    );
}

// 見つからないインポートはその枝だけが欠けること
#[tokio::test]
async fn test_missing_import_degrades_only_its_branch() {
    let store = MemoryStore::new()
        .with_file(
            "/p/root.xml",
            plan_xml(&format!(
                "  <node title=\"R\" priority=\"medium\" status=\"pending\" id=\"r\">\n    <import src=\"gone.xml\"/>\n    <import src=\"mod.xml\"/>\n  </node>\n{}",
                leaf(1, "z", "Z")
            )),
        )
        .with_file("/p/mod.xml", plan_xml(&leaf(1, "m", "M")));
    let resolution = load(&store, "/p/root.xml").await;

    assert_eq!(resolution.document.ids(), vec!["r", "m", "z"]);
    assert_eq!(resolution.errors.len(), 1);
    match &resolution.errors[0] {
        PlanIssue::Resolution { importer, src, target, .. } => {
            assert_eq!(importer, Path::new("/p/root.xml"));
            assert_eq!(src, "gone.xml");
            assert_eq!(target, Path::new("/p/gone.xml"));
        }
        other => panic!("unexpected issue {:?}", other),
    }
    let states: Vec<_> = resolution.provenance.imports().iter().map(|r| r.state).collect();
    assert!(states.contains(&ImportState::Missing));
    assert!(states.contains(&ImportState::Resolved));
}

// 壊れたファイルはパースエラーとして報告されること
#[tokio::test]
async fn test_malformed_import_is_parse_error() {
    let store = MemoryStore::new()
        .with_file(
            "/p/root.xml",
            plan_xml(&format!("{}  <import src=\"bad.xml\"/>\n", leaf(1, "a", "A"))),
        )
        .with_file("/p/bad.xml", "<project_plan><node id=\"x\" title=\"X\">");
    let resolution = load(&store, "/p/root.xml").await;

    assert_eq!(resolution.document.ids(), vec!["a"]);
    assert!(matches!(
        &resolution.errors[0],
        PlanIssue::Parse { file, .. } if file == Path::new("/p/bad.xml")
    ));
    assert!(!resolution.provenance.contains_file(Path::new("/p/bad.xml")));
    assert_eq!(resolution.provenance.imports()[0].state, ImportState::Malformed);
}

// XMLからJSONファイルをインポートできること
#[tokio::test]
async fn test_json_import() {
    let json = r#"{"type": "project_plan", "version": "1.0", "nodes": [
        {"id": "j1", "title": "From JSON", "status": "completed", "children": [
            {"id": "j2", "title": "Nested"}
        ]}
    ]}"#;
    let store = MemoryStore::new()
        .with_file(
            "/p/root.xml",
            plan_xml(&format!("{}  <import src=\"parts/data.json\"/>\n", leaf(1, "a", "A"))),
        )
        .with_file("/p/parts/data.json", json);
    let resolution = load(&store, "/p/root.xml").await;

    assert!(resolution.errors.is_empty(), "{:?}", resolution.errors);
    assert_eq!(resolution.document.ids(), vec!["a", "j1", "j2"]);
    assert_eq!(
        resolution.provenance.source_file("j2"),
        Some(Path::new("/p/parts/data.json"))
    );
}

// ファイルごとの検証結果がファイル名付きで返ること
#[tokio::test]
async fn test_per_file_validation_issues() {
    let store = MemoryStore::new()
        .with_file(
            "/p/root.xml",
            plan_xml(&format!("{}  <import src=\"mod.xml\"/>\n", leaf(1, "a", "A"))),
        )
        .with_file(
            "/p/mod.xml",
            plan_xml("  <node title=\"M\" priority=\"urgent\" id=\"m\"/>\n  <node title=\"\" id=\"n\"/>\n"),
        );
    let resolution = load(&store, "/p/root.xml").await;

    assert_eq!(resolution.errors.len(), 1);
    assert_eq!(resolution.warnings.len(), 1);
    for issue in resolution.issues() {
        let PlanIssue::Validation(inner) = issue else {
            panic!("unexpected issue {:?}", issue);
        };
        assert_eq!(inner.file.as_deref(), Some(Path::new("/p/mod.xml")));
    }
}
