//! Text output for the command line
//!
//! Rendering is a one-way projection of the tree; nothing here feeds back
//! into a document.

use crate::error::PlanIssue;
use crate::plan::{Document, Entry, Node, Status};
use crate::provenance::ProvenanceMap;
use crate::split_save::SaveReport;
use crate::validation::ValidationReport;
use std::path::Path;

const PENDING: char = '○';
const IN_PROGRESS: char = '◐';
const COMPLETED: char = '●';
const UNKNOWN: char = '?';

fn status_symbol(status: &Status) -> char {
    match status {
        Status::Pending => PENDING,
        Status::InProgress => IN_PROGRESS,
        Status::Completed => COMPLETED,
        Status::Unknown(_) => UNKNOWN,
    }
}

/// Render a plan as an ASCII tree
///
/// With a provenance map, every node that starts a file other than the
/// root is tagged with that file's name.
///
/// Example output:
/// ```text
/// ○ Release
/// ├── ● Changelog
/// └── ◐ Packaging [packaging.xml]
///     └── ○ Sign artifacts
/// ```
pub fn render_tree(document: &Document, provenance: Option<&ProvenanceMap>) -> String {
    let mut output = String::new();
    for node in document.roots() {
        render_line(&mut output, node, "", provenance);
        render_children(&mut output, &node.children, "", provenance);
    }
    output
}

fn render_line(output: &mut String, node: &Node, lead: &str, provenance: Option<&ProvenanceMap>) {
    output.push_str(lead);
    output.push(status_symbol(&node.status));
    output.push(' ');
    output.push_str(&node.title);
    if let Some(provenance) = provenance
        && let Some(origin) = provenance.origin(&node.id)
        && origin.boundary
        && origin.file != provenance.root()
    {
        let name = origin
            .file
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| origin.file.display().to_string());
        output.push_str(&format!(" [{}]", name));
    }
    output.push('\n');
}

fn render_children(output: &mut String, children: &[Entry], prefix: &str, provenance: Option<&ProvenanceMap>) {
    for (i, child) in children.iter().enumerate() {
        let is_last = i == children.len() - 1;
        let branch = if is_last { "└── " } else { "├── " };
        match child {
            Entry::Node(node) => {
                render_line(output, node, &format!("{}{}", prefix, branch), provenance);
                let continuation = if is_last { "    " } else { "│   " };
                render_children(output, &node.children, &format!("{}{}", prefix, continuation), provenance);
            }
            Entry::Import(directive) => {
                output.push_str(&format!("{}{}<import {}>\n", prefix, branch, directive.src));
            }
        }
    }
}

/// Format a list of issues under a heading, one per line
pub fn format_issues(heading: &str, issues: &[PlanIssue]) -> String {
    if issues.is_empty() {
        return String::new();
    }
    let mut result = format!("{} ({}):\n", heading, issues.len());
    for issue in issues {
        result.push_str(&format!("  - {}\n", issue));
    }
    result
}

/// Summary of a validation run
pub fn format_validation(path: &Path, report: &ValidationReport) -> String {
    let mut result = format!(
        "{}: {} ({} node(s), {} file(s))\n",
        path.display(),
        if report.valid { "valid" } else { "invalid" },
        report.node_count,
        report.files_processed
    );
    for (label, issues) in [("error", &report.errors), ("warning", &report.warnings)] {
        for issue in issues {
            result.push_str(&format!("  {}: {}\n", label, issue));
        }
    }
    result
}

/// Summary of a split-save
pub fn format_save_report(report: &SaveReport) -> String {
    let mut result = if report.is_success() {
        format!(
            "Saved: {} written, {} unchanged\n",
            report.written_files.len(),
            report.unchanged_files.len()
        )
    } else {
        "Save aborted\n".to_string()
    };
    for path in &report.written_files {
        result.push_str(&format!("  wrote {}\n", path.display()));
    }
    result.push_str(&format_issues("Errors", &report.errors));
    result.push_str(&format_issues("Warnings", &report.warnings));
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provenance::NodeOrigin;
    use std::path::PathBuf;

    #[test]
    fn test_render_tree() {
        let mut done = Node::new("c", "Changelog");
        done.status = Status::Completed;
        let mut packaging = Node::new("p", "Packaging").with_child(Node::new("s", "Sign artifacts"));
        packaging.status = Status::InProgress;
        let doc = Document::with_nodes([Node::new("r", "Release").with_child(done).with_child(packaging)]);

        let mut provenance = ProvenanceMap::new("/p/root.xml");
        provenance.record_node(
            "p",
            NodeOrigin {
                file: PathBuf::from("/p/packaging.xml"),
                parent: Some("r".to_string()),
                boundary: true,
            },
        );

        let output = render_tree(&doc, Some(&provenance));
        assert_eq!(
            output,
            "○ Release\n├── ● Changelog\n└── ◐ Packaging [packaging.xml]\n    └── ○ Sign artifacts\n"
        );
        assert!(!render_tree(&doc, None).contains('['));
    }

    #[test]
    fn test_render_import_entry() {
        let doc = Document::with_nodes([Node::new("r", "R").with_import("mod.xml")]);
        assert_eq!(render_tree(&doc, None), "○ R\n└── <import mod.xml>\n");
    }

    #[test]
    fn test_format_issues() {
        assert_eq!(format_issues("Errors", &[]), "");
        let issues = vec![PlanIssue::Conflict {
            file: PathBuf::from("/p/a.xml"),
        }];
        assert_eq!(
            format_issues("Errors", &issues),
            "Errors (1):\n  - /p/a.xml: file was modified on disk since it was loaded\n"
        );
    }
}
