//! Identifier assignment for nodes created without one

use super::document::Document;
use super::node::Entry;
use std::collections::HashSet;
use uuid::Uuid;

/// Generate a fresh node id
pub fn new_node_id() -> String {
    Uuid::new_v4().to_string()
}

/// Give every node with an empty id a fresh UUID
///
/// Existing ids are left untouched, even when they are duplicates; duplicates
/// are reported by the validator.
///
/// # Returns
/// The number of ids assigned
pub fn assign_missing_ids(document: &mut Document) -> usize {
    fn go(entries: &mut [Entry], assigned: &mut usize) {
        for node in entries.iter_mut().filter_map(Entry::as_node_mut) {
            if node.id.trim().is_empty() {
                node.id = new_node_id();
                *assigned += 1;
            }
            go(&mut node.children, assigned);
        }
    }

    let mut assigned = 0;
    go(&mut document.entries, &mut assigned);
    assigned
}

/// Generate an id that is not yet used in `document`
pub fn unused_node_id(document: &Document) -> String {
    let taken: HashSet<&str> = document.ids().into_iter().collect();
    loop {
        let id = new_node_id();
        if !taken.contains(id.as_str()) {
            return id;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plan::Node;

    #[test]
    fn test_assign_missing_ids() {
        let mut doc = Document::with_nodes([Node::new("keep", "Keep")
            .with_child(Node::new("", "Anonymous"))
            .with_child(Node::new("  ", "Blank"))]);
        assert_eq!(assign_missing_ids(&mut doc), 2);
        let ids = doc.ids();
        assert_eq!(ids[0], "keep");
        assert!(ids.iter().all(|id| !id.trim().is_empty()));
        assert_ne!(ids[1], ids[2]);
        assert_eq!(assign_missing_ids(&mut doc), 0);
    }

    #[test]
    fn test_unused_node_id_avoids_existing_ids() {
        let doc = Document::with_nodes([Node::new("a", "A"), Node::new("b", "B")]);
        let id = unused_node_id(&doc);
        assert!(!doc.ids().contains(&id.as_str()));
        assert!(Uuid::parse_str(&id).is_ok());
    }
}
