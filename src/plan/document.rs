use super::node::{Entry, ImportDirective, Node};

/// Format version written to every plan file
pub const FORMAT_VERSION: &str = "1.0";

/// A plan document
///
/// Used both for one physical file (which may contain import directives) and
/// for the merged tree produced by resolution.
#[derive(Debug, Clone, PartialEq)]
pub struct Document {
    pub version: String,
    /// Top-level entries in file order
    pub entries: Vec<Entry>,
}

impl Default for Document {
    fn default() -> Self {
        Self {
            version: FORMAT_VERSION.to_string(),
            entries: Vec::new(),
        }
    }
}

impl Document {
    /// Create a new empty document
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_nodes(nodes: impl IntoIterator<Item = Node>) -> Self {
        Self {
            version: FORMAT_VERSION.to_string(),
            entries: nodes.into_iter().map(Entry::Node).collect(),
        }
    }

    /// Top-level nodes, skipping import directives
    pub fn roots(&self) -> impl Iterator<Item = &Node> {
        self.entries.iter().filter_map(Entry::as_node)
    }

    /// Visit every node in pre-order
    ///
    /// The visitor receives the node and the id of its parent (`None` at top level).
    pub fn visit<'a, F>(&'a self, mut visitor: F)
    where
        F: FnMut(&'a Node, Option<&'a str>),
    {
        fn go<'a, F>(entries: &'a [Entry], parent: Option<&'a str>, visitor: &mut F)
        where
            F: FnMut(&'a Node, Option<&'a str>),
        {
            for entry in entries {
                if let Entry::Node(node) = entry {
                    visitor(node, parent);
                    go(&node.children, Some(node.id.as_str()), visitor);
                }
            }
        }
        go(&self.entries, None, &mut visitor);
    }

    /// Visit every import directive with the id of the node that contains it
    pub fn visit_imports<'a, F>(&'a self, mut visitor: F)
    where
        F: FnMut(&'a ImportDirective, Option<&'a str>),
    {
        fn go<'a, F>(entries: &'a [Entry], parent: Option<&'a str>, visitor: &mut F)
        where
            F: FnMut(&'a ImportDirective, Option<&'a str>),
        {
            for entry in entries {
                match entry {
                    Entry::Node(node) => go(&node.children, Some(node.id.as_str()), visitor),
                    Entry::Import(directive) => visitor(directive, parent),
                }
            }
        }
        go(&self.entries, None, &mut visitor);
    }

    /// Count all nodes in the document
    pub fn node_count(&self) -> usize {
        let mut count = 0;
        self.visit(|_, _| count += 1);
        count
    }

    /// All node ids in pre-order
    pub fn ids(&self) -> Vec<&str> {
        let mut ids = Vec::new();
        self.visit(|node, _| ids.push(node.id.as_str()));
        ids
    }

    /// True when the document contains at least one import directive
    pub fn has_imports(&self) -> bool {
        let mut found = false;
        self.visit_imports(|_, _| found = true);
        found
    }

    /// Find a node by its ID
    pub fn find(&self, id: &str) -> Option<&Node> {
        fn go<'a>(entries: &'a [Entry], id: &str) -> Option<&'a Node> {
            for node in entries.iter().filter_map(Entry::as_node) {
                if node.id == id {
                    return Some(node);
                }
                if let Some(found) = go(&node.children, id) {
                    return Some(found);
                }
            }
            None
        }
        go(&self.entries, id)
    }

    /// Find a node by its ID and return a mutable reference
    pub fn find_mut(&mut self, id: &str) -> Option<&mut Node> {
        fn go<'a>(entries: &'a mut [Entry], id: &str) -> Option<&'a mut Node> {
            for node in entries.iter_mut().filter_map(Entry::as_node_mut) {
                if node.id == id {
                    return Some(node);
                }
                if let Some(found) = go(&mut node.children, id) {
                    return Some(found);
                }
            }
            None
        }
        go(&mut self.entries, id)
    }

    /// Id of the parent of `id`; `Some(None)` for a top-level node
    pub fn parent_of(&self, id: &str) -> Option<Option<&str>> {
        let mut result = None;
        self.visit(|node, parent| {
            if result.is_none() && node.id == id {
                result = Some(parent);
            }
        });
        result
    }

    /// Remove a node (with its subtree) and return it
    pub fn remove(&mut self, id: &str) -> Option<Node> {
        fn go(entries: &mut Vec<Entry>, id: &str) -> Option<Node> {
            if let Some(pos) = entries
                .iter()
                .position(|e| matches!(e, Entry::Node(n) if n.id == id))
            {
                return match entries.remove(pos) {
                    Entry::Node(node) => Some(node),
                    Entry::Import(_) => None,
                };
            }
            for node in entries.iter_mut().filter_map(Entry::as_node_mut) {
                if let Some(found) = go(&mut node.children, id) {
                    return Some(found);
                }
            }
            None
        }
        go(&mut self.entries, id)
    }

    /// Insert a node as the last child of `parent_id`, or at top level for `None`
    ///
    /// # Returns
    /// `false` when the parent does not exist
    pub fn insert_child(&mut self, parent_id: Option<&str>, node: Node) -> bool {
        self.insert_child_at(parent_id, usize::MAX, node)
    }

    /// Insert a node at `index` (clamped) among the children of `parent_id`
    pub fn insert_child_at(&mut self, parent_id: Option<&str>, index: usize, node: Node) -> bool {
        let entries = match parent_id {
            None => &mut self.entries,
            Some(pid) => match self.find_mut(pid) {
                Some(parent) => &mut parent.children,
                None => return false,
            },
        };
        let index = index.min(entries.len());
        entries.insert(index, Entry::Node(node));
        true
    }

    /// Move a node (with its subtree) under a new parent
    ///
    /// # Returns
    /// `false` when either node is missing or the target lies inside the moved subtree
    pub fn move_node(&mut self, id: &str, new_parent: Option<&str>, index: usize) -> bool {
        if let Some(target) = new_parent {
            match self.find(id) {
                Some(node) => {
                    let mut inside = node.id == target;
                    let sub = Document::with_nodes([node.clone()]);
                    sub.visit(|n, _| inside |= n.id == target);
                    if inside {
                        return false;
                    }
                }
                None => return false,
            }
            if self.find(target).is_none() {
                return false;
            }
        }
        match self.remove(id) {
            Some(node) => self.insert_child_at(new_parent, index, node),
            None => false,
        }
    }
}
