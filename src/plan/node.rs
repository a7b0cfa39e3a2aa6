use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Node priority
///
/// Values outside the enumerated set are kept as `Unknown` so they survive a
/// load/save cycle and can be reported by the validator.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum Priority {
    High,
    #[default]
    Medium,
    Low,
    /// Value not recognized by this version
    Unknown(String),
}

impl Priority {
    pub fn as_str(&self) -> &str {
        match self {
            Priority::High => "high",
            Priority::Medium => "medium",
            Priority::Low => "low",
            Priority::Unknown(s) => s,
        }
    }

    pub fn is_known(&self) -> bool {
        !matches!(self, Priority::Unknown(_))
    }
}

impl FromStr for Priority {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "high" => Ok(Priority::High),
            "medium" => Ok(Priority::Medium),
            "low" => Ok(Priority::Low),
            _ => Err(format!(
                "Invalid priority '{}'. Valid options are: high, medium, low",
                s
            )),
        }
    }
}

impl From<String> for Priority {
    fn from(s: String) -> Self {
        s.parse().unwrap_or(Priority::Unknown(s))
    }
}

impl From<Priority> for String {
    fn from(p: Priority) -> Self {
        p.as_str().to_string()
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Node progress status
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum Status {
    #[default]
    Pending,
    InProgress,
    Completed,
    /// Value not recognized by this version
    Unknown(String),
}

impl Status {
    pub fn as_str(&self) -> &str {
        match self {
            Status::Pending => "pending",
            Status::InProgress => "in-progress",
            Status::Completed => "completed",
            Status::Unknown(s) => s,
        }
    }

    pub fn is_known(&self) -> bool {
        !matches!(self, Status::Unknown(_))
    }
}

impl FromStr for Status {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Status::Pending),
            "in-progress" => Ok(Status::InProgress),
            "completed" => Ok(Status::Completed),
            _ => Err(format!(
                "Invalid status '{}'. Valid options are: pending, in-progress, completed",
                s
            )),
        }
    }
}

impl From<String> for Status {
    fn from(s: String) -> Self {
        s.parse().unwrap_or(Status::Unknown(s))
    }
}

impl From<Status> for String {
    fn from(s: Status) -> Self {
        s.as_str().to_string()
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A code snippet attached to a node
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct CodeBlock {
    /// Language name (e.g., "rust", "bash"); empty when the file omits it
    #[serde(default)]
    pub language: String,
    /// Raw code, stored byte for byte
    #[serde(default)]
    pub content: String,
}

/// Placeholder referencing another plan file
///
/// `src` is relative to the directory of the file that contains the directive.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ImportDirective {
    pub src: String,
}

impl ImportDirective {
    pub fn new(src: impl Into<String>) -> Self {
        Self { src: src.into() }
    }
}

/// One child slot of a node or of a document's top level
#[derive(Debug, Clone, PartialEq)]
pub enum Entry {
    Node(Node),
    Import(ImportDirective),
}

impl Entry {
    pub fn as_node(&self) -> Option<&Node> {
        match self {
            Entry::Node(n) => Some(n),
            Entry::Import(_) => None,
        }
    }

    pub fn as_node_mut(&mut self) -> Option<&mut Node> {
        match self {
            Entry::Node(n) => Some(n),
            Entry::Import(_) => None,
        }
    }
}

impl From<Node> for Entry {
    fn from(node: Node) -> Self {
        Entry::Node(node)
    }
}

impl From<ImportDirective> for Entry {
    fn from(directive: ImportDirective) -> Self {
        Entry::Import(directive)
    }
}

/// A single task or idea in a project plan
///
/// Parents exclusively own their children and child order is significant.
/// Which file a node lives in is not part of the node; see
/// [`ProvenanceMap`](crate::ProvenanceMap).
///
/// The serde representation is the JSON mirror of the XML format
/// (camelCase keys, absent optionals omitted).
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Node {
    /// Identifier, unique within a merged tree
    pub id: String,
    /// Non-empty title
    pub title: String,
    pub priority: Priority,
    pub status: Status,
    /// Optional start date (format: YYYY-MM-DD)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub start_date: Option<String>,
    /// Optional end date (format: YYYY-MM-DD)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub end_date: Option<String>,
    #[serde(skip_serializing_if = "is_zero")]
    pub days_spent: u32,
    /// Rich text; may contain fenced or inline code and CLI lines
    #[serde(skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<CodeBlock>,
    /// Prompt text handed to an LLM when working on this node
    #[serde(skip_serializing_if = "Option::is_none")]
    pub task_prompt_for_llm: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cli_command: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<Entry>,
}

fn is_zero(n: &u32) -> bool {
    *n == 0
}

impl Node {
    /// Create a node with default priority and status
    pub fn new(id: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            ..Default::default()
        }
    }

    /// Builder-style helper for appending a child node
    pub fn with_child(mut self, child: Node) -> Self {
        self.children.push(Entry::Node(child));
        self
    }

    /// Builder-style helper for appending an import directive
    pub fn with_import(mut self, src: impl Into<String>) -> Self {
        self.children.push(Entry::Import(ImportDirective::new(src)));
        self
    }

    /// Iterate over child nodes, skipping import directives
    pub fn child_nodes(&self) -> impl Iterator<Item = &Node> {
        self.children.iter().filter_map(Entry::as_node)
    }

    /// True when the node has no attached content and no children
    pub fn is_leaf(&self) -> bool {
        self.children.is_empty()
            && self.comment.is_none()
            && self.code.is_none()
            && self.task_prompt_for_llm.is_none()
            && self.cli_command.is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let node = Node::new("n1", "Write docs");
        assert_eq!(node.priority, Priority::Medium);
        assert_eq!(node.status, Status::Pending);
        assert_eq!(node.days_spent, 0);
        assert!(node.is_leaf());
    }

    #[test]
    fn test_unknown_values_are_preserved() {
        let p = Priority::from("urgent".to_string());
        assert_eq!(p, Priority::Unknown("urgent".to_string()));
        assert_eq!(p.as_str(), "urgent");
        assert!(!p.is_known());

        let s = Status::from("in-progress".to_string());
        assert_eq!(s, Status::InProgress);
        assert_eq!(String::from(s), "in-progress");
    }

    #[test]
    fn test_child_nodes_skips_imports() {
        let node = Node::new("r", "Root")
            .with_child(Node::new("a", "A"))
            .with_import("mod.xml")
            .with_child(Node::new("b", "B"));
        let ids: Vec<&str> = node.child_nodes().map(|n| n.id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b"]);
        assert_eq!(node.children.len(), 3);
    }
}
