//! XML codec for `<project_plan>` documents
//!
//! Reading is done with `quick-xml`; writing is done by hand so that every
//! text field goes through the content sanitizer.

use super::CodecError;
use crate::plan::{CodeBlock, Document, Entry, FORMAT_VERSION, ImportDirective, Node};
use crate::sanitizer::{FieldKind, escape_attribute, sanitize_field};
use quick_xml::Reader;
use quick_xml::events::{BytesStart, Event};

const ROOT: &str = "project_plan";
const NODE: &str = "node";
const IMPORT: &str = "import";
const COMMENT: &str = "comment";
const CODE: &str = "code";
const PROMPT: &str = "taskPromptForLlm";
const CLI: &str = "cliCommand";

const INDENT: &str = "  ";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TextField {
    Comment,
    Code,
    Prompt,
    Cli,
}

impl TextField {
    fn from_name(name: &str) -> Option<Self> {
        match name {
            COMMENT => Some(TextField::Comment),
            CODE => Some(TextField::Code),
            PROMPT => Some(TextField::Prompt),
            CLI => Some(TextField::Cli),
            _ => None,
        }
    }

    /// Prose fields have their outer whitespace trimmed on load
    fn trims(self) -> bool {
        matches!(self, TextField::Comment | TextField::Prompt)
    }
}

enum Piece {
    Text(String),
    CData(String),
}

enum Frame {
    Root(Document),
    Node(Node),
    Import(ImportDirective),
    Field {
        field: TextField,
        language: String,
        pieces: Vec<Piece>,
    },
}

fn err(message: impl Into<String>) -> CodecError {
    CodecError::Xml(message.into())
}

/// Normalize line endings to LF as an XML processor does
fn normalize_line_endings(s: &str) -> String {
    s.replace("\r\n", "\n").replace('\r', "\n")
}

fn element_name(e: &BytesStart<'_>) -> Result<String, CodecError> {
    std::str::from_utf8(e.name().as_ref())
        .map(str::to_string)
        .map_err(|e| err(format!("element name is not UTF-8: {}", e)))
}

fn attributes(e: &BytesStart<'_>) -> Result<Vec<(String, String)>, CodecError> {
    let mut out = Vec::new();
    for attr in e.attributes() {
        let attr = attr.map_err(|e| err(e.to_string()))?;
        let key = std::str::from_utf8(attr.key.as_ref())
            .map_err(|e| err(format!("attribute name is not UTF-8: {}", e)))?
            .to_string();
        let value = attr
            .unescape_value()
            .map_err(|e| err(format!("attribute '{}': {}", key, e)))?
            .into_owned();
        out.push((key, value));
    }
    Ok(out)
}

fn node_from_attributes(attrs: Vec<(String, String)>) -> Result<Node, CodecError> {
    let mut node = Node::default();
    for (key, value) in attrs {
        match key.as_str() {
            "id" => node.id = value,
            "title" => node.title = value,
            "priority" => node.priority = value.into(),
            "status" => node.status = value.into(),
            "startDate" => node.start_date = Some(value),
            "endDate" => node.end_date = Some(value),
            "daysSpent" => {
                node.days_spent = value.trim().parse().map_err(|_| {
                    err(format!(
                        "invalid daysSpent '{}' on node '{}': expected a non-negative integer",
                        value, node.id
                    ))
                })?
            }
            // Unknown attributes are tolerated and dropped
            _ => {}
        }
    }
    Ok(node)
}

fn open(stack: &mut Vec<Frame>, e: &BytesStart<'_>) -> Result<(), CodecError> {
    let name = element_name(e)?;

    if stack.is_empty() {
        if name != ROOT {
            return Err(err(format!("expected <{}> root element, found <{}>", ROOT, name)));
        }
        let version = attributes(e)?
            .into_iter()
            .find(|(k, _)| k == "version")
            .map(|(_, v)| v)
            .unwrap_or_else(|| FORMAT_VERSION.to_string());
        stack.push(Frame::Root(Document {
            version,
            entries: Vec::new(),
        }));
        return Ok(());
    }

    let parent_is_container = matches!(stack.last(), Some(Frame::Root(_) | Frame::Node(_)));
    let parent_is_node = matches!(stack.last(), Some(Frame::Node(_)));

    match name.as_str() {
        NODE if parent_is_container => {
            stack.push(Frame::Node(node_from_attributes(attributes(e)?)?));
        }
        IMPORT if parent_is_container => {
            let src = attributes(e)?
                .into_iter()
                .find(|(k, _)| k == "src")
                .map(|(_, v)| v)
                .unwrap_or_default();
            stack.push(Frame::Import(ImportDirective { src }));
        }
        other if parent_is_node && TextField::from_name(other).is_some() => {
            let field = TextField::from_name(other).unwrap_or(TextField::Comment);
            let language = if field == TextField::Code {
                attributes(e)?
                    .into_iter()
                    .find(|(k, _)| k == "language")
                    .map(|(_, v)| v)
                    .unwrap_or_default()
            } else {
                String::new()
            };
            stack.push(Frame::Field {
                field,
                language,
                pieces: Vec::new(),
            });
        }
        other => return Err(err(format!("unexpected element <{}>", other))),
    }
    Ok(())
}

fn finish_field(field: TextField, pieces: Vec<Piece>) -> String {
    let last = pieces.len().saturating_sub(1);
    let mut out = String::new();
    for (i, piece) in pieces.into_iter().enumerate() {
        match piece {
            Piece::CData(s) => out.push_str(&s),
            Piece::Text(mut s) => {
                if field.trims() {
                    if i == 0 {
                        s = s.trim_start().to_string();
                    }
                    if i == last {
                        s = s.trim_end().to_string();
                    }
                }
                out.push_str(&s);
            }
        }
    }
    out
}

/// Pop the innermost frame and attach it to its parent
///
/// Returns the finished document when the root element closes.
fn close(stack: &mut Vec<Frame>) -> Result<Option<Document>, CodecError> {
    let frame = stack.pop().ok_or_else(|| err("unbalanced end tag"))?;

    let entry = match frame {
        Frame::Root(doc) => return Ok(Some(doc)),
        Frame::Node(node) => Entry::Node(node),
        Frame::Import(directive) => Entry::Import(directive),
        Frame::Field {
            field,
            language,
            pieces,
        } => {
            let text = finish_field(field, pieces);
            let Some(Frame::Node(node)) = stack.last_mut() else {
                return Err(err("text field outside of <node>"));
            };
            match field {
                TextField::Comment => node.comment = Some(text),
                TextField::Prompt => node.task_prompt_for_llm = Some(text),
                TextField::Cli => node.cli_command = Some(text),
                TextField::Code => {
                    node.code = Some(CodeBlock {
                        language,
                        content: text,
                    })
                }
            }
            return Ok(None);
        }
    };

    match stack.last_mut() {
        Some(Frame::Root(doc)) => doc.entries.push(entry),
        Some(Frame::Node(node)) => node.children.push(entry),
        _ => return Err(err("misplaced element")),
    }
    Ok(None)
}

fn push_text(stack: &mut [Frame], text: String, cdata: bool) -> Result<(), CodecError> {
    match stack.last_mut() {
        Some(Frame::Field { pieces, .. }) => {
            let text = normalize_line_endings(&text);
            pieces.push(if cdata {
                Piece::CData(text)
            } else {
                Piece::Text(text)
            });
            Ok(())
        }
        _ if !cdata && text.trim().is_empty() => Ok(()),
        _ => Err(err(format!(
            "unexpected character data '{}'",
            text.trim().chars().take(40).collect::<String>()
        ))),
    }
}

/// Parse an XML plan document
pub(super) fn decode(text: &str) -> Result<Document, CodecError> {
    let mut reader = Reader::from_str(text);
    let mut stack: Vec<Frame> = Vec::new();
    let mut document: Option<Document> = None;

    loop {
        let event = reader
            .read_event()
            .map_err(|e| err(format!("at byte {}: {}", reader.buffer_position(), e)))?;
        match event {
            Event::Start(e) => {
                if document.is_some() {
                    return Err(err("content after the root element"));
                }
                open(&mut stack, &e)?;
            }
            Event::Empty(e) => {
                if document.is_some() {
                    return Err(err("content after the root element"));
                }
                open(&mut stack, &e)?;
                if let Some(doc) = close(&mut stack)? {
                    document = Some(doc);
                }
            }
            Event::End(_) => {
                if let Some(doc) = close(&mut stack)? {
                    document = Some(doc);
                }
            }
            Event::Text(e) => {
                let text = e
                    .unescape()
                    .map_err(|e| err(format!("at byte {}: {}", reader.buffer_position(), e)))?
                    .into_owned();
                if stack.is_empty() {
                    if !text.trim().is_empty() {
                        return Err(err("text outside of the root element"));
                    }
                } else {
                    push_text(&mut stack, text, false)?;
                }
            }
            Event::CData(e) => {
                let text = String::from_utf8(e.into_inner().into_owned())
                    .map_err(|e| err(format!("CDATA is not UTF-8: {}", e)))?;
                push_text(&mut stack, text, true)?;
            }
            Event::Eof => break,
            // Declarations, comments, processing instructions and doctypes carry no plan data
            _ => {}
        }
    }

    if !stack.is_empty() {
        return Err(err("unexpected end of document: unclosed elements"));
    }
    document.ok_or_else(|| err(format!("missing <{}> root element", ROOT)))
}

/// Serialize a plan document as XML
pub(super) fn encode(document: &Document) -> Result<String, CodecError> {
    let mut out = String::from("<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n");
    out.push_str(&format!(
        "<{} version=\"{}\">\n",
        ROOT,
        escape_attribute(&document.version)?
    ));
    write_entries(&mut out, &document.entries, 1)?;
    out.push_str(&format!("</{}>\n", ROOT));
    Ok(out)
}

fn write_entries(out: &mut String, entries: &[Entry], depth: usize) -> Result<(), CodecError> {
    for entry in entries {
        match entry {
            Entry::Node(node) => write_node(out, node, depth)?,
            Entry::Import(directive) => {
                out.push_str(&INDENT.repeat(depth));
                out.push_str(&format!(
                    "<{} src=\"{}\"/>\n",
                    IMPORT,
                    escape_attribute(&directive.src)?
                ));
            }
        }
    }
    Ok(())
}

fn write_node(out: &mut String, node: &Node, depth: usize) -> Result<(), CodecError> {
    let pad = INDENT.repeat(depth);
    out.push_str(&pad);
    out.push_str(&format!(
        "<{} title=\"{}\" priority=\"{}\" status=\"{}\" id=\"{}\"",
        NODE,
        escape_attribute(&node.title)?,
        escape_attribute(node.priority.as_str())?,
        escape_attribute(node.status.as_str())?,
        escape_attribute(&node.id)?
    ));
    if let Some(date) = &node.start_date {
        out.push_str(&format!(" startDate=\"{}\"", escape_attribute(date)?));
    }
    if let Some(date) = &node.end_date {
        out.push_str(&format!(" endDate=\"{}\"", escape_attribute(date)?));
    }
    if node.days_spent > 0 {
        out.push_str(&format!(" daysSpent=\"{}\"", node.days_spent));
    }

    if node.is_leaf() {
        out.push_str("/>\n");
        return Ok(());
    }
    out.push_str(">\n");

    let inner = INDENT.repeat(depth + 1);
    if let Some(comment) = &node.comment {
        out.push_str(&format!(
            "{}<{}>{}</{}>\n",
            inner,
            COMMENT,
            sanitize_field(comment, FieldKind::Prose)?,
            COMMENT
        ));
    }
    if let Some(code) = &node.code {
        out.push_str(&inner);
        out.push_str(&format!("<{}", CODE));
        if !code.language.is_empty() {
            out.push_str(&format!(" language=\"{}\"", escape_attribute(&code.language)?));
        }
        out.push_str(&format!(
            ">{}</{}>\n",
            sanitize_field(&code.content, FieldKind::Payload)?,
            CODE
        ));
    }
    if let Some(prompt) = &node.task_prompt_for_llm {
        out.push_str(&format!(
            "{}<{}>{}</{}>\n",
            inner,
            PROMPT,
            sanitize_field(prompt, FieldKind::Prose)?,
            PROMPT
        ));
    }
    if let Some(cli) = &node.cli_command {
        out.push_str(&format!(
            "{}<{}>{}</{}>\n",
            inner,
            CLI,
            sanitize_field(cli, FieldKind::Payload)?,
            CLI
        ));
    }
    write_entries(out, &node.children, depth + 1)?;

    out.push_str(&pad);
    out.push_str(&format!("</{}>\n", NODE));
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plan::{Priority, Status};

    const SAMPLE: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<project_plan version="1.0">
  <node title="Root &amp; more" priority="high" status="in-progress" id="r1" startDate="2024-01-01" daysSpent="4">
    <comment>
      Check the <![CDATA[<config>]]> block &amp; report
    </comment>
    <code language="rust"><![CDATA[fn main() { println!("<hi>"); }]]></code>
    <taskPromptForLlm>Summarize</taskPromptForLlm>
    <cliCommand>cargo test</cliCommand>
    <node title="Leaf" id="l1"/>
    <import src="mod.xml"/>
  </node>
</project_plan>
"#;

    #[test]
    fn test_decode_sample() {
        let doc = decode(SAMPLE).unwrap();
        let root = doc.find("r1").unwrap();
        assert_eq!(root.title, "Root & more");
        assert_eq!(root.priority, Priority::High);
        assert_eq!(root.status, Status::InProgress);
        assert_eq!(root.start_date.as_deref(), Some("2024-01-01"));
        assert_eq!(root.days_spent, 4);
        assert_eq!(
            root.comment.as_deref(),
            Some("Check the <config> block & report")
        );
        let code = root.code.as_ref().unwrap();
        assert_eq!(code.language, "rust");
        assert_eq!(code.content, "fn main() { println!(\"<hi>\"); }");
        assert_eq!(root.cli_command.as_deref(), Some("cargo test"));
        assert_eq!(root.children.len(), 2);
        assert!(matches!(&root.children[1], Entry::Import(d) if d.src == "mod.xml"));

        let leaf = doc.find("l1").unwrap();
        assert_eq!(leaf.priority, Priority::Medium);
        assert_eq!(leaf.status, Status::Pending);
    }

    #[test]
    fn test_round_trip() {
        let doc = decode(SAMPLE).unwrap();
        let again = decode(&encode(&doc).unwrap()).unwrap();
        assert_eq!(doc, again);
    }

    #[test]
    fn test_payload_survives_round_trip() {
        let mut node = Node::new("n", "N");
        node.comment = Some("Try `<a>&\"it's\"</a>` & see ]]> here".to_string());
        node.code = Some(CodeBlock {
            language: "xml".to_string(),
            content: "<x><![CDATA[a]]></x>\n  indented".to_string(),
        });
        let doc = Document::with_nodes([node.clone()]);
        let text = encode(&doc).unwrap();
        assert!(text.contains("<![CDATA[`<a>&\"it's\"</a>`]]>"));
        assert!(text.contains("&amp; see ]]&gt; here"));
        let back = decode(&text).unwrap();
        assert_eq!(back.find("n").unwrap(), &node);
    }

    #[test]
    fn test_empty_document() {
        let text = encode(&Document::new()).unwrap();
        let doc = decode(&text).unwrap();
        assert!(doc.entries.is_empty());
        assert_eq!(doc.version, "1.0");
    }

    #[test]
    fn test_malformed_documents() {
        assert!(decode("<project_plan><node id=\"a\" title=\"A\">").is_err());
        assert!(decode("<plan/>").is_err());
        assert!(decode("<project_plan><node id=\"a\" title=\"A\"></nod></project_plan>").is_err());
        assert!(decode("<project_plan><widget/></project_plan>").is_err());
        assert!(decode("<project_plan>stray</project_plan>").is_err());
        assert!(decode("<project_plan><node id=\"a\" title=\"A\" daysSpent=\"-2\"/></project_plan>").is_err());
        assert!(decode("").is_err());
    }

    #[test]
    fn test_cdata_edge_whitespace_survives_round_trip() {
        let text = "<project_plan version=\"1.0\"><node id=\"a\" title=\"A\"><comment><![CDATA[  {x}]]></comment><taskPromptForLlm>keep <![CDATA[<y>  ]]></taskPromptForLlm></node></project_plan>";
        let doc = decode(text).unwrap();
        let a = doc.find("a").unwrap();
        assert_eq!(a.comment.as_deref(), Some("  {x}"));
        assert_eq!(a.task_prompt_for_llm.as_deref(), Some("keep <y>  "));

        let again = decode(&encode(&doc).unwrap()).unwrap();
        assert_eq!(again, doc);
    }

    // Recognised entities are written as is, so a reload expands them once
    #[test]
    fn test_literal_entity_in_prose_collapses_on_reload() {
        let mut node = Node::new("n", "N");
        node.comment = Some("write &amp; in HTML & CSS".to_string());
        let text = encode(&Document::with_nodes([node])).unwrap();
        assert!(text.contains("<comment>write &amp; in HTML &amp; CSS</comment>"));

        let back = decode(&text).unwrap();
        assert_eq!(
            back.find("n").unwrap().comment.as_deref(),
            Some("write & in HTML & CSS")
        );
    }

    #[test]
    fn test_line_endings_are_normalized() {
        let text = "<project_plan><node id=\"a\" title=\"A\"><comment>one\r\ntwo</comment></node></project_plan>";
        let doc = decode(text).unwrap();
        assert_eq!(doc.find("a").unwrap().comment.as_deref(), Some("one\ntwo"));
    }
}
