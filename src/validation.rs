//! Structural and security validation for plan documents
//!
//! This module certifies a document (one file, or a merged tree) before it is
//! trusted for rendering or saving. Structural problems (missing or duplicate
//! ids, missing titles, imports without `src`) are errors; format, style and
//! security findings are warnings.

use crate::error::{Rule, Severity, ValidationIssue};
use crate::plan::{Document, Entry, ImportDirective, Node};
use chrono::NaiveDate;
use regex::Regex;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

/// Default limit for `taskPromptForLlm`, in characters
pub const DEFAULT_MAX_PROMPT_CHARS: usize = 2000;

/// Languages accepted in `<code language="...">`
pub const SUPPORTED_LANGUAGES: &[&str] = &[
    "bash", "c", "cpp", "csharp", "css", "go", "html", "java", "javascript", "json", "kotlin",
    "markdown", "php", "plaintext", "powershell", "python", "ruby", "rust", "scss", "shell", "sh",
    "sql", "swift", "text", "toml", "typescript", "xml", "yaml",
];

/// Tunables for a validation run
#[derive(Debug, Clone)]
pub struct ValidationOptions {
    pub max_prompt_chars: usize,
}

impl Default for ValidationOptions {
    fn default() -> Self {
        Self {
            max_prompt_chars: DEFAULT_MAX_PROMPT_CHARS,
        }
    }
}

/// Result of validating one or more documents
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ValidationReport {
    pub errors: Vec<ValidationIssue>,
    pub warnings: Vec<ValidationIssue>,
    pub files_processed: usize,
    pub node_count: usize,
    /// `true` when `errors` is empty
    pub valid: bool,
}

impl ValidationReport {
    fn push(&mut self, issue: ValidationIssue) {
        match issue.severity {
            Severity::Error => self.errors.push(issue),
            Severity::Warning => self.warnings.push(issue),
        }
        self.valid = self.errors.is_empty();
    }

    /// Fold another report into this one
    pub fn merge(&mut self, other: ValidationReport) {
        self.errors.extend(other.errors);
        self.warnings.extend(other.warnings);
        self.files_processed += other.files_processed;
        self.node_count += other.node_count;
        self.valid = self.errors.is_empty();
    }

    /// Findings of both severities, errors first
    pub fn issues(&self) -> impl Iterator<Item = &ValidationIssue> {
        self.errors.iter().chain(self.warnings.iter())
    }
}

fn sensitive_patterns() -> &'static [(&'static str, Regex)] {
    static PATTERNS: OnceLock<Vec<(&'static str, Regex)>> = OnceLock::new();
    PATTERNS.get_or_init(|| {
        [
            (
                "credential assignment",
                r"(?i)\b(password|passwd|pwd|secret|client[_-]?secret|api[_-]?key|access[_-]?key|auth[_-]?token|access[_-]?token|token)\b\s*[:=]\s*\S+",
            ),
            ("private key block", r"-----BEGIN [A-Z ]*PRIVATE KEY-----"),
            ("AWS access key id", r"\bAKIA[0-9A-Z]{16}\b"),
            ("bearer token", r"(?i)\bbearer\s+[A-Za-z0-9\-._~+/]{20,}=*"),
        ]
        .into_iter()
        .map(|(name, pattern)| (name, Regex::new(pattern).expect("valid sensitive-data regex")))
        .collect()
    })
}

fn destructive_patterns() -> &'static [(&'static str, Regex)] {
    static PATTERNS: OnceLock<Vec<(&'static str, Regex)>> = OnceLock::new();
    PATTERNS.get_or_init(|| {
        [
            ("rm with --no-preserve-root", r"\brm\b.*--no-preserve-root"),
            ("filesystem format", r"\bmkfs(?:\.\w+)?\b"),
            ("raw write to a block device", r"\bdd\b.*\bof=/dev/(?:sd|hd|nvme|disk|mmcblk)"),
            ("redirect into a block device", r">\s*/dev/(?:sd|hd|nvme|disk)[a-z0-9]*"),
            ("fork bomb", r":\(\)\s*\{\s*:\s*\|\s*:\s*&\s*\}\s*;\s*:"),
            ("world-writable root", r"\bchmod\s+(?:-\S+\s+)*-R\s+(?:-\S+\s+)*0?777\s+/(?:\s|$)"),
        ]
        .into_iter()
        .map(|(name, pattern)| (name, Regex::new(pattern).expect("valid deny-list regex")))
        .collect()
    })
}

/// Name of the first sensitive-data pattern found in `text`
pub fn find_sensitive_data(text: &str) -> Option<&'static str> {
    sensitive_patterns()
        .iter()
        .find(|(_, re)| re.is_match(text))
        .map(|(name, _)| *name)
}

fn rm_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"\brm\s+((?:-{1,2}[A-Za-z-]+\s+)+)(?:/|/\*|~/?|\*|\$HOME/?)(?:\s|;|&|\||$)")
            .expect("valid rm regex")
    })
}

/// `rm` with both recursive and force flags aimed at `/`, `~` or `*`
fn is_recursive_force_delete(command: &str) -> bool {
    rm_pattern().captures_iter(command).any(|caps| {
        let (mut recursive, mut force) = (false, false);
        for flag in caps[1].split_whitespace() {
            if let Some(long) = flag.strip_prefix("--") {
                recursive |= long == "recursive";
                force |= long == "force";
            } else {
                recursive |= flag.contains(['r', 'R']);
                force |= flag.contains('f');
            }
        }
        recursive && force
    })
}

/// Name of the first destructive-command pattern matched by `command`
pub fn find_destructive_command(command: &str) -> Option<&'static str> {
    if is_recursive_force_delete(command) {
        return Some("recursive force delete of a root or home directory");
    }
    destructive_patterns()
        .iter()
        .find(|(_, re)| re.is_match(command))
        .map(|(name, _)| *name)
}

/// Parse a plan date (YYYY-MM-DD)
pub fn parse_plan_date(date_str: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(date_str, "%Y-%m-%d").ok()
}

struct Checker<'a> {
    file: Option<PathBuf>,
    options: &'a ValidationOptions,
    report: ValidationReport,
}

impl Checker<'_> {
    fn issue(&mut self, severity: Severity, rule: Rule, node_id: Option<&str>, message: String) {
        let issue = ValidationIssue {
            severity,
            rule,
            file: self.file.clone(),
            node_id: node_id.filter(|id| !id.is_empty()).map(str::to_string),
            message,
        };
        self.report.push(issue);
    }

    fn entries(&mut self, entries: &[Entry]) {
        for entry in entries {
            match entry {
                Entry::Node(node) => {
                    self.node(node);
                    self.entries(&node.children);
                }
                Entry::Import(directive) => self.import(directive),
            }
        }
    }

    fn node(&mut self, node: &Node) {
        self.report.node_count += 1;
        let id = node.id.as_str();

        if id.trim().is_empty() {
            self.issue(
                Severity::Error,
                Rule::MissingId,
                None,
                format!("node '{}' has no id", node.title),
            );
        }
        if node.title.trim().is_empty() {
            self.issue(
                Severity::Error,
                Rule::MissingTitle,
                Some(id),
                "node has no title".to_string(),
            );
        }
        if !node.priority.is_known() {
            self.issue(
                Severity::Warning,
                Rule::UnknownPriority,
                Some(id),
                format!(
                    "priority '{}' is not one of high, medium, low",
                    node.priority
                ),
            );
        }
        if !node.status.is_known() {
            self.issue(
                Severity::Warning,
                Rule::UnknownStatus,
                Some(id),
                format!(
                    "status '{}' is not one of pending, in-progress, completed",
                    node.status
                ),
            );
        }

        self.dates(node);

        if let Some(code) = &node.code {
            if code.language.trim().is_empty() {
                self.issue(
                    Severity::Warning,
                    Rule::CodeLanguage,
                    Some(id),
                    "code block has no language".to_string(),
                );
            } else if !SUPPORTED_LANGUAGES.contains(&code.language.to_lowercase().as_str()) {
                self.issue(
                    Severity::Warning,
                    Rule::CodeLanguage,
                    Some(id),
                    format!("code language '{}' is not supported", code.language),
                );
            }
        }

        if let Some(prompt) = &node.task_prompt_for_llm {
            let len = prompt.chars().count();
            if len > self.options.max_prompt_chars {
                self.issue(
                    Severity::Warning,
                    Rule::PromptTooLong,
                    Some(id),
                    format!(
                        "taskPromptForLlm is {} characters long (limit {})",
                        len, self.options.max_prompt_chars
                    ),
                );
            }
        }

        let fields = [
            ("title", Some(node.title.as_str())),
            ("comment", node.comment.as_deref()),
            ("code", node.code.as_ref().map(|c| c.content.as_str())),
            ("taskPromptForLlm", node.task_prompt_for_llm.as_deref()),
            ("cliCommand", node.cli_command.as_deref()),
        ];
        for (field, text) in fields {
            if let Some(text) = text
                && let Some(pattern) = find_sensitive_data(text)
            {
                self.issue(
                    Severity::Warning,
                    Rule::SensitiveData,
                    Some(id),
                    format!("{} may contain sensitive data ({})", field, pattern),
                );
            }
        }

        if let Some(command) = &node.cli_command
            && let Some(pattern) = find_destructive_command(command)
        {
            self.issue(
                Severity::Warning,
                Rule::DestructiveCommand,
                Some(id),
                format!("cliCommand looks destructive ({})", pattern),
            );
        }
    }

    fn dates(&mut self, node: &Node) {
        let id = node.id.as_str();
        let mut parsed = [None, None];
        for (slot, (name, value)) in [("startDate", &node.start_date), ("endDate", &node.end_date)]
            .into_iter()
            .enumerate()
        {
            let Some(value) = value else { continue };
            match parse_plan_date(value) {
                Some(date) => parsed[slot] = Some(date),
                None => self.issue(
                    Severity::Warning,
                    Rule::InvalidDate,
                    Some(id),
                    format!("{} '{}' is not a YYYY-MM-DD date", name, value),
                ),
            }
        }
        if let [Some(start), Some(end)] = parsed
            && end < start
        {
            self.issue(
                Severity::Warning,
                Rule::DateOrder,
                Some(id),
                format!("endDate {} is before startDate {}", end, start),
            );
        }
    }

    fn import(&mut self, directive: &ImportDirective) {
        let src = directive.src.trim();
        if src.is_empty() {
            self.issue(
                Severity::Error,
                Rule::MissingImportSrc,
                None,
                "import directive has no src".to_string(),
            );
            return;
        }
        if Path::new(src).is_absolute() || src.starts_with('/') || src.starts_with('\\') {
            self.issue(
                Severity::Warning,
                Rule::ImportPath,
                None,
                format!("import src '{}' is an absolute path", src),
            );
        }
        let lower = src.to_lowercase();
        if !lower.ends_with(".xml") && !lower.ends_with(".json") {
            self.issue(
                Severity::Warning,
                Rule::ImportPath,
                None,
                format!("import src '{}' does not end with .xml or .json", src),
            );
        }
    }

    fn duplicate_ids(&mut self, document: &Document) {
        for (id, count) in duplicate_ids(document) {
            self.issue(
                Severity::Error,
                Rule::DuplicateId,
                Some(&id),
                format!("id '{}' is used by {} nodes", id, count),
            );
        }
    }
}

/// Ids used by more than one node, in first-seen order, with their counts
pub fn duplicate_ids(document: &Document) -> Vec<(String, usize)> {
    let mut counts: HashMap<&str, usize> = HashMap::new();
    let mut order = Vec::new();
    document.visit(|node, _| {
        if node.id.trim().is_empty() {
            return;
        }
        let count = counts.entry(node.id.as_str()).or_insert(0);
        if *count == 0 {
            order.push(node.id.as_str());
        }
        *count += 1;
    });
    order
        .into_iter()
        .filter_map(|id| {
            let count = counts[id];
            (count > 1).then(|| (id.to_string(), count))
        })
        .collect()
}

/// Validate a document with default options
pub fn validate(document: &Document) -> ValidationReport {
    validate_with(document, None, &ValidationOptions::default())
}

/// Validate a document
///
/// # Arguments
/// * `document` - A single file or a merged tree
/// * `file` - File the document came from; attached to every finding
/// * `options` - Validation tunables
///
/// # Returns
/// The accumulated report with `files_processed = 1`
pub fn validate_with(
    document: &Document,
    file: Option<&Path>,
    options: &ValidationOptions,
) -> ValidationReport {
    let mut checker = Checker {
        file: file.map(Path::to_path_buf),
        options,
        report: ValidationReport {
            files_processed: 1,
            valid: true,
            ..Default::default()
        },
    };
    checker.entries(&document.entries);
    checker.duplicate_ids(document);
    checker.report
}
