//! Workspace context for the model
//!
//! Combines, in priority order:
//! - Workspace header
//! - Editor selection
//! - Active file
//! - Files the user attached to the conversation ([`ContextSet`])
//!
//! The rendered blob never exceeds its character budget; lower-priority
//! sections are truncated first, then dropped.

use crate::workspace::{FileContent, Workspace};

const TRUNCATED_MARKER: &str = "\n[truncated]";

/// Ordered set of workspace files attached to the conversation
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ContextSet {
    files: Vec<String>,
}

impl ContextSet {
    /// Create an empty set
    #[must_use]
    pub const fn new() -> Self {
        Self { files: Vec::new() }
    }

    /// Add a file; returns false if it was already present
    pub fn add(&mut self, path: impl Into<String>) -> bool {
        let path = path.into();
        if self.contains(&path) {
            return false;
        }
        self.files.push(path);
        true
    }

    /// Remove a file; returns false if it was not present
    pub fn remove(&mut self, path: &str) -> bool {
        let before = self.files.len();
        self.files.retain(|f| f != path);
        self.files.len() != before
    }

    /// Check membership
    #[must_use]
    pub fn contains(&self, path: &str) -> bool {
        self.files.iter().any(|f| f == path)
    }

    /// Files in insertion order
    #[must_use]
    pub fn files(&self) -> &[String] {
        &self.files
    }

    /// Number of files
    #[must_use]
    pub fn len(&self) -> usize {
        self.files.len()
    }

    /// Whether the set is empty
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }
}

/// Raw material for a context blob
#[derive(Debug, Clone, Default)]
pub struct ContextSources {
    pub header: String,
    pub selection: Option<String>,
    pub active_file: Option<FileContent>,
    pub files: Vec<FileContent>,
}

/// Accumulates sections against a character budget
struct Budget {
    out: String,
    used: usize,
    max: usize,
}

impl Budget {
    const fn new(max: usize) -> Self {
        Self {
            out: String::new(),
            used: 0,
            max,
        }
    }

    const fn separator_len(&self) -> usize {
        if self.used == 0 { 0 } else { 2 }
    }

    fn remaining(&self) -> usize {
        self.max.saturating_sub(self.used + self.separator_len())
    }

    fn append(&mut self, section: &str) {
        if self.used > 0 {
            self.out.push_str("\n\n");
            self.used += 2;
        }
        self.out.push_str(section);
        self.used += section.chars().count();
    }

    /// Append `heading` + fenced `body`, truncating the body to fit
    ///
    /// Returns false if not even a truncated section fits.
    fn push_section(&mut self, heading: &str, body: &str) -> bool {
        let remaining = self.remaining();
        let full = fenced(heading, body, "");
        if full.chars().count() <= remaining {
            self.append(&full);
            return true;
        }

        let skeleton = fenced(heading, "", TRUNCATED_MARKER).chars().count();
        if skeleton >= remaining {
            return false;
        }

        let kept: String = body.chars().take(remaining - skeleton).collect();
        self.append(&fenced(heading, &kept, TRUNCATED_MARKER));
        true
    }

    fn finish(self) -> String {
        self.out
    }
}

fn fenced(heading: &str, body: &str, suffix: &str) -> String {
    format!("## {heading}\n```\n{body}{suffix}\n```")
}

/// Render the context blob, never longer than `max_chars` characters
#[must_use]
pub fn build_context(sources: &ContextSources, max_chars: usize) -> String {
    let mut budget = Budget::new(max_chars);

    let header = sources.header.trim();
    if !header.is_empty() {
        let header: String = header.chars().take(max_chars).collect();
        budget.append(&header);
    }

    if let Some(selection) = sources.selection.as_deref().filter(|s| !s.trim().is_empty()) {
        budget.push_section("Selection", selection);
    }

    let active_path = sources.active_file.as_ref().map(|f| f.path.as_str());
    if let Some(active) = &sources.active_file {
        budget.push_section(&format!("Active file: {}", active.path), &active.content);
    }

    for file in &sources.files {
        if Some(file.path.as_str()) == active_path {
            continue;
        }
        if !budget.push_section(&format!("File: {}", file.path), &file.content) {
            tracing::debug!(path = %file.path, "context budget exhausted, file omitted");
        }
    }

    budget.finish()
}

/// Gather workspace state and attached files into a context blob
pub async fn gather(workspace: &dyn Workspace, files: &[String], max_chars: usize) -> String {
    let snapshot = workspace.editor_snapshot().await;
    let sources = ContextSources {
        header: workspace.header(),
        selection: snapshot.selection,
        active_file: snapshot.active_file,
        files: workspace.read_files(files).await,
    };

    let blob = build_context(&sources, max_chars);
    tracing::debug!(
        attached = files.len(),
        chars = blob.chars().count(),
        "context gathered"
    );
    blob
}
