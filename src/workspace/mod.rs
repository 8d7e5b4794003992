//! Workspace provider
//!
//! Read-only view of the editor's workspace: a header describing it, the
//! active file and selection reported by the host, file contents, and a
//! name search used for context-file suggestions.

use std::path::{Component, Path, PathBuf};
use std::sync::RwLock;

use async_trait::async_trait;
use walkdir::{DirEntry, WalkDir};

use crate::{Error, Result};

/// Directories never descended into by [`FsWorkspace::find_files`]
const SKIPPED_DIRS: &[&str] = &["target", "node_modules", "dist", "build", "__pycache__"];

/// A workspace file and its text
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileContent {
    /// Path relative to the workspace root
    pub path: String,
    /// File text
    pub content: String,
}

/// What the editor is showing right now
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EditorSnapshot {
    /// The focused file, if any and readable
    pub active_file: Option<FileContent>,
    /// Selected text in the focused file
    pub selection: Option<String>,
}

/// Source of workspace context
#[async_trait]
pub trait Workspace: Send + Sync {
    /// One-line description of the workspace
    fn header(&self) -> String;

    /// Active file and selection
    async fn editor_snapshot(&self) -> EditorSnapshot;

    /// Read the given files; unreadable files are skipped
    async fn read_files(&self, paths: &[String]) -> Vec<FileContent>;

    /// Files whose relative path contains every whitespace-separated term of `query`
    ///
    /// # Errors
    ///
    /// Returns error if the workspace cannot be walked
    async fn find_files(&self, query: &str, max_results: usize) -> Result<Vec<String>>;
}

#[derive(Debug, Default)]
struct EditorState {
    active_file: Option<String>,
    selection: Option<String>,
}

/// Workspace backed by a directory on disk
pub struct FsWorkspace {
    root: PathBuf,
    editor: RwLock<EditorState>,
}

impl FsWorkspace {
    /// Create a workspace rooted at `root`
    #[must_use]
    pub fn new(root: PathBuf) -> Self {
        Self {
            root,
            editor: RwLock::new(EditorState::default()),
        }
    }

    /// Workspace root
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Record the editor's focus as reported by the host
    pub fn set_editor_state(&self, active_file: Option<String>, selection: Option<String>) {
        let mut editor = self
            .editor
            .write()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        editor.active_file = active_file.filter(|p| !p.is_empty());
        editor.selection = selection.filter(|s| !s.trim().is_empty());
        tracing::debug!(active_file = ?editor.active_file, "editor state updated");
    }

    /// Resolve a workspace path, refusing anything outside the root
    ///
    /// # Errors
    ///
    /// Returns error if the path escapes the workspace root
    pub fn resolve(&self, path: &str) -> Result<PathBuf> {
        let candidate = Path::new(path);
        let relative = if candidate.is_absolute() {
            candidate
                .strip_prefix(&self.root)
                .map_err(|_| Error::Workspace(format!("{path} is outside the workspace")))?
        } else {
            candidate
        };

        let escapes = relative
            .components()
            .any(|c| !matches!(c, Component::Normal(_) | Component::CurDir));
        if escapes || relative.as_os_str().is_empty() {
            return Err(Error::Workspace(format!("invalid workspace path: {path}")));
        }

        Ok(self.root.join(relative))
    }

    /// Path relative to the root, with `/` separators
    fn relative_display(&self, path: &Path) -> Option<String> {
        let relative = path.strip_prefix(&self.root).ok()?;
        let parts: Vec<_> = relative
            .components()
            .map(|c| c.as_os_str().to_string_lossy())
            .collect();
        Some(parts.join("/"))
    }

    async fn read_one(&self, path: &str) -> Option<FileContent> {
        let resolved = match self.resolve(path) {
            Ok(resolved) => resolved,
            Err(e) => {
                tracing::warn!(path, error = %e, "skipping context file");
                return None;
            }
        };

        match tokio::fs::read_to_string(&resolved).await {
            Ok(content) => Some(FileContent {
                path: self
                    .relative_display(&resolved)
                    .unwrap_or_else(|| path.to_string()),
                content,
            }),
            Err(e) => {
                tracing::warn!(path, error = %e, "skipping unreadable context file");
                None
            }
        }
    }
}

#[async_trait]
impl Workspace for FsWorkspace {
    fn header(&self) -> String {
        let name = self
            .root
            .file_name()
            .map_or_else(|| self.root.display().to_string(), |n| n.to_string_lossy().into_owned());
        format!("Workspace: {name} ({})", self.root.display())
    }

    async fn editor_snapshot(&self) -> EditorSnapshot {
        let (active, selection) = {
            let editor = self
                .editor
                .read()
                .unwrap_or_else(std::sync::PoisonError::into_inner);
            (editor.active_file.clone(), editor.selection.clone())
        };

        let active_file = match active {
            Some(path) => self.read_one(&path).await,
            None => None,
        };

        EditorSnapshot {
            active_file,
            selection,
        }
    }

    async fn read_files(&self, paths: &[String]) -> Vec<FileContent> {
        let mut files = Vec::with_capacity(paths.len());
        for path in paths {
            if let Some(file) = self.read_one(path).await {
                files.push(file);
            }
        }
        files
    }

    async fn find_files(&self, query: &str, max_results: usize) -> Result<Vec<String>> {
        let terms: Vec<String> = query
            .split_whitespace()
            .map(str::to_lowercase)
            .collect();
        if terms.is_empty() || max_results == 0 {
            return Ok(Vec::new());
        }

        let root = self.root.clone();
        let matches = tokio::task::spawn_blocking(move || search(&root, &terms, max_results))
            .await
            .map_err(|e| Error::Workspace(format!("file search failed: {e}")))?;

        tracing::debug!(query, results = matches.len(), "file search");
        Ok(matches)
    }
}

fn is_skipped(entry: &DirEntry) -> bool {
    if entry.depth() == 0 {
        return false;
    }
    let name = entry.file_name().to_string_lossy();
    name.starts_with('.') || (entry.file_type().is_dir() && SKIPPED_DIRS.contains(&name.as_ref()))
}

fn search(root: &Path, terms: &[String], max_results: usize) -> Vec<String> {
    WalkDir::new(root)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|e| !is_skipped(e))
        .filter_map(std::result::Result::ok)
        .filter(|e| e.file_type().is_file())
        .filter_map(|e| {
            let relative = e.path().strip_prefix(root).ok()?;
            let parts: Vec<_> = relative
                .components()
                .map(|c| c.as_os_str().to_string_lossy())
                .collect();
            Some(parts.join("/"))
        })
        .filter(|path| {
            let lower = path.to_lowercase();
            terms.iter().all(|term| lower.contains(term.as_str()))
        })
        .take(max_results)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn workspace() -> (tempfile::TempDir, FsWorkspace) {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        std::fs::create_dir_all(root.join("src/coordinator")).unwrap();
        std::fs::create_dir_all(root.join("target/debug")).unwrap();
        std::fs::create_dir_all(root.join(".git")).unwrap();
        std::fs::write(root.join("src/main.rs"), "fn main() {}\n").unwrap();
        std::fs::write(root.join("src/coordinator/state.rs"), "pub enum State {}\n").unwrap();
        std::fs::write(root.join("target/debug/main.rs"), "generated").unwrap();
        std::fs::write(root.join(".git/config"), "[core]").unwrap();
        std::fs::write(root.join("README.md"), "# demo").unwrap();

        let ws = FsWorkspace::new(root.to_path_buf());
        (dir, ws)
    }

    #[tokio::test]
    async fn find_matches_all_terms_case_insensitively() {
        let (_dir, ws) = workspace();
        let found = ws.find_files("COORD state", 10).await.unwrap();
        assert_eq!(found, vec!["src/coordinator/state.rs".to_string()]);
    }

    #[tokio::test]
    async fn find_skips_hidden_and_build_dirs() {
        let (_dir, ws) = workspace();
        let found = ws.find_files("main", 10).await.unwrap();
        assert_eq!(found, vec!["src/main.rs".to_string()]);

        assert!(ws.find_files("config", 10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn find_respects_limit_and_empty_query() {
        let (_dir, ws) = workspace();
        assert_eq!(ws.find_files("s", 1).await.unwrap().len(), 1);
        assert!(ws.find_files("   ", 10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn read_files_skips_missing_and_escaping_paths() {
        let (_dir, ws) = workspace();
        let files = ws
            .read_files(&[
                "src/main.rs".to_string(),
                "missing.rs".to_string(),
                "../etc/passwd".to_string(),
            ])
            .await;

        assert_eq!(files.len(), 1);
        assert_eq!(files[0].path, "src/main.rs");
        assert_eq!(files[0].content, "fn main() {}\n");
    }

    #[tokio::test]
    async fn absolute_paths_inside_root_are_accepted() {
        let (dir, ws) = workspace();
        let absolute = dir.path().join("README.md").display().to_string();
        let files = ws.read_files(&[absolute]).await;
        assert_eq!(files[0].path, "README.md");
    }

    #[tokio::test]
    async fn snapshot_reads_active_file_and_selection() {
        let (_dir, ws) = workspace();
        ws.set_editor_state(Some("src/main.rs".to_string()), Some("fn main".to_string()));

        let snapshot = ws.editor_snapshot().await;
        assert_eq!(snapshot.active_file.unwrap().path, "src/main.rs");
        assert_eq!(snapshot.selection.as_deref(), Some("fn main"));

        ws.set_editor_state(None, Some("  ".to_string()));
        assert_eq!(ws.editor_snapshot().await, EditorSnapshot::default());
    }

    #[test]
    fn header_names_the_workspace() {
        let ws = FsWorkspace::new(PathBuf::from("/home/dev/voxdemo"));
        assert!(ws.header().starts_with("Workspace: voxdemo"));
    }
}
