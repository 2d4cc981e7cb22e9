// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Project workspaces on disk.
//!
//! [`WorkspaceStore`] maps `(owner, project name)` to a directory under the
//! storage root. [`Workspace`] performs file operations inside one project
//! directory. Every caller-supplied relative path goes through
//! [`Workspace::resolve`], which rejects anything that would land outside the
//! workspace (`..` segments, absolute prefixes, symlinks pointing out).

use std::fs;
use std::path::{Component, Path, PathBuf};

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::{Error, Result};

/// Directories never shown in the file tree.
pub const EXCLUDED_DIRS: &[&str] = &["node_modules", "build", "dist"];

/// Files never shown in the file tree.
pub const EXCLUDED_FILES: &[&str] = &["yarn.lock", "package-lock.json", "pnpm-lock.yaml"];

/// Binary assets never shown in the file tree, by lowercase extension.
pub const EXCLUDED_EXTENSIONS: &[&str] = &[
    "png", "jpg", "jpeg", "gif", "ico", "bmp", "webp", "svg", "woff", "woff2", "ttf", "eot",
];

/// Dependency manifest file name.
pub const MANIFEST_FILE: &str = "package.json";

/// Longest accepted project name or owner id.
const MAX_SEGMENT_LEN: usize = 128;

/// Validate a value used as a single directory name.
pub fn validate_segment(field: &str, value: &str) -> Result<()> {
    if value.is_empty() {
        return Err(Error::InvalidInput(format!("{field} is required")));
    }
    if value.len() > MAX_SEGMENT_LEN {
        return Err(Error::InvalidInput(format!(
            "{field} must be at most {MAX_SEGMENT_LEN} characters"
        )));
    }
    if value.starts_with('.')
        || value.contains(['/', '\\'])
        || value.chars().any(char::is_control)
    {
        return Err(Error::InvalidInput(format!(
            "{field} '{value}' is not a valid directory name"
        )));
    }
    Ok(())
}

/// Root of all project workspaces.
#[derive(Debug, Clone)]
pub struct WorkspaceStore {
    root: PathBuf,
}

impl WorkspaceStore {
    /// Create a store rooted at `root`. Relative roots are made absolute.
    pub fn new(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        let root = if root.is_absolute() {
            root
        } else {
            std::env::current_dir()?.join(root)
        };
        Ok(Self { root })
    }

    /// Storage root.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Directory for a project: `<root>/<owner_id>/<name>`.
    pub fn project_path(&self, owner_id: &str, name: &str) -> Result<PathBuf> {
        validate_segment("ownerId", owner_id)?;
        validate_segment("name", name)?;
        Ok(self.root.join(owner_id).join(name))
    }

    /// Create the owner's directory, returning its path.
    pub async fn prepare_owner_dir(&self, owner_id: &str) -> Result<PathBuf> {
        validate_segment("ownerId", owner_id)?;
        let dir = self.root.join(owner_id);
        tokio::fs::create_dir_all(&dir).await?;
        Ok(dir)
    }
}

/// Node in a project file tree.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum FileNode {
    /// Regular file with its text content.
    File {
        /// Path relative to the workspace root.
        id: String,
        /// Base name.
        name: String,
        /// UTF-8 content (lossy).
        content: String,
    },
    /// Directory.
    Folder {
        /// Path relative to the workspace root.
        id: String,
        /// Base name.
        name: String,
        /// Children keyed by entry name, in traversal order.
        children: FileTree,
    },
}

impl FileNode {
    /// Path relative to the workspace root.
    pub fn id(&self) -> &str {
        match self {
            FileNode::File { id, .. } | FileNode::Folder { id, .. } => id,
        }
    }
}

/// Ordered mapping of relative path to node.
pub type FileTree = IndexMap<String, FileNode>;

/// Entry kind for rename operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryKind {
    /// Regular file.
    File,
    /// Directory.
    Folder,
}

impl EntryKind {
    fn label(self) -> &'static str {
        match self {
            EntryKind::File => "file",
            EntryKind::Folder => "folder",
        }
    }
}

/// Result of a content write.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum WriteOutcome {
    /// File did not exist before.
    Created,
    /// Existing file was replaced.
    Overwritten,
}

/// File operations confined to one project directory.
#[derive(Debug, Clone)]
pub struct Workspace {
    root: PathBuf,
}

impl Workspace {
    /// Open the workspace at `root`.
    pub fn open(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Workspace root.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Resolve a caller-supplied relative path to an absolute one inside the workspace.
    ///
    /// A single leading `/` is accepted and ignored. The workspace root itself
    /// is not a valid target.
    pub fn resolve(&self, relative: &str) -> Result<PathBuf> {
        let trimmed = relative.trim_start_matches('/');
        let escapes = || Error::InvalidInput(format!("Path '{relative}' is outside the project"));

        let mut path = self.root.clone();
        let mut depth = 0usize;
        for component in Path::new(trimmed).components() {
            match component {
                Component::Normal(part) => {
                    path.push(part);
                    depth += 1;
                }
                Component::CurDir => {}
                Component::ParentDir | Component::RootDir | Component::Prefix(_) => {
                    return Err(escapes());
                }
            }
        }
        if depth == 0 {
            return Err(Error::InvalidInput("path is required".to_string()));
        }

        // Symlinks inside the workspace must not lead out of it.
        let canonical_root = self.root.canonicalize()?;
        let mut existing = path.as_path();
        while fs::symlink_metadata(existing).is_err() {
            existing = existing.parent().ok_or_else(escapes)?;
        }
        let canonical = match existing.canonicalize() {
            Ok(canonical) => canonical,
            // Dangling symlink: judge by its parent.
            Err(_) => existing
                .parent()
                .ok_or_else(escapes)?
                .canonicalize()?,
        };
        if !canonical.starts_with(&canonical_root) {
            return Err(escapes());
        }

        Ok(path)
    }

    /// Build the file tree, skipping dependency/build output, lockfiles, images
    /// and hidden entries.
    pub async fn file_tree(&self) -> Result<FileTree> {
        let root = self.root.clone();
        tokio::task::spawn_blocking(move || {
            if !root.is_dir() {
                return Err(Error::Io(std::io::Error::new(
                    std::io::ErrorKind::NotFound,
                    format!("workspace {} does not exist", root.display()),
                )));
            }
            collect_tree(&root, &root)
        })
        .await
        .map_err(|e| Error::Internal(format!("file tree task failed: {e}")))?
    }

    /// Write `content` to a file, creating parent directories as needed.
    pub async fn write_file(&self, relative: &str, content: &str) -> Result<WriteOutcome> {
        let path = self.resolve(relative)?;
        let outcome = match tokio::fs::metadata(&path).await {
            Ok(meta) if meta.is_dir() => {
                return Err(Error::InvalidInput(format!("'{relative}' is a folder")));
            }
            Ok(_) => WriteOutcome::Overwritten,
            Err(_) => WriteOutcome::Created,
        };

        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&path, content).await?;

        debug!(path = %path.display(), outcome = ?outcome, "Wrote file");
        Ok(outcome)
    }

    /// Rename or move a file or folder within the workspace.
    pub async fn rename(&self, from: &str, to: &str, kind: EntryKind) -> Result<()> {
        let source = self.resolve(from)?;
        let destination = self.resolve(to)?;

        let meta = tokio::fs::symlink_metadata(&source)
            .await
            .map_err(|_| Error::PathNotFound(from.to_string()))?;
        let matches_kind = match kind {
            EntryKind::File => !meta.is_dir(),
            EntryKind::Folder => meta.is_dir(),
        };
        if !matches_kind {
            return Err(Error::InvalidInput(format!(
                "'{from}' is not a {}",
                kind.label()
            )));
        }

        if source == destination {
            return Ok(());
        }
        if kind == EntryKind::Folder && destination.starts_with(&source) {
            return Err(Error::InvalidInput(format!(
                "Cannot move '{from}' into itself"
            )));
        }
        if tokio::fs::symlink_metadata(&destination).await.is_ok() {
            return Err(Error::Conflict(format!("'{to}' already exists")));
        }

        if let Some(parent) = destination.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::rename(&source, &destination).await?;

        info!(
            from = %source.display(),
            to = %destination.display(),
            kind = kind.label(),
            "Renamed entry"
        );
        Ok(())
    }

    /// Delete a file or folder (recursively).
    pub async fn delete(&self, relative: &str) -> Result<()> {
        let path = self.resolve(relative)?;
        let meta = tokio::fs::symlink_metadata(&path)
            .await
            .map_err(|_| Error::PathNotFound(relative.to_string()))?;

        if meta.is_dir() {
            tokio::fs::remove_dir_all(&path).await?;
        } else {
            tokio::fs::remove_file(&path).await?;
        }

        info!(path = %path.display(), "Deleted entry");
        Ok(())
    }

    /// Declared dependencies from the manifest, in manifest order.
    pub async fn read_dependencies(&self) -> Result<IndexMap<String, String>> {
        let path = self.root.join(MANIFEST_FILE);
        let raw = tokio::fs::read_to_string(&path)
            .await
            .map_err(|e| Error::Manifest(format!("cannot read {MANIFEST_FILE}: {e}")))?;
        parse_dependencies(&raw)
    }
}

#[derive(Deserialize)]
struct Manifest {
    #[serde(default)]
    dependencies: Option<IndexMap<String, serde_json::Value>>,
}

/// Extract the `dependencies` object from manifest JSON.
fn parse_dependencies(raw: &str) -> Result<IndexMap<String, String>> {
    let manifest: Manifest = serde_json::from_str(raw)
        .map_err(|e| Error::Manifest(format!("cannot parse {MANIFEST_FILE}: {e}")))?;

    Ok(manifest
        .dependencies
        .unwrap_or_default()
        .into_iter()
        .map(|(name, version)| match version {
            serde_json::Value::String(s) => (name, s),
            other => (name, other.to_string()),
        })
        .collect())
}

fn is_excluded(name: &str, is_dir: bool) -> bool {
    if name.starts_with('.') {
        return true;
    }
    if is_dir {
        return EXCLUDED_DIRS.contains(&name);
    }
    if EXCLUDED_FILES.contains(&name) {
        return true;
    }
    Path::new(name)
        .extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| EXCLUDED_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()))
}

fn collect_tree(root: &Path, dir: &Path) -> Result<FileTree> {
    let mut entries = fs::read_dir(dir)?.collect::<std::io::Result<Vec<_>>>()?;
    entries.sort_by_key(|entry| entry.file_name());

    let mut tree = FileTree::new();
    for entry in entries {
        let file_type = entry.file_type()?;
        if file_type.is_symlink() {
            continue;
        }
        let name = entry.file_name().to_string_lossy().into_owned();
        if is_excluded(&name, file_type.is_dir()) {
            continue;
        }

        let path = entry.path();
        let id = path
            .strip_prefix(root)
            .unwrap_or(&path)
            .components()
            .map(|c| c.as_os_str().to_string_lossy())
            .collect::<Vec<_>>()
            .join("/");

        let node = if file_type.is_dir() {
            FileNode::Folder {
                id,
                name: name.clone(),
                children: collect_tree(root, &path)?,
            }
        } else {
            let bytes = fs::read(&path)?;
            FileNode::File {
                id,
                name: name.clone(),
                content: String::from_utf8_lossy(&bytes).into_owned(),
            }
        };
        tree.insert(name, node);
    }
    Ok(tree)
}
