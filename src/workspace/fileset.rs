//! Generated project files keyed by project-relative path.

use std::collections::BTreeMap;
use std::path::{Component, Path, PathBuf};

use crate::errors::MaterializeError;

/// Contents of one generated file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FileContent {
    Text(String),
    Binary(Vec<u8>),
}

impl FileContent {
    pub fn as_bytes(&self) -> &[u8] {
        match self {
            Self::Text(text) => text.as_bytes(),
            Self::Binary(bytes) => bytes,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(text) => Some(text),
            Self::Binary(bytes) => std::str::from_utf8(bytes).ok(),
        }
    }
}

impl From<String> for FileContent {
    fn from(text: String) -> Self {
        Self::Text(text)
    }
}

impl From<&str> for FileContent {
    fn from(text: &str) -> Self {
        Self::Text(text.to_string())
    }
}

impl From<Vec<u8>> for FileContent {
    fn from(bytes: Vec<u8>) -> Self {
        Self::Binary(bytes)
    }
}

/// Every file of one generated application. Iteration order is by path.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FileSet {
    files: BTreeMap<String, FileContent>,
}

impl FileSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a file, replacing any previous content at `path`.
    pub fn insert(&mut self, path: impl Into<String>, content: impl Into<FileContent>) {
        self.files.insert(path.into(), content.into());
    }

    pub fn get(&self, path: &str) -> Option<&FileContent> {
        self.files.get(path)
    }

    pub fn contains(&self, path: &str) -> bool {
        self.files.contains_key(path)
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    pub fn paths(&self) -> impl Iterator<Item = &str> {
        self.files.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &FileContent)> {
        self.files.iter().map(|(path, content)| (path.as_str(), content))
    }

    /// Resolve every path against `root`, failing on the first unsafe one.
    /// Nothing is touched on disk.
    pub fn resolve_under(&self, root: &Path) -> Result<Vec<(PathBuf, &FileContent)>, MaterializeError> {
        self.files
            .iter()
            .map(|(path, content)| validate_relative_path(path).map(|rel| (root.join(rel), content)))
            .collect()
    }
}

impl<P: Into<String>, C: Into<FileContent>> FromIterator<(P, C)> for FileSet {
    fn from_iter<I: IntoIterator<Item = (P, C)>>(iter: I) -> Self {
        let mut set = FileSet::new();
        for (path, content) in iter {
            set.insert(path, content);
        }
        set
    }
}

/// Normalise a project-relative path, refusing anything that could escape
/// the project root: absolute paths, drive prefixes, and `..` segments.
/// `.` segments are dropped.
pub fn validate_relative_path(path: &str) -> Result<PathBuf, MaterializeError> {
    let unsafe_path = || MaterializeError::UnsafePath {
        path: path.to_string(),
    };

    let mut normalized = PathBuf::new();
    for component in Path::new(path).components() {
        match component {
            Component::Normal(part) => normalized.push(part),
            Component::CurDir => {}
            Component::ParentDir | Component::RootDir | Component::Prefix(_) => {
                return Err(unsafe_path());
            }
        }
    }
    if normalized.as_os_str().is_empty() {
        return Err(unsafe_path());
    }
    Ok(normalized)
}
