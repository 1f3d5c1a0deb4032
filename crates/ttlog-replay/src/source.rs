//! Script-source store.
//!
//! Code-parse actions keep the full script text out of the record body: the
//! writer hands the text to a [`SourceStore`] and the reader fetches it back
//! by `(directory, document key, uri)`. Two backends:
//!
//! - [`InMemorySourceStore`]: a map, for tests and in-process round trips.
//! - [`DirSourceStore`]: one file per source under a root directory.

use std::collections::HashMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use ttlog_core::DocumentId;

use crate::error::SourceError;

/// The storage contract for script sources referenced by code-parse actions.
pub trait SourceStore {
    /// Loads the text stored under `(dir, doc, uri)`.
    fn load_source(&self, dir: &str, doc: &str, uri: &str) -> Result<Arc<str>, SourceError>;

    /// Stores `text` under `(dir, doc, uri)`, replacing any previous text.
    fn store_source(&mut self, dir: &str, doc: &str, uri: &str, text: &str)
        -> Result<(), SourceError>;
}

/// The document key a code-parse action stores its text under.
pub fn document_key(doc: DocumentId) -> String {
    format!("{}ld", doc.0)
}

// ---------------------------------------------------------------------------
// In-memory backend
// ---------------------------------------------------------------------------

/// Map-backed [`SourceStore`].
#[derive(Debug, Clone, Default)]
pub struct InMemorySourceStore {
    entries: HashMap<(String, String, String), Arc<str>>,
}

impl InMemorySourceStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl SourceStore for InMemorySourceStore {
    fn load_source(&self, dir: &str, doc: &str, uri: &str) -> Result<Arc<str>, SourceError> {
        self.entries
            .get(&(dir.to_string(), doc.to_string(), uri.to_string()))
            .cloned()
            .ok_or_else(|| SourceError::NotFound {
                dir: dir.to_string(),
                doc: doc.to_string(),
                uri: uri.to_string(),
            })
    }

    fn store_source(
        &mut self,
        dir: &str,
        doc: &str,
        uri: &str,
        text: &str,
    ) -> Result<(), SourceError> {
        self.entries.insert(
            (dir.to_string(), doc.to_string(), uri.to_string()),
            Arc::from(text),
        );
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Directory backend
// ---------------------------------------------------------------------------

/// [`SourceStore`] writing one file per source below `root`.
///
/// The layout is `root/<dir>/<doc>/<uri>`. Each component is
/// percent-encoded, so distinct keys always map to distinct files.
#[derive(Debug, Clone)]
pub struct DirSourceStore {
    root: PathBuf,
}

impl DirSourceStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        DirSourceStore { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path_for(&self, dir: &str, doc: &str, uri: &str) -> PathBuf {
        let mut path = self.root.clone();
        if !dir.is_empty() {
            path.push(encode_component(dir));
        }
        path.push(encode_component(doc));
        path.push(encode_component(uri));
        path
    }
}

/// Reversible file-name encoding of one key component.
///
/// Bytes outside `[A-Za-z0-9._-]` become `%XX`. Components made only of
/// dots have every dot escaped, and the empty component becomes `%`, which
/// no other input encodes to.
fn encode_component(component: &str) -> String {
    if component.is_empty() {
        return "%".to_string();
    }
    let all_dots = component.bytes().all(|b| b == b'.');
    let mut encoded = String::with_capacity(component.len());
    for b in component.bytes() {
        let keep = b.is_ascii_alphanumeric() || matches!(b, b'-' | b'_') || (b == b'.' && !all_dots);
        if keep {
            encoded.push(b as char);
        } else {
            encoded.push_str(&format!("%{b:02X}"));
        }
    }
    encoded
}

impl SourceStore for DirSourceStore {
    fn load_source(&self, dir: &str, doc: &str, uri: &str) -> Result<Arc<str>, SourceError> {
        let path = self.path_for(dir, doc, uri);
        match fs::read_to_string(&path) {
            Ok(text) => Ok(Arc::from(text)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Err(SourceError::NotFound {
                dir: dir.to_string(),
                doc: doc.to_string(),
                uri: uri.to_string(),
            }),
            Err(source) => Err(SourceError::Io { path, source }),
        }
    }

    fn store_source(
        &mut self,
        dir: &str,
        doc: &str,
        uri: &str,
        text: &str,
    ) -> Result<(), SourceError> {
        let path = self.path_for(dir, doc, uri);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|source| SourceError::Io {
                path: parent.to_path_buf(),
                source,
            })?;
        }
        tracing::trace!(path = %path.display(), bytes = text.len(), "storing script source");
        fs::write(&path, text).map_err(|source| SourceError::Io { path, source })
    }
}
