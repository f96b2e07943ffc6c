//! Universal path handling for directory pairs.
//!
//! Both sides of a pair address their entries by *universal* relative
//! paths: `/`-separated, relative to the side's root, identical on every
//! platform. This module provides the `SyncPath` newtype for those paths
//! and the explicit `CaseSensitivity` rule a tree is compared under.

use relative_path::{RelativePath, RelativePathBuf};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::io;
use std::path::Path;

/// Universal relative path within one side of a directory pair.
///
/// Sync paths use `/` as the separator regardless of the host OS and are
/// always relative to the side's root. Leading slashes and backslash
/// separators are normalized away on construction.
///
/// # Examples
///
/// ```
/// use helix_core::fs::path::SyncPath;
///
/// let path = SyncPath::new("/docs/report.txt");
/// assert_eq!(path.file_name(), Some("report.txt"));
/// assert_eq!(path.parent().unwrap().as_str(), "docs");
///
/// // Paths are normalized
/// assert_eq!(path, SyncPath::new("docs/report.txt"));
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SyncPath(RelativePathBuf);

impl SyncPath {
    /// The root path (empty).
    #[inline]
    pub fn root() -> Self {
        SyncPath(RelativePathBuf::new())
    }

    /// Create a new sync path from a string, normalizing separators and
    /// stripping any leading slash.
    pub fn new(path: impl AsRef<str>) -> Self {
        let s = path.as_ref().replace('\\', "/");
        let s = s.trim_start_matches('/').trim_end_matches('/');
        SyncPath(RelativePath::new(s).normalize())
    }

    /// Check if this is the root path.
    #[inline]
    pub fn is_root(&self) -> bool {
        self.0.as_str().is_empty()
    }

    /// Get the string representation of this path.
    #[inline]
    pub fn as_str(&self) -> &str {
        self.0.as_str()
    }

    /// The final component, if any.
    pub fn file_name(&self) -> Option<&str> {
        self.0.file_name()
    }

    /// The parent path. `None` for the root; the root itself for
    /// single-component paths.
    pub fn parent(&self) -> Option<SyncPath> {
        self.0.parent().map(|p| SyncPath(p.to_relative_path_buf()))
    }

    /// Join this path with a further component.
    pub fn join(&self, name: impl AsRef<str>) -> SyncPath {
        if self.is_root() {
            SyncPath::new(name)
        } else {
            SyncPath(self.0.join(name.as_ref()))
        }
    }

    /// Iterate over the path components.
    pub fn components(&self) -> impl Iterator<Item = &str> {
        self.0.iter()
    }

    /// Whether the first component equals `name` (used to exclude
    /// reserved subtrees from enumeration).
    pub fn starts_with_component(&self, name: &str) -> bool {
        self.components().next() == Some(name)
    }

    /// Resolve this path against an absolute root.
    pub fn to_path(&self, root: &Path) -> std::path::PathBuf {
        self.0.to_path(root)
    }
}

impl fmt::Display for SyncPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_root() {
            write!(f, "<root>")
        } else {
            write!(f, "{}", self.0)
        }
    }
}

impl From<&str> for SyncPath {
    fn from(s: &str) -> Self {
        SyncPath::new(s)
    }
}

/// Whether sibling names in a tree are compared case-sensitively.
///
/// The rule reflects the host filesystem of a tree root. It is detected
/// once when a pair is opened and passed explicitly into every consumer;
/// there is no process-wide flag.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaseSensitivity {
    /// Names differing only in case are distinct siblings.
    Sensitive,
    /// Names differing only in case refer to the same sibling.
    Insensitive,
}

impl CaseSensitivity {
    /// Probe the filesystem holding `root` by creating a marker file and
    /// checking whether it is reachable under a differently-cased name.
    pub fn detect(root: &Path) -> io::Result<Self> {
        let probe = tempfile::Builder::new()
            .prefix(".HelixCaseProbe")
            .tempfile_in(root)?;
        let name = probe
            .path()
            .file_name()
            .and_then(|n| n.to_str())
            .map(str::to_lowercase)
            .ok_or_else(|| io::Error::other("case probe produced a non-UTF-8 name"))?;
        // The uppercase prefix guarantees the folded name differs.
        if root.join(name).exists() {
            Ok(CaseSensitivity::Insensitive)
        } else {
            Ok(CaseSensitivity::Sensitive)
        }
    }

    /// Fold a name into its comparison key under this rule.
    pub fn fold(&self, name: &str) -> String {
        match self {
            CaseSensitivity::Sensitive => name.to_string(),
            CaseSensitivity::Insensitive => name.to_lowercase(),
        }
    }

    /// Compare two names under this rule.
    pub fn names_equal(&self, a: &str, b: &str) -> bool {
        match self {
            CaseSensitivity::Sensitive => a == b,
            CaseSensitivity::Insensitive => a.to_lowercase() == b.to_lowercase(),
        }
    }

    /// Compare two whole paths under this rule.
    pub fn paths_equal(&self, a: &SyncPath, b: &SyncPath) -> bool {
        self.names_equal(a.as_str(), b.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalization() {
        assert_eq!(SyncPath::new("/a/b.txt"), SyncPath::new("a/b.txt"));
        assert_eq!(SyncPath::new("a\\b.txt").as_str(), "a/b.txt");
        assert_eq!(SyncPath::new("a/./b.txt").as_str(), "a/b.txt");
        assert_eq!(SyncPath::new("a/b/").as_str(), "a/b");
        assert!(SyncPath::new("").is_root());
        assert!(SyncPath::new("/").is_root());
    }

    #[test]
    fn test_parent_and_file_name() {
        let p = SyncPath::new("a/b/c.txt");
        assert_eq!(p.file_name(), Some("c.txt"));
        assert_eq!(p.parent().unwrap().as_str(), "a/b");

        let top = SyncPath::new("c.txt");
        assert!(top.parent().unwrap().is_root());
        assert!(SyncPath::root().parent().is_none());
    }

    #[test]
    fn test_join_from_root() {
        assert_eq!(SyncPath::root().join("x").as_str(), "x");
        assert_eq!(SyncPath::new("a").join("x").as_str(), "a/x");
    }

    #[test]
    fn test_starts_with_component() {
        assert!(SyncPath::new(".helix/sync.log").starts_with_component(".helix"));
        assert!(!SyncPath::new(".helixy/x").starts_with_component(".helix"));
    }

    #[test]
    fn test_case_folding() {
        let ci = CaseSensitivity::Insensitive;
        let cs = CaseSensitivity::Sensitive;
        assert!(ci.names_equal("Foo.txt", "foo.TXT"));
        assert!(!cs.names_equal("Foo.txt", "foo.TXT"));
        assert_eq!(ci.fold("Foo"), "foo");
        assert_eq!(cs.fold("Foo"), "Foo");
    }

    #[test]
    fn test_detect_reports_something_sane() {
        let dir = tempfile::tempdir().unwrap();
        // Either answer is valid depending on the host; it must not error.
        CaseSensitivity::detect(dir.path()).unwrap();
    }
}
