//! Hierarchical file paths.

use crate::error::{TypesError, TypesResult};
use std::fmt;

/// A path within a user's file tree.
///
/// A `FilePath` is an ordered sequence of segments compared structurally,
/// so `/docs/a.txt` parsed twice yields equal values. The empty sequence is
/// the root. Paths know their ancestry: [`FilePath::starts_with`] works on
/// segments, not characters, so `/foobar` does not start with `/foo`.
///
/// The string form uses `/` as separator with a leading `/`. Empty segments
/// are ignored when parsing (`//docs/` is `/docs`).
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
#[derive(serde::Serialize, serde::Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct FilePath {
    segments: Vec<String>,
}

impl FilePath {
    /// The root path.
    #[must_use]
    pub const fn root() -> Self {
        Self {
            segments: Vec::new(),
        }
    }

    /// Parses a `/`-separated path.
    ///
    /// # Errors
    ///
    /// Returns [`TypesError::InvalidPath`] if a segment is `.`, `..` or
    /// contains a NUL character.
    pub fn parse(path: &str) -> TypesResult<Self> {
        let mut segments = Vec::new();
        for segment in path.split('/') {
            if segment.is_empty() {
                continue;
            }
            if !is_valid_segment(segment) {
                return Err(TypesError::InvalidPath {
                    path: path.to_string(),
                });
            }
            segments.push(segment.to_string());
        }
        Ok(Self { segments })
    }

    /// Builds a path from already split segments.
    ///
    /// # Errors
    ///
    /// Returns [`TypesError::InvalidPath`] if any segment is empty or invalid.
    pub fn from_segments<I, S>(segments: I) -> TypesResult<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let segments: Vec<String> = segments.into_iter().map(Into::into).collect();
        if segments.iter().any(|s| s.is_empty() || !is_valid_segment(s)) {
            return Err(TypesError::InvalidPath {
                path: segments.join("/"),
            });
        }
        Ok(Self { segments })
    }

    /// Returns true for the root path.
    #[must_use]
    pub fn is_root(&self) -> bool {
        self.segments.is_empty()
    }

    /// The path segments, outermost first.
    #[must_use]
    pub fn segments(&self) -> &[String] {
        &self.segments
    }

    /// Number of segments.
    #[must_use]
    pub fn depth(&self) -> usize {
        self.segments.len()
    }

    /// The last segment, or `None` for the root.
    #[must_use]
    pub fn name(&self) -> Option<&str> {
        self.segments.last().map(String::as_str)
    }

    /// The parent path, or `None` for the root.
    #[must_use]
    pub fn parent(&self) -> Option<FilePath> {
        if self.segments.is_empty() {
            return None;
        }
        Some(Self {
            segments: self.segments[..self.segments.len() - 1].to_vec(),
        })
    }

    /// The ancestor made of the first `depth` segments.
    ///
    /// Returns the whole path if `depth` is not smaller than its depth.
    #[must_use]
    pub fn prefix(&self, depth: usize) -> FilePath {
        Self {
            segments: self.segments[..depth.min(self.segments.len())].to_vec(),
        }
    }

    /// Appends one segment.
    ///
    /// # Errors
    ///
    /// Returns [`TypesError::InvalidPath`] if the segment is empty, contains
    /// a `/`, or is otherwise invalid.
    pub fn join(&self, segment: &str) -> TypesResult<FilePath> {
        if segment.is_empty() || segment.contains('/') || !is_valid_segment(segment) {
            return Err(TypesError::InvalidPath {
                path: format!("{self}/{segment}"),
            });
        }
        let mut segments = self.segments.clone();
        segments.push(segment.to_string());
        Ok(Self { segments })
    }

    /// Returns true if `ancestor` is this path or one of its ancestors.
    #[must_use]
    pub fn starts_with(&self, ancestor: &FilePath) -> bool {
        self.segments.starts_with(&ancestor.segments)
    }

    /// Returns true if this path is strictly below `ancestor`.
    #[must_use]
    pub fn is_descendant_of(&self, ancestor: &FilePath) -> bool {
        self.segments.len() > ancestor.segments.len() && self.starts_with(ancestor)
    }

    /// Replaces the `from` prefix with `to`.
    ///
    /// Returns `None` if this path is not `from` or below it.
    #[must_use]
    pub fn rebase(&self, from: &FilePath, to: &FilePath) -> Option<FilePath> {
        if !self.starts_with(from) {
            return None;
        }
        let mut segments = to.segments.clone();
        segments.extend_from_slice(&self.segments[from.segments.len()..]);
        Some(Self { segments })
    }
}

fn is_valid_segment(segment: &str) -> bool {
    segment != "." && segment != ".." && !segment.contains('\0')
}

impl fmt::Display for FilePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.segments.is_empty() {
            return f.write_str("/");
        }
        for segment in &self.segments {
            write!(f, "/{segment}")?;
        }
        Ok(())
    }
}

impl fmt::Debug for FilePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "FilePath({self})")
    }
}

impl TryFrom<String> for FilePath {
    type Error = TypesError;

    fn try_from(value: String) -> TypesResult<Self> {
        Self::parse(&value)
    }
}

impl TryFrom<&str> for FilePath {
    type Error = TypesError;

    fn try_from(value: &str) -> TypesResult<Self> {
        Self::parse(value)
    }
}

impl From<FilePath> for String {
    fn from(path: FilePath) -> Self {
        path.to_string()
    }
}
