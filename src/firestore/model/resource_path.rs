use std::cmp::Ordering;
use std::fmt::{Display, Formatter};

use crate::firestore::error::{invalid_argument, FirestoreResult};

/// Slash separated path into the document tree, e.g. `cats/tom/kittens`.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash)]
pub struct ResourcePath {
    segments: Vec<String>,
}

impl ResourcePath {
    pub fn root() -> Self {
        Self::default()
    }

    pub fn from_segments<I, S>(segments: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            segments: segments.into_iter().map(Into::into).collect(),
        }
    }

    pub fn from_string(path: &str) -> FirestoreResult<Self> {
        Self::root().join(path)
    }

    /// Appends `path`, which may itself contain `/` separators.
    ///
    /// Leading and trailing slashes are ignored; empty inner segments are rejected.
    pub fn join(&self, path: &str) -> FirestoreResult<Self> {
        let trimmed = path.trim_matches('/');
        if trimmed.is_empty() {
            return Ok(self.clone());
        }
        if trimmed.split('/').any(str::is_empty) {
            return Err(invalid_argument(format!(
                "Invalid path ({path}). Paths must not contain // in them."
            )));
        }
        let mut segments = self.segments.clone();
        segments.extend(trimmed.split('/').map(str::to_string));
        Ok(Self { segments })
    }

    /// Joins every entry of `parts` in order, each of which may contain `/`.
    pub fn join_all<I, S>(&self, parts: I) -> FirestoreResult<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        parts
            .into_iter()
            .try_fold(self.clone(), |path, part| path.join(part.as_ref()))
    }

    pub fn child(&self, segment: impl Into<String>) -> Self {
        let mut segments = self.segments.clone();
        segments.push(segment.into());
        Self { segments }
    }

    pub fn len(&self) -> usize {
        self.segments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    pub fn segments(&self) -> &[String] {
        &self.segments
    }

    pub fn last_segment(&self) -> Option<&str> {
        self.segments.last().map(String::as_str)
    }

    pub fn without_last(&self) -> Self {
        let mut segments = self.segments.clone();
        segments.pop();
        Self { segments }
    }

    pub fn is_prefix_of(&self, other: &Self) -> bool {
        self.len() <= other.len() && self.segments.iter().zip(&other.segments).all(|(l, r)| l == r)
    }

    pub fn canonical_string(&self) -> String {
        self.segments.join("/")
    }

    /// Segment-wise ordering, so `a/b` sorts before `a/b/c` and before `a-b`.
    pub fn comparator(left: &Self, right: &Self) -> Ordering {
        left.segments
            .iter()
            .zip(&right.segments)
            .map(|(l, r)| l.cmp(r))
            .find(|ordering| *ordering != Ordering::Equal)
            .unwrap_or_else(|| left.len().cmp(&right.len()))
    }
}

impl Display for ResourcePath {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.canonical_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn joins_segments_containing_slashes() {
        let path = ResourcePath::root()
            .join_all(["cats/tom", "kittens"])
            .unwrap();
        assert_eq!(path.len(), 3);
        assert_eq!(path.canonical_string(), "cats/tom/kittens");
        assert_eq!(path.last_segment(), Some("kittens"));
    }

    #[test]
    fn rejects_empty_inner_segments() {
        let err = ResourcePath::from_string("cats//tom").unwrap_err();
        assert_eq!(err.code_str(), "firestore/invalid-argument");
    }

    #[test]
    fn orders_by_segment_then_length() {
        let a = ResourcePath::from_string("a/b").unwrap();
        let b = ResourcePath::from_string("a/b/c").unwrap();
        let c = ResourcePath::from_string("a-b").unwrap();
        assert_eq!(ResourcePath::comparator(&a, &b), Ordering::Less);
        assert_eq!(ResourcePath::comparator(&a, &c), Ordering::Less);
    }
}
