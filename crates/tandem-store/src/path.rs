use std::fmt;

/// Slash-separated location in the hierarchical store.
///
/// Paths are cheap to build and carry no validity guarantee of their
/// own; the store validates segments at the operation boundary, so a
/// hostile segment fails the call instead of corrupting the tree.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StorePath(Vec<String>);

/// Characters the store forbids inside a single path segment.
const FORBIDDEN: &[char] = &['/', '.', '#', '$', '[', ']'];

impl StorePath {
    pub fn root() -> Self {
        Self(Vec::new())
    }

    pub fn parse(path: &str) -> Self {
        Self(
            path.split('/')
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect(),
        )
    }

    pub fn child(&self, segment: impl Into<String>) -> Self {
        let mut segments = self.0.clone();
        segments.push(segment.into());
        Self(segments)
    }

    pub fn segments(&self) -> &[String] {
        &self.0
    }

    pub fn is_root(&self) -> bool {
        self.0.is_empty()
    }

    /// Ancestor-or-equal.
    pub fn is_prefix_of(&self, other: &StorePath) -> bool {
        other.0.len() >= self.0.len() && other.0[..self.0.len()] == self.0[..]
    }

    /// True when one path is an ancestor-or-equal of the other; a write
    /// at either location changes the value visible at both.
    pub fn is_related(&self, other: &StorePath) -> bool {
        self.is_prefix_of(other) || other.is_prefix_of(self)
    }

    /// First segment that the store would reject, if any.
    pub fn invalid_segment(&self) -> Option<&str> {
        self.0
            .iter()
            .find(|s| s.is_empty() || s.contains(FORBIDDEN))
            .map(String::as_str)
    }
}

impl fmt::Display for StorePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0.join("/"))
    }
}
