//! Node paths.

use std::fmt;

use crate::error::{Error, Result};

/// Full path of a node: the names from the root down, in order.
///
/// Displayed `/`-joined without a leading slash; the root displays as `/`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodePath {
    segments: Vec<String>,
}

/// Check a single child name.
pub fn validate_name(name: &str) -> Result<()> {
    if name.is_empty() || name == "." || name.contains('/') {
        return Err(Error::InvalidPath(name.to_string()));
    }
    Ok(())
}

impl NodePath {
    /// The root group.
    pub fn root() -> Self {
        Self::default()
    }

    /// Parse `a/b/c`. Leading and trailing slashes are ignored; `""` and
    /// `"/"` are the root. Empty inner segments are rejected.
    pub fn parse(s: &str) -> Result<Self> {
        let trimmed = s.trim_matches('/');
        if trimmed.is_empty() {
            return Ok(Self::root());
        }
        let mut segments = Vec::new();
        for seg in trimmed.split('/') {
            validate_name(seg).map_err(|_| Error::InvalidPath(s.to_string()))?;
            segments.push(seg.to_string());
        }
        Ok(Self { segments })
    }

    /// Rebuild from a format-level key. Keys come from validated paths, so
    /// no checking is done here.
    pub(crate) fn from_key(key: &str) -> Self {
        Self {
            segments: key
                .split('/')
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect(),
        }
    }

    /// Path of the child `name` under this path.
    pub fn join(&self, name: &str) -> Result<Self> {
        validate_name(name)?;
        let mut segments = self.segments.clone();
        segments.push(name.to_string());
        Ok(Self { segments })
    }

    pub fn is_root(&self) -> bool {
        self.segments.is_empty()
    }

    /// Last segment, `None` for the root.
    pub fn name(&self) -> Option<&str> {
        self.segments.last().map(String::as_str)
    }

    /// Parent path, `None` for the root.
    pub fn parent(&self) -> Option<Self> {
        if self.is_root() {
            return None;
        }
        Some(Self {
            segments: self.segments[..self.segments.len() - 1].to_vec(),
        })
    }

    pub fn segments(&self) -> &[String] {
        &self.segments
    }

    pub fn depth(&self) -> usize {
        self.segments.len()
    }

    /// Key used by the format writer: `/`-joined, root is `""`.
    pub(crate) fn key(&self) -> String {
        self.segments.join("/")
    }
}

impl fmt::Display for NodePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_root() {
            f.write_str("/")
        } else {
            f.write_str(&self.segments.join("/"))
        }
    }
}

impl std::str::FromStr for NodePath {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_and_display() {
        assert_eq!(NodePath::parse("").unwrap(), NodePath::root());
        assert_eq!(NodePath::parse("/").unwrap().to_string(), "/");
        let p = NodePath::parse("/g/d/").unwrap();
        assert_eq!(p.to_string(), "g/d");
        assert_eq!(p.segments(), &["g".to_string(), "d".to_string()]);
        assert_eq!(p.name(), Some("d"));
        assert_eq!(p.parent().unwrap().to_string(), "g");
        assert_eq!(p.depth(), 2);
    }

    #[test]
    fn invalid_paths() {
        assert!(NodePath::parse("a//b").is_err());
        assert!(NodePath::parse("a/./b").is_err());
        assert!(NodePath::root().join("").is_err());
        assert!(NodePath::root().join("x/y").is_err());
    }

    #[test]
    fn join_and_key() {
        let p = NodePath::root().join("g").unwrap().join("d").unwrap();
        assert_eq!(p.key(), "g/d");
        assert_eq!(NodePath::root().key(), "");
        assert_eq!(NodePath::from_key("g/d"), p);
        assert!(NodePath::root().parent().is_none());
        assert!(NodePath::root().name().is_none());
    }
}
