use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Error returned when a string is not a valid object key.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid resource path {path:?}: {reason}")]
pub struct ResourcePathError {
    pub path: String,
    pub reason: &'static str,
}

/// Key of an object inside the backend's namespace, e.g. `images/nature.jpg`.
///
/// Keys are `/`-separated and always relative. Rejects:
/// - Empty keys and empty segments (`a//b`, trailing `/`)
/// - A leading `/`
/// - `.` and `..` segments
/// - Backslashes and NUL bytes
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ResourcePath(String);

impl ResourcePath {
    pub fn new(path: impl Into<String>) -> Result<Self, ResourcePathError> {
        let path = path.into();
        validate(&path)?;
        Ok(Self(path))
    }

    /// Appends a relative key below this one.
    ///
    /// `child` may itself contain `/` separators; every segment is validated.
    pub fn child(&self, child: &str) -> Result<Self, ResourcePathError> {
        validate(child)?;
        Ok(Self(format!("{}/{}", self.0, child)))
    }

    /// Returns the enclosing key, or `None` for a single-segment key.
    pub fn parent(&self) -> Option<Self> {
        self.0
            .rsplit_once('/')
            .map(|(parent, _)| Self(parent.to_string()))
    }

    /// Returns the last segment.
    pub fn name(&self) -> &str {
        self.0.rsplit('/').next().unwrap_or(&self.0)
    }

    pub fn segments(&self) -> impl Iterator<Item = &str> {
        self.0.split('/')
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

fn validate(path: &str) -> Result<(), ResourcePathError> {
    let fail = |reason| {
        Err(ResourcePathError {
            path: path.to_string(),
            reason,
        })
    };

    if path.is_empty() {
        return fail("empty path");
    }
    if path.starts_with('/') {
        return fail("absolute path not allowed");
    }
    if path.contains('\\') {
        return fail("backslash not allowed");
    }
    if path.contains('\0') {
        return fail("NUL byte not allowed");
    }

    for segment in path.split('/') {
        match segment {
            "" => return fail("empty segment"),
            "." | ".." => return fail("relative segment not allowed"),
            _ => {}
        }
    }

    Ok(())
}

impl fmt::Display for ResourcePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for ResourcePath {
    type Err = ResourcePathError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl TryFrom<String> for ResourcePath {
    type Error = ResourcePathError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<ResourcePath> for String {
    fn from(value: ResourcePath) -> Self {
        value.0
    }
}

impl AsRef<str> for ResourcePath {
    fn as_ref(&self) -> &str {
        &self.0
    }
}
