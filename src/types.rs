//! Type-safe wrappers around git primitives and record addressing.

use std::fmt;
use std::path::PathBuf;

use git2::Oid;
use thiserror::Error;

/// This makes sure we don't accidentally pass a tree ID where a commit ID
/// is expected. The inner Oid is only accessible within the crate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CommitId(pub(crate) Oid);

impl CommitId {
    pub(crate) fn new(oid: Oid) -> Self {
        Self(oid)
    }

    pub(crate) fn raw(&self) -> Oid {
        self.0
    }

    /// parse a CommitId from a hex string
    pub fn from_hex(hex: &str) -> Result<Self, git2::Error> {
        Oid::from_str(hex).map(CommitId)
    }

    /// short form of the commit ID
    pub fn short(&self) -> String {
        self.0.to_string()[..7].to_string()
    }
}

impl fmt::Display for CommitId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Git tree identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TreeId(pub(crate) Oid);

impl TreeId {
    pub(crate) fn new(oid: Oid) -> Self {
        Self(oid)
    }

    pub(crate) fn raw(&self) -> Oid {
        self.0
    }
}

impl fmt::Display for TreeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A validated collection name.
///
/// Collection names become top-level directories in the repository, so
/// they are restricted to prevent path traversal and to stay compatible
/// with filesystem constraints.
///
/// Valid names:
/// - 1-64 characters
/// - Alphanumeric, underscores, hyphens only
/// - Must start with a letter or underscore
/// - Cannot collide with repository-level files (the sync marker)
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CollectionName(String);

impl CollectionName {
    /// names reserved for files the store keeps at the repository root
    const RESERVED: &'static [&'static str] = &["dbcommit"];

    /// create a new CollectionName, validating the input
    pub fn new(name: impl Into<String>) -> Result<Self, InvalidNameError> {
        let name = name.into();
        Self::validate(&name)?;
        Ok(Self(name))
    }

    fn validate(name: &str) -> Result<(), InvalidNameError> {
        if name.is_empty() {
            return Err(InvalidNameError::Empty);
        }

        if name.len() > 64 {
            return Err(InvalidNameError::TooLong(name.len()));
        }

        let first_char = name.chars().next().unwrap();
        if !first_char.is_ascii_alphabetic() && first_char != '_' {
            return Err(InvalidNameError::InvalidStart(first_char));
        }

        for (i, c) in name.chars().enumerate() {
            if !c.is_ascii_alphanumeric() && c != '_' && c != '-' {
                return Err(InvalidNameError::InvalidCharacter { char: c, position: i });
            }
        }

        if Self::RESERVED.contains(&name.to_lowercase().as_str()) {
            return Err(InvalidNameError::Reserved(name.to_string()));
        }

        Ok(())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CollectionName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl AsRef<str> for CollectionName {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// A record key: the primary-key values of a record joined with commas.
///
/// Keys become filenames (`<key>.txt`), so path separators and control
/// characters are rejected. Commas, dots and most punctuation are fine
/// since composite keys and encoded timestamps need them.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RecordKey(String);

impl RecordKey {
    pub fn new(key: impl Into<String>) -> Result<Self, InvalidNameError> {
        let key = key.into();
        Self::validate(&key)?;
        Ok(Self(key))
    }

    fn validate(key: &str) -> Result<(), InvalidNameError> {
        if key.is_empty() {
            return Err(InvalidNameError::Empty);
        }

        if key.len() > 128 {
            return Err(InvalidNameError::TooLong(key.len()));
        }

        if key == "." || key == ".." {
            return Err(InvalidNameError::Reserved(key.to_string()));
        }

        for (i, c) in key.chars().enumerate() {
            if c == '/' || c == '\\' || c.is_control() {
                return Err(InvalidNameError::InvalidCharacter { char: c, position: i });
            }
        }

        Ok(())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RecordKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl AsRef<str> for RecordKey {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// A repository-relative path split into ordered segments.
///
/// Record files live at `<collection>/<key>.txt`, but the tree algebra
/// works on arbitrary depth. Empty paths and empty segments are invalid.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TreePath(Vec<String>);

impl TreePath {
    /// parse a slash-separated path into segments
    pub fn parse(path: &str) -> Result<Self, InvalidNameError> {
        if path.is_empty() {
            return Err(InvalidNameError::Empty);
        }

        let mut segments = Vec::new();
        for segment in path.split('/') {
            if segment.is_empty() || segment == "." || segment == ".." {
                return Err(InvalidNameError::InvalidPath(path.to_string()));
            }
            segments.push(segment.to_string());
        }

        Ok(Self(segments))
    }

    /// the canonical path of a record file: `<collection>/<key>.txt`
    pub fn for_record(collection: &CollectionName, key: &RecordKey) -> Self {
        Self(vec![
            collection.as_str().to_string(),
            format!("{}.txt", key),
        ])
    }

    pub fn segments(&self) -> &[String] {
        &self.0
    }

    /// convert to a relative PathBuf for filesystem operations
    pub fn to_rel_path(&self) -> PathBuf {
        self.0.iter().collect()
    }
}

impl fmt::Display for TreePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.join("/"))
    }
}

/// commit signature (author/committer identity)
#[derive(Debug, Clone)]
pub struct CommitSignature {
    pub name: String,
    pub email: String,
}

impl CommitSignature {
    pub fn new(name: impl Into<String>, email: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            email: email.into(),
        }
    }

    /// fallback identity when the repository has no user configured
    pub fn gitrows() -> Self {
        Self::new("gitrows", "gitrows@localhost")
    }

    pub(crate) fn to_git2_signature(&self) -> Result<git2::Signature<'static>, git2::Error> {
        git2::Signature::now(&self.name, &self.email)
    }
}

impl Default for CommitSignature {
    fn default() -> Self {
        Self::gitrows()
    }
}

/// error type for invalid names (collections, keys, paths)
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum InvalidNameError {
    #[error("name cannot be empty")]
    Empty,
    #[error("name too long: {0} characters")]
    TooLong(usize),
    #[error("name cannot start with '{0}'")]
    InvalidStart(char),
    #[error("invalid character '{char}' at position {position}")]
    InvalidCharacter { char: char, position: usize },
    #[error("'{0}' is a reserved name")]
    Reserved(String),
    #[error("invalid path: '{0}'")]
    InvalidPath(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_collection_name_valid() {
        assert!(CollectionName::new("test").is_ok());
        assert!(CollectionName::new("user_accounts").is_ok());
        assert!(CollectionName::new("Invoices2024").is_ok());
        assert!(CollectionName::new("_private").is_ok());
    }

    #[test]
    fn test_collection_name_invalid() {
        assert!(CollectionName::new("").is_err());
        assert!(CollectionName::new("123users").is_err()); // starts with digit
        assert!(CollectionName::new("users/admin").is_err()); // contains slash
        assert!(CollectionName::new("dbcommit").is_err()); // reserved (marker file)
        assert!(CollectionName::new("a".repeat(65)).is_err());
    }

    #[test]
    fn test_record_key_allows_composite_keys() {
        assert!(RecordKey::new("1").is_ok());
        assert!(RecordKey::new("1,2020-01-01_10-00-00").is_ok());
        assert!(RecordKey::new("alice,42").is_ok());
    }

    #[test]
    fn test_record_key_rejects_path_tricks() {
        assert!(RecordKey::new("").is_err());
        assert!(RecordKey::new("a/b").is_err());
        assert!(RecordKey::new("..").is_err());
        assert!(RecordKey::new("a\nb").is_err());
    }

    #[test]
    fn test_tree_path_parse() {
        let path = TreePath::parse("test/1.txt").unwrap();
        assert_eq!(path.segments(), &["test".to_string(), "1.txt".to_string()]);
        assert_eq!(path.to_string(), "test/1.txt");

        assert!(TreePath::parse("").is_err());
        assert!(TreePath::parse("a//b").is_err());
        assert!(TreePath::parse("a/../b").is_err());
    }

    #[test]
    fn test_tree_path_for_record() {
        let collection = CollectionName::new("test").unwrap();
        let key = RecordKey::new("1,7").unwrap();
        let path = TreePath::for_record(&collection, &key);
        assert_eq!(path.to_string(), "test/1,7.txt");
    }
}
