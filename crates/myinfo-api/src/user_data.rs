//! The user data document: one JSON object on disk, mutated only by merge.
//!
//! No locking. Two concurrent merges race on read-modify-write and the last
//! writer wins.

use std::fs;
use std::io::{ErrorKind, Write};
#[cfg(unix)]
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

use myinfo_core::{merge_documents, parse_document, Document, DocumentError, MergeStatus};
use serde::Serialize;
use serde_json::ser::PrettyFormatter;

/// Mode for files this crate publishes: owner write, world read.
#[cfg(unix)]
const PUBLISHED_FILE_MODE: u32 = 0o644;

#[derive(Debug, thiserror::Error)]
pub enum UserDataError {
    #[error("malformed input: {0}")]
    MalformedInput(#[source] DocumentError),
    #[error("user data file {path} is corrupt: {source}")]
    Corrupt {
        path: PathBuf,
        #[source]
        source: DocumentError,
    },
    #[error("user data directory does not exist: {0}")]
    PathNotFound(PathBuf),
    #[error("failed to {action} {path}: {source}")]
    Io {
        action: &'static str,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to encode user data: {0}")]
    Encode(#[from] serde_json::Error),
}

#[derive(Debug, Clone)]
pub struct UserDataStore {
    path: PathBuf,
}

impl UserDataStore {
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read the document, distinguishing a corrupt file from an absent one.
    ///
    /// A missing or blank file is an empty document.
    ///
    /// # Errors
    /// Returns [`UserDataError::Corrupt`] for bytes that are not UTF-8 JSON
    /// with an object at the top level, and [`UserDataError::Io`] when the
    /// file exists but cannot be read.
    pub fn load(&self) -> Result<Document, UserDataError> {
        let bytes = match fs::read(&self.path) {
            Ok(bytes) => bytes,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(Document::new()),
            Err(source) => {
                return Err(UserDataError::Io { action: "read", path: self.path.clone(), source })
            }
        };
        let corrupt = |source: DocumentError| UserDataError::Corrupt { path: self.path.clone(), source };
        let raw = std::str::from_utf8(&bytes).map_err(|err| corrupt(err.into()))?;
        if raw.trim().is_empty() {
            return Ok(Document::new());
        }
        parse_document(raw).map_err(corrupt)
    }

    /// Read the document, treating any failure as an empty document.
    #[must_use]
    pub fn read(&self) -> Document {
        match self.load() {
            Ok(document) => document,
            Err(err) => {
                tracing::warn!(path = %self.path.display(), error = %err, "starting from an empty user data document");
                Document::new()
            }
        }
    }

    /// Merge a JSON object given as text into the stored document.
    ///
    /// # Errors
    /// Returns [`UserDataError::MalformedInput`] when `partial_json` is not a
    /// JSON object; otherwise see [`UserDataStore::merge_document`].
    pub fn merge(&self, partial_json: &str) -> Result<MergeStatus, UserDataError> {
        let partial = parse_document(partial_json).map_err(UserDataError::MalformedInput)?;
        self.merge_document(partial)
    }

    /// Right-biased merge of `partial` into the stored document.
    ///
    /// Nothing is written when the merged document equals the stored one.
    ///
    /// # Errors
    /// Returns [`UserDataError::PathNotFound`] when the document's directory is
    /// missing and [`UserDataError::Io`] when the write fails.
    pub fn merge_document(&self, partial: Document) -> Result<MergeStatus, UserDataError> {
        let current = self.read();
        let outcome = merge_documents(&current, partial);
        if !outcome.changed() {
            tracing::debug!(path = %self.path.display(), "user data unchanged, skipping write");
            return Ok(MergeStatus::Unchanged);
        }

        self.write(&outcome.document)?;
        tracing::info!(path = %self.path.display(), entries = outcome.document.len(), "user data updated");
        Ok(MergeStatus::Success)
    }

    fn write(&self, document: &Document) -> Result<(), UserDataError> {
        let parent = match self.path.parent() {
            Some(parent) if parent.as_os_str().is_empty() => Path::new("."),
            Some(parent) => parent,
            None => return Err(UserDataError::PathNotFound(self.path.clone())),
        };
        if !parent.is_dir() {
            return Err(UserDataError::PathNotFound(parent.to_path_buf()));
        }

        let body = to_pretty_json(document)?;
        write_atomically(&self.path, body.as_bytes())
    }
}

/// Pretty JSON with a four-space indent.
///
/// # Errors
/// Returns an error when serialization fails or yields bytes that are not UTF-8.
pub fn to_pretty_json<T: Serialize>(value: &T) -> Result<String, serde_json::Error> {
    let mut out = Vec::new();
    let mut serializer =
        serde_json::Serializer::with_formatter(&mut out, PrettyFormatter::with_indent(b"    "));
    value.serialize(&mut serializer)?;
    String::from_utf8(out).map_err(serde::ser::Error::custom)
}

/// Write `bytes` to a sibling temp file and rename it over `path`.
///
/// On Unix the result is world-readable; the temp file alone would be 0600.
pub(crate) fn write_atomically(path: &Path, bytes: &[u8]) -> Result<(), UserDataError> {
    let parent = path.parent().filter(|parent| !parent.as_os_str().is_empty()).unwrap_or(Path::new("."));
    let io_err = |action: &'static str| {
        let path = path.to_path_buf();
        move |source: std::io::Error| UserDataError::Io { action, path, source }
    };

    let mut temp = tempfile::NamedTempFile::new_in(parent).map_err(io_err("create temp file for"))?;
    temp.write_all(bytes).map_err(io_err("write"))?;
    temp.flush().map_err(io_err("flush"))?;
    #[cfg(unix)]
    {
        temp.as_file()
            .set_permissions(fs::Permissions::from_mode(PUBLISHED_FILE_MODE))
            .map_err(io_err("set permissions on"))?;
    }
    temp.persist(path).map_err(|err| UserDataError::Io {
        action: "replace",
        path: path.to_path_buf(),
        source: err.error,
    })?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use serde_json::{json, Value};

    use super::*;

    fn store_in(dir: &Path) -> UserDataStore {
        UserDataStore::new(dir.join("userData.json"))
    }

    #[test]
    fn missing_and_blank_files_read_as_empty() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let store = store_in(dir.path());
        assert!(store.load()?.is_empty());

        fs::write(store.path(), "")?;
        assert!(store.load()?.is_empty());
        assert!(store.read().is_empty());
        Ok(())
    }

    #[test]
    fn invalid_json_is_corrupt_for_load_and_empty_for_read() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let store = store_in(dir.path());
        fs::write(store.path(), "{\"Name\": ")?;

        assert!(matches!(store.load(), Err(UserDataError::Corrupt { .. })));
        assert!(store.read().is_empty());

        fs::write(store.path(), "[1, 2, 3]")?;
        assert!(matches!(store.load(), Err(UserDataError::Corrupt { .. })));
        assert!(store.read().is_empty());
        Ok(())
    }

    #[test]
    fn non_utf8_file_is_corrupt_not_io() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let store = store_in(dir.path());
        fs::write(store.path(), [0xff, 0xfe, b'{', b'}'])?;

        let Err(UserDataError::Corrupt { source, .. }) = store.load() else {
            anyhow::bail!("non UTF-8 user data was not reported as corrupt");
        };
        assert!(matches!(source, DocumentError::NotUtf8(_)));
        assert!(store.read().is_empty());
        Ok(())
    }

    #[test]
    fn pretty_json_keeps_non_ascii_text() -> anyhow::Result<()> {
        let rendered = to_pretty_json(&json!({"City": "Zürich", "Name": "李"}))?;
        assert_eq!(rendered, "{\n    \"City\": \"Zürich\",\n    \"Name\": \"李\"\n}");
        Ok(())
    }

    #[cfg(unix)]
    #[test]
    fn written_files_are_world_readable() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let target = dir.path().join("myInfo.html");
        write_atomically(&target, b"<html></html>")?;
        assert_eq!(fs::metadata(&target)?.permissions().mode() & 0o777, PUBLISHED_FILE_MODE);

        let store = store_in(dir.path());
        store.merge(r#"{"Name":"Alice"}"#)?;
        assert_eq!(fs::metadata(store.path())?.permissions().mode() & 0o777, PUBLISHED_FILE_MODE);
        Ok(())
    }

    #[test]
    fn merge_writes_then_reports_unchanged() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let store = store_in(dir.path());

        let first = store.merge(r#"{"Name":"Alice","Age":"30"}"#)?;
        assert_eq!(first, MergeStatus::Success);
        assert_eq!(Value::Object(store.load()?), json!({"Name": "Alice", "Age": "30"}));

        let modified_before = fs::metadata(store.path())?.modified()?;
        let second = store.merge(r#"{"Name":"Alice","Age":"30"}"#)?;
        assert_eq!(second, MergeStatus::Unchanged);
        assert_eq!(fs::metadata(store.path())?.modified()?, modified_before);
        Ok(())
    }

    #[test]
    fn merge_is_right_biased() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let store = store_in(dir.path());
        store.merge(r#"{"a":1}"#)?;
        store.merge(r#"{"a":2}"#)?;
        assert_eq!(Value::Object(store.load()?), json!({"a": 2}));
        Ok(())
    }

    #[test]
    fn merged_file_is_pretty_printed_with_four_spaces() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let store = store_in(dir.path());
        store.merge(r#"{"Name":"Alice"}"#)?;
        let raw = fs::read_to_string(store.path())?;
        assert_eq!(raw, "{\n    \"Name\": \"Alice\"\n}");
        Ok(())
    }

    #[test]
    fn malformed_input_leaves_document_untouched() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let store = store_in(dir.path());
        store.merge(r#"{"Name":"Alice"}"#)?;

        assert!(matches!(store.merge("not json"), Err(UserDataError::MalformedInput(_))));
        assert!(matches!(store.merge(r#"["Name"]"#), Err(UserDataError::MalformedInput(_))));
        assert_eq!(Value::Object(store.load()?), json!({"Name": "Alice"}));
        Ok(())
    }

    #[test]
    fn merge_over_corrupt_file_starts_fresh() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let store = store_in(dir.path());
        fs::write(store.path(), "garbage")?;

        assert_eq!(store.merge(r#"{"City":"Paris"}"#)?, MergeStatus::Success);
        assert_eq!(Value::Object(store.load()?), json!({"City": "Paris"}));
        Ok(())
    }

    #[test]
    fn missing_directory_is_path_not_found() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let store = UserDataStore::new(dir.path().join("absent").join("userData.json"));
        assert!(matches!(store.merge(r#"{"a":1}"#), Err(UserDataError::PathNotFound(_))));
        Ok(())
    }

    #[test]
    fn merge_then_read_contains_every_partial_key() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let store = store_in(dir.path());
        store.merge(r#"{"Email":"a@example.com","Phone":"555"}"#)?;
        store.merge(r#"{"Phone":"556","Country":"FR"}"#)?;

        let document = store.read();
        assert_eq!(document.get("Email"), Some(&json!("a@example.com")));
        assert_eq!(document.get("Phone"), Some(&json!("556")));
        assert_eq!(document.get("Country"), Some(&json!("FR")));
        Ok(())
    }
}
