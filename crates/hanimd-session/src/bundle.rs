//! The session bundle and its string form.
//!
//! A session string is `"HANI-MD~"` followed by the standard base64 (with
//! padding) of a JSON object mapping each file name to the standard base64
//! of that file's bytes. The marker and the nesting order are fixed: strings
//! produced by earlier deployments must keep decoding.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use serde_json::Value;
use tracing::{debug, warn};

use crate::error::{SessionError, SessionResult};

/// Prefix of every session string.
pub const MARKER: &str = "HANI-MD~";

/// A set of session key files, by file name.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionBundle {
    files: BTreeMap<String, Vec<u8>>,
}

impl SessionBundle {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or replace a file. The name is validated as in [`SessionBundle::write_dir`].
    pub fn insert(&mut self, name: impl Into<String>, bytes: impl Into<Vec<u8>>) -> SessionResult<()> {
        let name = name.into();
        validate_name(&name)?;
        self.files.insert(name, bytes.into());
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<&[u8]> {
        self.files.get(name).map(Vec::as_slice)
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    /// File names in lexical order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.files.keys().map(String::as_str)
    }

    /// Total size of all file contents in bytes.
    pub fn total_bytes(&self) -> usize {
        self.files.values().map(Vec::len).sum()
    }

    // ── directory ────────────────────────────────────────────────────

    /// Read every regular file directly inside `dir`.
    ///
    /// Subdirectories, symlinks to directories and entries whose name is not
    /// UTF-8 are skipped. An empty directory gives an empty bundle.
    pub fn read_dir(dir: impl AsRef<Path>) -> SessionResult<Self> {
        let dir = dir.as_ref();
        if !dir.is_dir() {
            if dir.exists() {
                return Err(SessionError::NotADirectory {
                    path: dir.display().to_string(),
                });
            }
            return Err(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                format!("session directory {} does not exist", dir.display()),
            )
            .into());
        }

        let mut bundle = Self::new();
        for entry in fs::read_dir(dir)? {
            let entry = entry?;
            let path = entry.path();
            if !path.is_file() {
                continue;
            }
            let Some(name) = entry.file_name().to_str().map(str::to_string) else {
                warn!(path = %path.display(), "skipping session file with non-UTF-8 name");
                continue;
            };
            bundle.files.insert(name, fs::read(&path)?);
        }
        debug!(dir = %dir.display(), files = bundle.len(), "session directory read");
        Ok(bundle)
    }

    /// Write every file into `dir`, creating it if needed.
    ///
    /// Names are checked before anything is written, so a rejected bundle
    /// leaves the directory untouched. Existing files with other names are
    /// left alone.
    pub fn write_dir(&self, dir: impl AsRef<Path>) -> SessionResult<()> {
        let dir = dir.as_ref();
        for name in self.files.keys() {
            validate_name(name)?;
        }
        if dir.exists() && !dir.is_dir() {
            return Err(SessionError::NotADirectory {
                path: dir.display().to_string(),
            });
        }
        fs::create_dir_all(dir)?;
        for (name, bytes) in &self.files {
            fs::write(dir.join(name), bytes)?;
        }
        debug!(dir = %dir.display(), files = self.len(), "session directory written");
        Ok(())
    }

    // ── string form ──────────────────────────────────────────────────

    /// The portable session string.
    pub fn encode(&self) -> String {
        let inner = Value::Object(self.to_map());
        format!("{MARKER}{}", STANDARD.encode(inner.to_string()))
    }

    /// Parse a session string. Surrounding whitespace is ignored.
    ///
    /// Any malformed stage (marker, outer base64, JSON, a file's base64 or
    /// name) fails the whole decode.
    pub fn decode(input: &str) -> SessionResult<Self> {
        let payload = input
            .trim()
            .strip_prefix(MARKER)
            .ok_or(SessionError::MissingMarker { marker: MARKER })?;
        let json = STANDARD
            .decode(payload.trim())
            .map_err(|source| SessionError::Base64 {
                context: "session payload".into(),
                source,
            })?;
        let entries: BTreeMap<String, String> = serde_json::from_slice(&json)?;
        Self::from_entries(entries)
    }

    // ── JSON form ────────────────────────────────────────────────────

    /// The `{name: base64}` object, as kept in the stored session document.
    pub fn to_value(&self) -> Value {
        Value::Object(self.to_map())
    }

    /// Inverse of [`SessionBundle::to_value`].
    pub fn from_value(value: &Value) -> SessionResult<Self> {
        let entries: BTreeMap<String, String> = serde_json::from_value(value.clone())?;
        Self::from_entries(entries)
    }

    fn to_map(&self) -> serde_json::Map<String, Value> {
        self.files
            .iter()
            .map(|(name, bytes)| (name.clone(), Value::String(STANDARD.encode(bytes))))
            .collect()
    }

    fn from_entries(entries: BTreeMap<String, String>) -> SessionResult<Self> {
        let mut files = BTreeMap::new();
        for (name, encoded) in entries {
            validate_name(&name)?;
            let bytes = STANDARD
                .decode(encoded.as_bytes())
                .map_err(|source| SessionError::Base64 {
                    context: format!("file {name:?}"),
                    source,
                })?;
            files.insert(name, bytes);
        }
        Ok(Self { files })
    }
}

/// Read `dir` and encode it in one step.
pub fn encode_dir(dir: impl AsRef<Path>) -> SessionResult<String> {
    Ok(SessionBundle::read_dir(dir)?.encode())
}

/// A file name must be a single, non-empty path component.
fn validate_name(name: &str) -> SessionResult<()> {
    let bad = name.is_empty()
        || name == "."
        || name == ".."
        || name.contains(['/', '\\', '\0']);
    if bad {
        return Err(SessionError::InvalidFileName {
            name: name.to_string(),
        });
    }
    Ok(())
}

// ── tests ────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> SessionBundle {
        let mut bundle = SessionBundle::new();
        bundle.insert("creds.json", br#"{"me":{"id":"1"}}"#.to_vec()).unwrap();
        bundle.insert("pre-key-1.json", vec![0u8, 255, 10, 13]).unwrap();
        bundle
    }

    #[test]
    fn encode_has_marker_and_decodes_back() {
        let encoded = sample().encode();
        assert!(encoded.starts_with(MARKER));
        assert_eq!(SessionBundle::decode(&encoded).unwrap(), sample());
    }

    #[test]
    fn empty_bundle_is_valid() {
        let encoded = SessionBundle::new().encode();
        assert_eq!(encoded, format!("{MARKER}e30="));
        assert!(SessionBundle::decode(&encoded).unwrap().is_empty());
    }

    #[test]
    fn known_string_decodes() {
        // base64(`{"a.json":"aGk="}`), i.e. a.json containing "hi".
        let bundle = SessionBundle::decode("HANI-MD~eyJhLmpzb24iOiJhR2s9In0=").unwrap();
        assert_eq!(bundle.get("a.json"), Some(&b"hi"[..]));
        assert_eq!(bundle.len(), 1);
    }

    #[test]
    fn surrounding_whitespace_is_ignored() {
        let encoded = format!("  {}\n", sample().encode());
        assert_eq!(SessionBundle::decode(&encoded).unwrap(), sample());
    }

    #[test]
    fn missing_marker_fails() {
        let encoded = sample().encode();
        let stripped = encoded.trim_start_matches(MARKER);
        assert!(matches!(
            SessionBundle::decode(stripped),
            Err(SessionError::MissingMarker { .. })
        ));
        assert!(matches!(
            SessionBundle::decode("hani-md~e30="),
            Err(SessionError::MissingMarker { .. })
        ));
    }

    #[test]
    fn each_decode_stage_fails_closed() {
        assert!(matches!(
            SessionBundle::decode("HANI-MD~not base64!"),
            Err(SessionError::Base64 { .. })
        ));

        let not_json = format!("{MARKER}{}", STANDARD.encode("nope"));
        assert!(matches!(SessionBundle::decode(&not_json), Err(SessionError::Json(_))));

        let not_strings = format!("{MARKER}{}", STANDARD.encode(r#"{"a":1}"#));
        assert!(matches!(SessionBundle::decode(&not_strings), Err(SessionError::Json(_))));

        let bad_entry = format!("{MARKER}{}", STANDARD.encode(r#"{"ok":"aGk=","bad":"***"}"#));
        assert!(matches!(
            SessionBundle::decode(&bad_entry),
            Err(SessionError::Base64 { .. })
        ));
    }

    #[test]
    fn traversal_names_are_rejected() {
        let payload = format!("{MARKER}{}", STANDARD.encode(r#"{"../evil":"aGk="}"#));
        assert!(matches!(
            SessionBundle::decode(&payload),
            Err(SessionError::InvalidFileName { .. })
        ));

        let mut bundle = SessionBundle::new();
        for name in ["", ".", "..", "a/b", "a\\b"] {
            assert!(bundle.insert(name, b"x".to_vec()).is_err(), "{name:?} accepted");
        }
    }

    #[test]
    fn value_form_matches_inner_json() {
        let value = sample().to_value();
        assert_eq!(value["pre-key-1.json"], "AP8KDQ==");
        assert_eq!(SessionBundle::from_value(&value).unwrap(), sample());
        assert!(SessionBundle::from_value(&serde_json::json!(["x"])).is_err());
    }

    #[test]
    fn dir_round_trip_skips_subdirectories() {
        let dir = tempfile::tempdir().unwrap();
        sample().write_dir(dir.path()).unwrap();
        fs::create_dir(dir.path().join("nested")).unwrap();

        let read = SessionBundle::read_dir(dir.path()).unwrap();
        assert_eq!(read, sample());
        assert_eq!(read.names().collect::<Vec<_>>(), vec!["creds.json", "pre-key-1.json"]);
        assert_eq!(read.total_bytes(), sample().total_bytes());
    }

    #[test]
    fn read_dir_on_file_or_missing_path_fails() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("f");
        fs::write(&file, b"x").unwrap();
        assert!(matches!(
            SessionBundle::read_dir(&file),
            Err(SessionError::NotADirectory { .. })
        ));
        assert!(matches!(
            SessionBundle::read_dir(dir.path().join("missing")),
            Err(SessionError::Io(_))
        ));
    }
}
