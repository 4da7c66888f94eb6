use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde_json::Value;

use crate::session::SessionId;
use crate::store::{self, StoreError};

pub const FIELD_PACKAGE: &str = "package";
pub const FIELD_BRANCH: &str = "branch";
pub const FIELD_PATH: &str = "path";
pub const FIELD_URL: &str = "url";

/// Flat field map remembered for one session.
pub type ContextFields = BTreeMap<String, String>;

/// On-disk shape: `{ session_id: { field: value } }`. Values are kept as raw
/// JSON so entries written by other tools survive a rewrite.
type ContextFile = BTreeMap<String, BTreeMap<String, Value>>;

/// Per-session context persisted in a single JSON file.
#[derive(Debug, Clone)]
pub struct ContextStore {
    path: PathBuf,
}

impl ContextStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Merge `field: value` into the session's entry and rewrite the file.
    pub fn save(&self, session: &SessionId, field: &str, value: &str) -> Result<PathBuf, StoreError> {
        store::update_json(&self.path, |file: &mut ContextFile| {
            file.entry(session.as_str().to_string())
                .or_default()
                .insert(field.to_string(), Value::String(value.to_string()));
        })?;
        tracing::info!(session = %session, field, value, "context saved");
        Ok(self.path.clone())
    }

    /// Fields stored for `session`. Absent or unreadable state yields an empty map.
    pub fn load(&self, session: &SessionId) -> ContextFields {
        let file = self.load_all();
        match file.get(session.as_str()) {
            Some(fields) => fields.clone(),
            None => {
                tracing::debug!(session = %session, "no context found for session");
                ContextFields::new()
            }
        }
    }

    /// Every session entry, string fields only.
    pub fn load_all(&self) -> BTreeMap<String, ContextFields> {
        let raw: ContextFile = match store::read_json_lenient(&self.path) {
            Ok(Some(file)) => file,
            Ok(None) => {
                tracing::debug!(path = %self.path.display(), "context file not found");
                return BTreeMap::new();
            }
            Err(err) => {
                tracing::warn!(error = %err, "context file unreadable, using empty context");
                return BTreeMap::new();
            }
        };
        raw.into_iter()
            .map(|(session, fields)| {
                let fields = fields
                    .into_iter()
                    .filter_map(|(key, value)| match value {
                        Value::String(s) => Some((key, s)),
                        _ => None,
                    })
                    .collect();
                (session, fields)
            })
            .collect()
    }

    pub fn session(&self, session: &SessionId) -> SessionContext {
        SessionContext {
            fields: self.load(session),
        }
    }
}

/// Typed view over one session's fields.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionContext {
    pub fields: ContextFields,
}

impl SessionContext {
    fn get(&self, key: &str) -> Option<&str> {
        self.fields
            .get(key)
            .map(String::as_str)
            .filter(|v| !v.trim().is_empty())
    }

    pub fn package(&self) -> Option<&str> {
        self.get(FIELD_PACKAGE)
    }

    pub fn branch(&self) -> Option<&str> {
        self.get(FIELD_BRANCH)
    }

    pub fn path(&self) -> Option<&str> {
        self.get(FIELD_PATH)
    }

    pub fn url(&self) -> Option<&str> {
        self.get(FIELD_URL)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::fs;
    use tempfile::TempDir;

    fn sid(raw: &str) -> SessionId {
        SessionId::new(raw).expect("session id")
    }

    #[test]
    fn save_then_load_same_session() {
        let temp = TempDir::new().expect("tempdir");
        let store = ContextStore::new(temp.path().join("context.json"));
        store
            .save(&sid("4242"), FIELD_PACKAGE, "iterCmds")
            .expect("save");

        let loaded = store.load(&sid("4242"));
        assert_eq!(loaded.get("package").map(String::as_str), Some("iterCmds"));
        assert!(store.load(&sid("9999")).is_empty());
    }

    #[test]
    fn saves_merge_fields_within_a_session() {
        let temp = TempDir::new().expect("tempdir");
        let store = ContextStore::new(temp.path().join("context.json"));
        let session = sid("1");
        store.save(&session, FIELD_PACKAGE, "shotgrid").expect("save");
        store.save(&session, FIELD_BRANCH, "dev").expect("save");
        store.save(&session, FIELD_BRANCH, "main").expect("save");

        let mut expected = ContextFields::new();
        expected.insert("branch".to_string(), "main".to_string());
        expected.insert("package".to_string(), "shotgrid".to_string());
        assert_eq!(store.load(&session), expected);
    }

    #[test]
    fn sessions_are_isolated() {
        let temp = TempDir::new().expect("tempdir");
        let store = ContextStore::new(temp.path().join("context.json"));
        store.save(&sid("a"), FIELD_PATH, "/local").expect("save");
        store.save(&sid("b"), FIELD_PATH, "/other").expect("save");

        assert_eq!(store.session(&sid("a")).path(), Some("/local"));
        assert_eq!(store.session(&sid("b")).path(), Some("/other"));
        assert_eq!(store.load_all().len(), 2);
    }

    #[test]
    fn corrupt_file_loads_empty_and_is_replaced_on_save() {
        let temp = TempDir::new().expect("tempdir");
        let path = temp.path().join("context.json");
        fs::write(&path, "{\"1\": {\"package\": ").expect("write");
        let store = ContextStore::new(&path);

        assert!(store.load(&sid("1")).is_empty());

        store.save(&sid("1"), FIELD_URL, "git@host:pkg.git").expect("save");
        assert_eq!(store.session(&sid("1")).url(), Some("git@host:pkg.git"));
    }

    #[test]
    fn missing_file_loads_empty() {
        let temp = TempDir::new().expect("tempdir");
        let store = ContextStore::new(temp.path().join("absent").join("context.json"));
        assert!(store.load(&sid("1")).is_empty());
        assert!(store.load_all().is_empty());
    }

    #[test]
    fn non_string_values_are_preserved_but_not_exposed() {
        let temp = TempDir::new().expect("tempdir");
        let path = temp.path().join("context.json");
        fs::write(&path, r#"{"1": {"package": "foo", "count": 3}}"#).expect("write");
        let store = ContextStore::new(&path);

        let fields = store.load(&sid("1"));
        assert_eq!(fields.len(), 1);

        store.save(&sid("1"), FIELD_BRANCH, "dev").expect("save");
        let raw = fs::read_to_string(&path).expect("read");
        assert!(raw.contains("\"count\": 3"));
    }

    #[test]
    fn blank_values_read_as_unset() {
        let ctx = SessionContext {
            fields: [("package".to_string(), " ".to_string())].into_iter().collect(),
        };
        assert_eq!(ctx.package(), None);
    }

    #[test]
    fn concurrent_saves_from_many_sessions_keep_every_entry() {
        let temp = TempDir::new().expect("tempdir");
        let path = temp.path().join("context").join("context.json");
        let sessions = 16;

        let handles: Vec<_> = (0..sessions)
            .map(|n| {
                let store = ContextStore::new(path.clone());
                std::thread::spawn(move || {
                    let session = sid(&format!("term-{n}"));
                    store.save(&session, FIELD_PACKAGE, &format!("pkg-{n}")).expect("save");
                    store.save(&session, FIELD_BRANCH, "dev").expect("save");
                })
            })
            .collect();
        for handle in handles {
            handle.join().expect("join");
        }

        let store = ContextStore::new(path);
        let all = store.load_all();
        assert_eq!(all.len(), sessions);
        for n in 0..sessions {
            let ctx = store.session(&sid(&format!("term-{n}")));
            assert_eq!(ctx.package(), Some(format!("pkg-{n}").as_str()));
            assert_eq!(ctx.branch(), Some("dev"));
        }
    }
}
