//! The on-disk workspace: stored items, the action cache and the log file.
//!
//! ```text
//! <work_dir>/
//! ├── workspace/
//! │   ├── resources/ docs/ exports/ configs/
//! │   └── .cache/actions/<sha256>.json
//! └── logs/textpress.log
//! ```
//!
//! A [`Workspace`] is opened once per invocation and passed by reference to
//! every action. Cache records are buffered and written on [`Workspace::close`],
//! or on drop if the caller never got that far.

use crate::error::{Result, TextpressError};
use crate::item::Item;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::{debug, warn};

const STORE_DIR: &str = "workspace";
const CACHE_DIR: &str = ".cache/actions";
const LOG_DIR: &str = "logs";
const LOG_FILE: &str = "textpress.log";

/// A cached action result: the stored items the action produced, with the
/// SHA-256 of each stored file at the time it was recorded.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct CacheRecord {
    operation: String,
    key: String,
    outputs: Vec<Item>,
    #[serde(default)]
    digests: Vec<String>,
}

pub struct Workspace {
    work_dir: PathBuf,
    store_root: PathBuf,
    pending: Mutex<BTreeMap<String, CacheRecord>>,
    closed: bool,
}

impl Workspace {
    /// Open (creating as needed) the workspace under `work_dir`.
    pub fn open(work_dir: impl Into<PathBuf>) -> Result<Self> {
        let work_dir = work_dir.into();
        let store_root = work_dir.join(STORE_DIR);
        for dir in [store_root.join(CACHE_DIR), work_dir.join(LOG_DIR)] {
            std::fs::create_dir_all(&dir).map_err(|e| TextpressError::Workspace {
                path: dir.clone(),
                detail: format!("cannot create directory: {e}"),
            })?;
        }
        debug!(path = %store_root.display(), "Opened workspace");
        Ok(Self {
            work_dir,
            store_root,
            pending: Mutex::new(BTreeMap::new()),
            closed: false,
        })
    }

    pub fn work_dir(&self) -> &Path {
        &self.work_dir
    }

    pub fn store_root(&self) -> &Path {
        &self.store_root
    }

    /// Path of the log file for this work directory.
    pub fn log_file(&self) -> PathBuf {
        Self::log_file_in(&self.work_dir)
    }

    /// Log file location without opening the workspace.
    pub fn log_file_in(work_dir: &Path) -> PathBuf {
        work_dir.join(LOG_DIR).join(LOG_FILE)
    }

    /// Absolute path of a stored item's content.
    pub fn content_path(&self, item: &Item) -> Option<PathBuf> {
        item.content_path(&self.store_root)
    }

    // ── Items ────────────────────────────────────────────────────────────

    /// Save a text item under its default file name.
    pub fn save(&self, item: &Item) -> Result<Item> {
        self.save_as(item, &item.default_file_name())
    }

    /// Save a text item as `<type dir>/<file_name>`, replacing any existing
    /// file. Returns the item with its `store_path` set.
    pub fn save_as(&self, item: &Item, file_name: &str) -> Result<Item> {
        item.validate()?;
        let body = item.body.as_deref().ok_or_else(|| TextpressError::InvalidInput {
            operation: "save".to_string(),
            detail: format!("{} item has no body to store", item.format),
        })?;
        let rel = PathBuf::from(item.item_type.store_dir()).join(file_name);
        self.write_atomic(&rel, body.as_bytes())?;
        debug!(path = %rel.display(), bytes = body.len(), "Saved item");
        Ok(item.clone().with_store_path(rel))
    }

    /// Save binary content for `item` as `<type dir>/<file_name>`. The
    /// returned item points at the stored file.
    pub fn save_binary(&self, item: &Item, file_name: &str, bytes: &[u8]) -> Result<Item> {
        let rel = PathBuf::from(item.item_type.store_dir()).join(file_name);
        self.write_atomic(&rel, bytes)?;
        debug!(path = %rel.display(), bytes = bytes.len(), "Saved binary item");
        Ok(item
            .clone()
            .with_external_path(self.store_root.join(&rel))
            .with_store_path(rel))
    }

    /// Reload a saved item, reading text bodies back from disk.
    pub fn load(&self, item: &Item) -> Result<Item> {
        let rel = item.store_path.as_ref().ok_or_else(|| TextpressError::Workspace {
            path: self.store_root.clone(),
            detail: format!("item {item} was never saved"),
        })?;
        let path = self.store_root.join(rel);
        if item.format.is_text() {
            let body = std::fs::read_to_string(&path).map_err(|e| TextpressError::io(&path, e))?;
            Ok(item.clone().with_body(body).with_store_path(rel.clone()))
        } else {
            if !path.is_file() {
                return Err(TextpressError::FileNotFound { path });
            }
            Ok(item.clone().with_external_path(path).with_store_path(rel.clone()))
        }
    }

    fn write_atomic(&self, rel: &Path, bytes: &[u8]) -> Result<()> {
        let path = self.store_root.join(rel);
        let dir = path.parent().unwrap_or(&self.store_root);
        std::fs::create_dir_all(dir).map_err(|e| TextpressError::io(dir, e))?;
        let mut tmp = tempfile::NamedTempFile::new_in(dir).map_err(|e| TextpressError::io(dir, e))?;
        tmp.write_all(bytes).map_err(|e| TextpressError::io(tmp.path(), e))?;
        tmp.persist(&path)
            .map_err(|e| TextpressError::io(&path, e.error))?;
        Ok(())
    }

    // ── Action cache ─────────────────────────────────────────────────────

    /// Cache key for running `operation` with `options` on `input`.
    ///
    /// Hashes the operation name, the JSON form of the options, the input's
    /// declared metadata and its content (body, file bytes or URL).
    pub fn action_key(
        &self,
        operation: &str,
        options: &impl Serialize,
        input: &Item,
    ) -> Result<String> {
        let mut hasher = Sha256::new();
        hasher.update(operation.as_bytes());
        hasher.update([0]);
        let options = serde_json::to_vec(options)
            .map_err(|e| TextpressError::Internal(format!("cannot serialise options: {e}")))?;
        hasher.update(&options);
        hasher.update([0]);
        hasher.update(input.item_type.as_str().as_bytes());
        hasher.update(input.format.as_str().as_bytes());
        hasher.update(input.title.as_deref().unwrap_or_default().as_bytes());
        hasher.update([0]);
        if let Some(ref body) = input.body {
            hasher.update(body.as_bytes());
        } else if let Some(ref path) = input.external_path {
            let bytes = std::fs::read(path).map_err(|e| TextpressError::io(path, e))?;
            hasher.update(&bytes);
        } else if let Some(ref url) = input.url {
            hasher.update(url.as_bytes());
        }
        Ok(format!("{:x}", hasher.finalize()))
    }

    fn record_path(&self, key: &str) -> PathBuf {
        self.store_root.join(CACHE_DIR).join(format!("{key}.json"))
    }

    /// Outputs of a previous run with the same key, if every output file
    /// still exists with the content that run stored.
    ///
    /// Store paths derive from titles, so another input with the same title
    /// may have overwritten an output since; that is a miss.
    pub fn cache_get(&self, key: &str) -> Option<Vec<Item>> {
        let record = match self.pending_record(key) {
            Some(r) => r,
            None => self.read_record(key)?,
        };
        if record.digests.len() != record.outputs.len() {
            debug!(key, "Cache record has no content digests");
            return None;
        }
        let mut outputs = Vec::with_capacity(record.outputs.len());
        for (item, expected) in record.outputs.iter().zip(&record.digests) {
            match self.stored_digest(item) {
                Ok(actual) if actual == *expected => {}
                Ok(_) => {
                    debug!(key, item = %item, "Cached output was overwritten");
                    return None;
                }
                Err(e) => {
                    debug!(key, error = %e, "Cache record is stale");
                    return None;
                }
            }
            match self.load(item) {
                Ok(loaded) => outputs.push(loaded),
                Err(e) => {
                    debug!(key, error = %e, "Cache record is stale");
                    return None;
                }
            }
        }
        debug!(key, operation = %record.operation, "Cache hit");
        Some(outputs)
    }

    fn pending_record(&self, key: &str) -> Option<CacheRecord> {
        self.pending.lock().ok()?.get(key).cloned()
    }

    fn read_record(&self, key: &str) -> Option<CacheRecord> {
        let path = self.record_path(key);
        let raw = std::fs::read_to_string(&path).ok()?;
        match serde_json::from_str::<CacheRecord>(&raw) {
            Ok(record) if record.key == key => Some(record),
            Ok(_) => {
                warn!(path = %path.display(), "Cache record key mismatch; ignoring");
                None
            }
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Corrupt cache record; ignoring");
                None
            }
        }
    }

    /// SHA-256 of a saved item's file.
    fn stored_digest(&self, item: &Item) -> Result<String> {
        let rel = item.store_path.as_ref().ok_or_else(|| {
            TextpressError::Internal(format!("cannot cache unsaved item {item}"))
        })?;
        let path = self.store_root.join(rel);
        let bytes = std::fs::read(&path).map_err(|e| TextpressError::io(&path, e))?;
        Ok(format!("{:x}", Sha256::digest(&bytes)))
    }

    /// Remember that `operation` with `key` produced `outputs`. Outputs must
    /// already be saved. The record is written on [`Workspace::flush`].
    pub fn cache_put(&self, operation: &str, key: &str, outputs: &[Item]) -> Result<()> {
        let mut digests = Vec::with_capacity(outputs.len());
        let mut slim_outputs = Vec::with_capacity(outputs.len());
        for item in outputs {
            digests.push(self.stored_digest(item)?);
            let mut slim = item.clone();
            slim.body = None;
            if slim.format.is_binary() {
                slim.external_path = None;
            }
            slim_outputs.push(slim);
        }
        let record = CacheRecord {
            operation: operation.to_string(),
            key: key.to_string(),
            outputs: slim_outputs,
            digests,
        };
        self.pending
            .lock()
            .map_err(|_| TextpressError::Internal("cache lock poisoned".to_string()))?
            .insert(key.to_string(), record);
        Ok(())
    }

    /// Write all pending cache records.
    pub fn flush(&self) -> Result<()> {
        let pending = {
            let mut guard = self
                .pending
                .lock()
                .map_err(|_| TextpressError::Internal("cache lock poisoned".to_string()))?;
            std::mem::take(&mut *guard)
        };
        for (key, record) in pending {
            let json = serde_json::to_vec_pretty(&record)
                .map_err(|e| TextpressError::Internal(format!("cannot serialise cache record: {e}")))?;
            let rel = PathBuf::from(CACHE_DIR).join(format!("{key}.json"));
            self.write_atomic(&rel, &json)?;
            debug!(key = %key, operation = %record.operation, "Wrote cache record");
        }
        Ok(())
    }

    /// Flush pending records and close the workspace.
    pub fn close(mut self) -> Result<()> {
        self.closed = true;
        self.flush()
    }
}

impl Drop for Workspace {
    fn drop(&mut self) {
        if !self.closed {
            if let Err(e) = self.flush() {
                warn!(error = %e, "Failed to flush workspace on drop");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::item::{Format, ItemType};

    fn md(title: &str, body: &str) -> Item {
        Item::text(ItemType::Export, Format::Markdown, body).with_title(Some(title.into()))
    }

    #[test]
    fn open_creates_layout() {
        let dir = tempfile::tempdir().unwrap();
        let ws = Workspace::open(dir.path().join("tp")).unwrap();
        assert!(ws.store_root().join(".cache/actions").is_dir());
        assert!(dir.path().join("tp/logs").is_dir());
        assert_eq!(ws.log_file(), dir.path().join("tp/logs/textpress.log"));
    }

    #[test]
    fn save_and_load_text() {
        let dir = tempfile::tempdir().unwrap();
        let ws = Workspace::open(dir.path()).unwrap();
        let saved = ws.save(&md("My Report", "# My Report\n")).unwrap();
        assert_eq!(
            saved.store_path.as_deref(),
            Some(Path::new("exports/my_report.md"))
        );
        let loaded = ws.load(&saved.clone().with_body("")).unwrap();
        assert_eq!(loaded.body.as_deref(), Some("# My Report\n"));
    }

    #[test]
    fn save_overwrites() {
        let dir = tempfile::tempdir().unwrap();
        let ws = Workspace::open(dir.path()).unwrap();
        ws.save(&md("Same", "one")).unwrap();
        let saved = ws.save(&md("Same", "two")).unwrap();
        let path = ws.content_path(&saved).unwrap();
        assert_eq!(std::fs::read_to_string(path).unwrap(), "two");
    }

    #[test]
    fn save_binary_points_at_stored_file() {
        let dir = tempfile::tempdir().unwrap();
        let ws = Workspace::open(dir.path()).unwrap();
        let item = Item::file_resource(Format::Docx, "/elsewhere/x.docx").with_type(ItemType::Export);
        let saved = ws.save_binary(&item, "x.docx", b"PK\x03\x04").unwrap();
        let path = saved.external_path.clone().unwrap();
        assert!(path.starts_with(ws.store_root()));
        assert_eq!(std::fs::read(&path).unwrap(), b"PK\x03\x04");
    }

    #[test]
    fn cache_round_trip_after_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let input = md("In", "input");
        let key = {
            let ws = Workspace::open(dir.path()).unwrap();
            let key = ws.action_key("convert", &"opts", &input).unwrap();
            assert!(ws.cache_get(&key).is_none());
            let saved = ws.save(&md("Out", "output")).unwrap();
            ws.cache_put("convert", &key, &[saved]).unwrap();
            // Visible before flush.
            assert!(ws.cache_get(&key).is_some());
            ws.close().unwrap();
            key
        };
        let ws = Workspace::open(dir.path()).unwrap();
        let hit = ws.cache_get(&key).unwrap();
        assert_eq!(hit.len(), 1);
        assert_eq!(hit[0].body.as_deref(), Some("output"));
    }

    #[test]
    fn drop_flushes_pending_records() {
        let dir = tempfile::tempdir().unwrap();
        let key = {
            let ws = Workspace::open(dir.path()).unwrap();
            let saved = ws.save(&md("Out", "output")).unwrap();
            ws.cache_put("format", "abc", &[saved]).unwrap();
            "abc".to_string()
        };
        assert!(dir
            .path()
            .join("workspace/.cache/actions")
            .join(format!("{key}.json"))
            .is_file());
    }

    #[test]
    fn cache_miss_when_output_deleted() {
        let dir = tempfile::tempdir().unwrap();
        let ws = Workspace::open(dir.path()).unwrap();
        let saved = ws.save(&md("Gone", "x")).unwrap();
        ws.cache_put("convert", "k1", &[saved.clone()]).unwrap();
        std::fs::remove_file(ws.content_path(&saved).unwrap()).unwrap();
        assert!(ws.cache_get("k1").is_none());
    }

    #[test]
    fn cache_miss_when_output_overwritten_by_same_title() {
        let dir = tempfile::tempdir().unwrap();
        let ws = Workspace::open(dir.path()).unwrap();
        let alpha = ws.save(&md("Hello", "# Hello\n\nAlpha\n")).unwrap();
        ws.cache_put("convert", "alpha", &[alpha]).unwrap();
        let bravo = ws.save(&md("Hello", "# Hello\n\nBravo\n")).unwrap();
        ws.cache_put("convert", "bravo", &[bravo]).unwrap();

        assert!(ws.cache_get("alpha").is_none());
        let hit = ws.cache_get("bravo").unwrap();
        assert_eq!(hit[0].body.as_deref(), Some("# Hello\n\nBravo\n"));
    }

    #[test]
    fn record_without_digests_is_a_miss() {
        let dir = tempfile::tempdir().unwrap();
        let ws = Workspace::open(dir.path()).unwrap();
        let saved = ws.save(&md("Old", "x")).unwrap();
        let record = serde_json::json!({
            "operation": "convert",
            "key": "old",
            "outputs": [saved],
        });
        std::fs::write(
            ws.store_root().join(".cache/actions/old.json"),
            record.to_string(),
        )
        .unwrap();
        assert!(ws.cache_get("old").is_none());
    }

    #[test]
    fn corrupt_record_is_a_miss() {
        let dir = tempfile::tempdir().unwrap();
        let ws = Workspace::open(dir.path()).unwrap();
        std::fs::write(ws.store_root().join(".cache/actions/bad.json"), "{not json").unwrap();
        assert!(ws.cache_get("bad").is_none());
    }

    #[test]
    fn key_depends_on_operation_options_and_content() {
        let dir = tempfile::tempdir().unwrap();
        let ws = Workspace::open(dir.path()).unwrap();
        let a = md("T", "body");
        let k = ws.action_key("format", &1, &a).unwrap();
        assert_eq!(k, ws.action_key("format", &1, &a).unwrap());
        assert_ne!(k, ws.action_key("convert", &1, &a).unwrap());
        assert_ne!(k, ws.action_key("format", &2, &a).unwrap());
        assert_ne!(k, ws.action_key("format", &1, &md("T", "other")).unwrap());
        assert_eq!(k.len(), 64);
    }

    #[test]
    fn unsaved_items_cannot_be_cached() {
        let dir = tempfile::tempdir().unwrap();
        let ws = Workspace::open(dir.path()).unwrap();
        assert!(ws.cache_put("convert", "k", &[md("x", "y")]).is_err());
    }
}
