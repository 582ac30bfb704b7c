//! Replicated project document.
//!
//! Layout of the underlying yrs document:
//!
//! ```text
//! files  : Array<String>     one camelCase JSON FileRecord per entry
//! meta   : Map               hostName, status, projectLocked, project (JSON)
//! file:<id> : Text           content of one file, created with its record
//! ```
//!
//! Every local mutation runs in one transaction, is pushed to the outbox for
//! the transport and is announced on the change stream as [`Origin::Local`].
//! Remote updates are announced as [`Origin::Remote`], one change per scope
//! they touched.
//!
//! Concurrent edits can leave two entries for one id in `files`. Reads keep
//! the last one, so every replica resolves duplicates the same way.

use std::collections::{HashMap, HashSet};
use std::sync::{Mutex, MutexGuard};

use codeshare_core::{lock, FileRecord, Item, ItemId, ProjectDescriptor};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::{broadcast, mpsc};
use yrs::updates::decoder::Decode;
use yrs::updates::encoder::Encode;
use yrs::{
    Any, Array, ArrayRef, Doc, GetString, Map, MapRef, Out, ReadTxn, StateVector, Text,
    Transact, TransactionMut, Update, WriteTxn,
};

const FILES: &str = "files";
const META: &str = "meta";
const HOST_NAME: &str = "hostName";
const STATUS: &str = "status";
const PROJECT_LOCKED: &str = "projectLocked";
const PROJECT: &str = "project";

const CHANGE_CAPACITY: usize = 1024;

/// Name of the text root holding a file's content.
pub fn text_name(id: &ItemId) -> String {
    format!("file:{id}")
}

#[derive(Debug, Error)]
pub enum DocError {
    #[error("Malformed update: {0}")]
    Decode(String),

    #[error("Record encoding failed: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("Item not found: {0}")]
    NotFound(ItemId),

    #[error("Not a file: {0}")]
    NotAFile(ItemId),

    #[error("Edit out of range in {0}")]
    OutOfRange(ItemId),
}

/// Lifecycle flag the host writes into shared metadata.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    Active,
    Ended,
}

impl SessionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionStatus::Active => "active",
            SessionStatus::Ended => "ended",
        }
    }

    fn parse(s: &str) -> Option<Self> {
        match s {
            "active" => Some(SessionStatus::Active),
            "ended" => Some(SessionStatus::Ended),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Origin {
    Local,
    Remote,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChangeScope {
    Files,
    Meta,
    Content(ItemId),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DocChange {
    pub origin: Origin,
    pub scope: ChangeScope,
}

/// Everything a remote update can change, for scope detection.
#[derive(PartialEq)]
struct Observed {
    records: Vec<FileRecord>,
    meta: [Option<String>; 4],
    contents: HashMap<ItemId, String>,
}

impl Observed {
    fn scopes(&self, after: &Observed) -> Vec<ChangeScope> {
        let mut scopes = Vec::new();
        if self.records != after.records {
            scopes.push(ChangeScope::Files);
        }
        if self.meta != after.meta {
            scopes.push(ChangeScope::Meta);
        }
        let ids: HashSet<&ItemId> = self.contents.keys().chain(after.contents.keys()).collect();
        let mut changed: Vec<ItemId> = ids
            .into_iter()
            .filter(|id| self.contents.get(id) != after.contents.get(id))
            .copied()
            .collect();
        changed.sort();
        scopes.extend(changed.into_iter().map(ChangeScope::Content));
        scopes
    }
}

pub struct SharedDoc {
    doc: Mutex<Doc>,
    changes: broadcast::Sender<DocChange>,
    outbox: mpsc::UnboundedSender<Vec<u8>>,
    outbox_rx: Mutex<Option<mpsc::UnboundedReceiver<Vec<u8>>>>,
}

impl Default for SharedDoc {
    fn default() -> Self {
        Self::new()
    }
}

fn parse_record(value: Out) -> Option<FileRecord> {
    match value {
        Out::Any(Any::String(json)) => match serde_json::from_str(&json) {
            Ok(record) => Some(record),
            Err(e) => {
                log::warn!("Skipping malformed file record: {e}");
                None
            }
        },
        _ => None,
    }
}

/// Raw entries with their array index, duplicates included.
fn entries<T: ReadTxn>(files: &ArrayRef, txn: &T) -> Vec<(u32, FileRecord)> {
    files
        .iter(txn)
        .enumerate()
        .filter_map(|(i, value)| parse_record(value).map(|r| (i as u32, r)))
        .collect()
}

/// Deduplicate by id (last occurrence wins, at its position) and normalise
/// lock coupling.
fn resolve(entries: Vec<(u32, FileRecord)>) -> Vec<FileRecord> {
    let mut seen = HashSet::with_capacity(entries.len());
    let mut records: Vec<FileRecord> = entries
        .into_iter()
        .rev()
        .filter(|(_, r)| seen.insert(r.id))
        .map(|(_, r)| r)
        .collect();
    records.reverse();
    for record in &mut records {
        lock::normalize(record);
    }
    records
}

fn meta_string<T: ReadTxn>(meta: &MapRef, txn: &T, key: &str) -> Option<String> {
    match meta.get(txn, key) {
        Some(Out::Any(Any::String(s))) => Some(s.to_string()),
        _ => None,
    }
}

fn meta_bool<T: ReadTxn>(meta: &MapRef, txn: &T, key: &str) -> Option<bool> {
    match meta.get(txn, key) {
        Some(Out::Any(Any::Bool(b))) => Some(b),
        _ => None,
    }
}

fn read_content<T: ReadTxn>(txn: &T, id: &ItemId) -> Option<String> {
    txn.get_text(text_name(id).as_str())
        .map(|text| text.get_string(txn))
}

fn replace_text(txn: &mut TransactionMut, id: &ItemId, content: &str) {
    let text = txn.get_or_insert_text(text_name(id).as_str());
    let len = text.len(txn);
    if len > 0 {
        text.remove_range(txn, 0, len);
    }
    if !content.is_empty() {
        text.insert(txn, 0, content);
    }
}

fn byte_offset(s: &str, chars: usize) -> Option<usize> {
    if chars == 0 {
        return Some(0);
    }
    s.char_indices()
        .map(|(i, _)| i)
        .chain(std::iter::once(s.len()))
        .nth(chars)
}

impl SharedDoc {
    pub fn new() -> Self {
        let (changes, _) = broadcast::channel(CHANGE_CAPACITY);
        let (outbox, outbox_rx) = mpsc::unbounded_channel();
        Self {
            doc: Mutex::new(Doc::new()),
            changes,
            outbox,
            outbox_rx: Mutex::new(Some(outbox_rx)),
        }
    }

    /// A document together with its outbox receiver.
    pub fn with_outbox() -> (Self, mpsc::UnboundedReceiver<Vec<u8>>) {
        let (changes, _) = broadcast::channel(CHANGE_CAPACITY);
        let (outbox, outbox_rx) = mpsc::unbounded_channel();
        let doc = Self {
            doc: Mutex::new(Doc::new()),
            changes,
            outbox,
            outbox_rx: Mutex::new(None),
        };
        (doc, outbox_rx)
    }

    fn lock(&self) -> MutexGuard<'_, Doc> {
        self.doc.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Change stream. Each subscriber sees every change made after it
    /// subscribed.
    pub fn subscribe(&self) -> broadcast::Receiver<DocChange> {
        self.changes.subscribe()
    }

    /// Encoded updates of local transactions, in commit order. Can be taken
    /// once; the session that owns the transport takes it.
    pub fn take_outbox(&self) -> Option<mpsc::UnboundedReceiver<Vec<u8>>> {
        self.outbox_rx
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take()
    }

    /// Run `f` in one local transaction. `f` must validate before it writes:
    /// the transaction commits even when `f` fails.
    fn write<R, F>(&self, f: F) -> Result<(R, Vec<u8>), DocError>
    where
        F: FnOnce(&mut TransactionMut) -> Result<(R, Vec<ChangeScope>), DocError>,
    {
        let (result, scopes, update) = {
            let doc = self.lock();
            let mut txn = doc.transact_mut();
            let (result, scopes) = f(&mut txn)?;
            let update = txn.encode_update_v1();
            (result, scopes, update)
        };
        if scopes.is_empty() {
            return Ok((result, Vec::new()));
        }
        let _ = self.outbox.send(update.clone());
        for scope in scopes {
            let _ = self.changes.send(DocChange {
                origin: Origin::Local,
                scope,
            });
        }
        Ok((result, update))
    }

    // ─── Reads ────────────────────────────────────────────────────────

    /// Current records: deduplicated, coupling normalised.
    pub fn records(&self) -> Vec<FileRecord> {
        let doc = self.lock();
        let txn = doc.transact();
        match txn.get_array(FILES) {
            Some(files) => resolve(entries(&files, &txn)),
            None => Vec::new(),
        }
    }

    pub fn record(&self, id: &ItemId) -> Option<FileRecord> {
        self.records().into_iter().find(|r| r.id == *id)
    }

    /// True when the shared file list has no records.
    pub fn is_empty(&self) -> bool {
        self.records().is_empty()
    }

    pub fn content(&self, id: &ItemId) -> Option<String> {
        let doc = self.lock();
        let txn = doc.transact();
        read_content(&txn, id)
    }

    /// Records with their current text, in shared order.
    pub fn items(&self) -> Vec<Item> {
        let records = self.records();
        let doc = self.lock();
        let txn = doc.transact();
        records
            .into_iter()
            .map(|record| {
                let content = if record.is_file() {
                    read_content(&txn, &record.id).unwrap_or_default()
                } else {
                    String::new()
                };
                Item::new(record, content)
            })
            .collect()
    }

    pub fn host_name(&self) -> Option<String> {
        let doc = self.lock();
        let txn = doc.transact();
        let meta = txn.get_map(META)?;
        meta_string(&meta, &txn, HOST_NAME).filter(|n| !n.is_empty())
    }

    pub fn status(&self) -> Option<SessionStatus> {
        let doc = self.lock();
        let txn = doc.transact();
        let meta = txn.get_map(META)?;
        meta_string(&meta, &txn, STATUS).and_then(|s| SessionStatus::parse(&s))
    }

    pub fn project_locked(&self) -> bool {
        let doc = self.lock();
        let txn = doc.transact();
        txn.get_map(META)
            .and_then(|meta| meta_bool(&meta, &txn, PROJECT_LOCKED))
            .unwrap_or(false)
    }

    pub fn project(&self) -> Option<ProjectDescriptor> {
        let doc = self.lock();
        let txn = doc.transact();
        let meta = txn.get_map(META)?;
        let json = meta_string(&meta, &txn, PROJECT)?;
        match serde_json::from_str(&json) {
            Ok(project) => Some(project),
            Err(e) => {
                log::warn!("Ignoring malformed shared project descriptor: {e}");
                None
            }
        }
    }

    fn observe(&self) -> Observed {
        let records = self.records();
        let doc = self.lock();
        let txn = doc.transact();
        let meta = match txn.get_map(META) {
            Some(meta) => [
                meta_string(&meta, &txn, HOST_NAME),
                meta_string(&meta, &txn, STATUS),
                meta_bool(&meta, &txn, PROJECT_LOCKED).map(|b| b.to_string()),
                meta_string(&meta, &txn, PROJECT),
            ],
            None => Default::default(),
        };
        let contents = records
            .iter()
            .filter(|r| r.is_file())
            .map(|r| (r.id, read_content(&txn, &r.id).unwrap_or_default()))
            .collect();
        Observed {
            records,
            meta,
            contents,
        }
    }

    // ─── Structural writes ────────────────────────────────────────────

    /// Push a whole item list plus optional project descriptor in one
    /// transaction.
    pub fn seed(
        &self,
        items: &[Item],
        project: Option<&ProjectDescriptor>,
    ) -> Result<Vec<u8>, DocError> {
        let encoded: Vec<String> = items
            .iter()
            .map(|i| serde_json::to_string(&i.record))
            .collect::<Result<_, _>>()?;
        let project_json = project.map(serde_json::to_string).transpose()?;

        let ((), update) = self.write(|txn| {
            let files = txn.get_or_insert_array(FILES);
            let mut scopes = vec![ChangeScope::Files];
            for (item, json) in items.iter().zip(encoded) {
                files.push_back(txn, json);
                replace_text(txn, &item.id(), &item.content);
                if item.record.is_file() {
                    scopes.push(ChangeScope::Content(item.id()));
                }
            }
            if let Some(json) = project_json {
                let meta = txn.get_or_insert_map(META);
                meta.insert(txn, PROJECT, json);
                scopes.push(ChangeScope::Meta);
            }
            Ok(((), scopes))
        })?;
        log::info!("Seeded shared document with {} item(s)", items.len());
        Ok(update)
    }

    /// Add one record and its text container atomically.
    pub fn insert_item(&self, item: &Item) -> Result<Vec<u8>, DocError> {
        let json = serde_json::to_string(&item.record)?;
        let id = item.id();
        let ((), update) = self.write(|txn| {
            let files = txn.get_or_insert_array(FILES);
            files.push_back(txn, json);
            replace_text(txn, &id, &item.content);
            let mut scopes = vec![ChangeScope::Files];
            if item.record.is_file() {
                scopes.push(ChangeScope::Content(id));
            }
            Ok(((), scopes))
        })?;
        Ok(update)
    }

    /// Replace a record in place (rename, move, lock change).
    pub fn update_record(&self, record: &FileRecord) -> Result<Vec<u8>, DocError> {
        let json = serde_json::to_string(record)?;
        let ((), update) = self.write(|txn| {
            let files = txn.get_or_insert_array(FILES);
            let positions: Vec<u32> = entries(&files, txn)
                .into_iter()
                .filter(|(_, r)| r.id == record.id)
                .map(|(i, _)| i)
                .collect();
            let Some(&first) = positions.first() else {
                return Err(DocError::NotFound(record.id));
            };
            for index in positions.iter().rev() {
                files.remove(txn, *index);
            }
            files.insert(txn, first, json);
            Ok(((), vec![ChangeScope::Files]))
        })?;
        Ok(update)
    }

    /// Remove records and empty their text containers, in one transaction.
    pub fn remove_items(&self, ids: &[ItemId]) -> Result<Vec<u8>, DocError> {
        let targets: HashSet<ItemId> = ids.iter().copied().collect();
        let ((), update) = self.write(|txn| {
            let files = txn.get_or_insert_array(FILES);
            let doomed: Vec<(u32, FileRecord)> = entries(&files, txn)
                .into_iter()
                .filter(|(_, r)| targets.contains(&r.id))
                .collect();
            if doomed.is_empty() {
                return Ok(((), Vec::new()));
            }
            let mut scopes = vec![ChangeScope::Files];
            for (index, record) in doomed.iter().rev() {
                files.remove(txn, *index);
                if record.is_file() {
                    replace_text(txn, &record.id, "");
                    if !scopes.contains(&ChangeScope::Content(record.id)) {
                        scopes.push(ChangeScope::Content(record.id));
                    }
                }
            }
            Ok(((), scopes))
        })?;
        Ok(update)
    }

    // ─── Content writes ───────────────────────────────────────────────

    fn file_record(&self, id: &ItemId) -> Result<FileRecord, DocError> {
        let record = self.record(id).ok_or(DocError::NotFound(*id))?;
        if !record.is_file() {
            return Err(DocError::NotAFile(*id));
        }
        Ok(record)
    }

    /// Replace a file's whole text. No-op when unchanged.
    pub fn set_content(&self, id: &ItemId, content: &str) -> Result<Vec<u8>, DocError> {
        self.file_record(id)?;
        let id = *id;
        let ((), update) = self.write(|txn| {
            if read_content(txn, &id).as_deref() == Some(content) {
                return Ok(((), Vec::new()));
            }
            replace_text(txn, &id, content);
            Ok(((), vec![ChangeScope::Content(id)]))
        })?;
        Ok(update)
    }

    /// Seed a file's text only if it is still empty. Returns whether it wrote.
    pub fn seed_content(&self, id: &ItemId, content: &str) -> Result<bool, DocError> {
        self.file_record(id)?;
        let id = *id;
        let (seeded, _) = self.write(|txn| {
            let current = read_content(txn, &id).unwrap_or_default();
            if !current.is_empty() || content.is_empty() {
                return Ok((false, Vec::new()));
            }
            replace_text(txn, &id, content);
            Ok((true, vec![ChangeScope::Content(id)]))
        })?;
        Ok(seeded)
    }

    /// Splice a file's text: delete `delete` chars at char `index`, then
    /// insert `insert` there.
    pub fn edit_content(
        &self,
        id: &ItemId,
        index: usize,
        delete: usize,
        insert: &str,
    ) -> Result<Vec<u8>, DocError> {
        self.file_record(id)?;
        let id = *id;
        let ((), update) = self.write(|txn| {
            let text = txn.get_or_insert_text(text_name(&id).as_str());
            let current = text.get_string(txn);
            let start = byte_offset(&current, index).ok_or(DocError::OutOfRange(id))?;
            let end = byte_offset(&current, index + delete).ok_or(DocError::OutOfRange(id))?;
            if end > start {
                text.remove_range(txn, start as u32, (end - start) as u32);
            }
            if !insert.is_empty() {
                text.insert(txn, start as u32, insert);
            }
            if end == start && insert.is_empty() {
                return Ok(((), Vec::new()));
            }
            Ok(((), vec![ChangeScope::Content(id)]))
        })?;
        Ok(update)
    }

    // ─── Metadata writes ──────────────────────────────────────────────

    fn set_meta<V>(&self, key: &'static str, value: V) -> Result<Vec<u8>, DocError>
    where
        V: Into<Any>,
    {
        let value: Any = value.into();
        let ((), update) = self.write(|txn| {
            let meta = txn.get_or_insert_map(META);
            if meta.get(txn, key) == Some(Out::Any(value.clone())) {
                return Ok(((), Vec::new()));
            }
            meta.insert(txn, key, value);
            Ok(((), vec![ChangeScope::Meta]))
        })?;
        Ok(update)
    }

    pub fn set_host_name(&self, name: &str) -> Result<Vec<u8>, DocError> {
        self.set_meta(HOST_NAME, name.to_string())
    }

    pub fn set_status(&self, status: SessionStatus) -> Result<Vec<u8>, DocError> {
        self.set_meta(STATUS, status.as_str().to_string())
    }

    pub fn set_project_locked(&self, locked: bool) -> Result<Vec<u8>, DocError> {
        self.set_meta(PROJECT_LOCKED, locked)
    }

    pub fn set_project(&self, project: &ProjectDescriptor) -> Result<Vec<u8>, DocError> {
        self.set_meta(PROJECT, serde_json::to_string(project)?)
    }

    // ─── Replication ──────────────────────────────────────────────────

    pub fn state_vector(&self) -> Vec<u8> {
        let doc = self.lock();
        let txn = doc.transact();
        txn.state_vector().encode_v1()
    }

    /// Everything `remote_sv` is missing.
    pub fn diff(&self, remote_sv: &[u8]) -> Result<Vec<u8>, DocError> {
        let sv = StateVector::decode_v1(remote_sv).map_err(|e| DocError::Decode(e.to_string()))?;
        let doc = self.lock();
        let txn = doc.transact();
        Ok(txn.encode_diff_v1(&sv))
    }

    pub fn full_state(&self) -> Vec<u8> {
        let doc = self.lock();
        let txn = doc.transact();
        txn.encode_state_as_update_v1(&StateVector::default())
    }

    /// Apply an update from a peer or from local persistence and announce
    /// what it changed. Applying the same update twice changes nothing.
    pub fn apply_remote(&self, update: &[u8]) -> Result<Vec<ChangeScope>, DocError> {
        let update = Update::decode_v1(update).map_err(|e| DocError::Decode(e.to_string()))?;
        let before = self.observe();
        let applied = {
            let doc = self.lock();
            let mut txn = doc.transact_mut();
            txn.apply_update(update)
        };
        let after = self.observe();

        // Whatever did integrate is still announced.
        let scopes = before.scopes(&after);
        for scope in &scopes {
            let _ = self.changes.send(DocChange {
                origin: Origin::Remote,
                scope: *scope,
            });
        }
        applied.map_err(|e| DocError::Decode(e.to_string()))?;
        Ok(scopes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use codeshare_core::{ItemKind, LockField};

    fn sync(from: &SharedDoc, to: &SharedDoc) {
        let diff = from.diff(&to.state_vector()).unwrap();
        to.apply_remote(&diff).unwrap();
    }

    #[test]
    fn test_insert_creates_record_and_text_together() {
        let doc = SharedDoc::new();
        let file = Item::file(None, "a.move", "module 0x1::a{}");
        doc.insert_item(&file).unwrap();

        assert_eq!(doc.records(), vec![file.record.clone()]);
        assert_eq!(doc.content(&file.id()).as_deref(), Some("module 0x1::a{}"));
        assert_eq!(doc.items(), vec![file]);
    }

    #[test]
    fn test_local_changes_are_tagged_and_queued() {
        let doc = SharedDoc::new();
        let mut changes = doc.subscribe();
        let mut outbox = doc.take_outbox().unwrap();
        assert!(doc.take_outbox().is_none());

        let file = Item::file(None, "a.move", "x");
        let update = doc.insert_item(&file).unwrap();

        assert_eq!(outbox.try_recv().unwrap(), update);
        let first = changes.try_recv().unwrap();
        assert_eq!(first.origin, Origin::Local);
        assert_eq!(first.scope, ChangeScope::Files);
        assert_eq!(
            changes.try_recv().unwrap().scope,
            ChangeScope::Content(file.id())
        );
    }

    #[test]
    fn test_remote_update_reports_scopes() {
        let host = SharedDoc::new();
        let guest = SharedDoc::new();
        let mut changes = guest.subscribe();

        let file = Item::file(None, "a.move", "hello");
        host.insert_item(&file).unwrap();
        host.set_host_name("Alice").unwrap();

        let scopes = guest.apply_remote(&host.full_state()).unwrap();
        assert!(scopes.contains(&ChangeScope::Files));
        assert!(scopes.contains(&ChangeScope::Meta));
        assert!(scopes.contains(&ChangeScope::Content(file.id())));
        assert_eq!(changes.try_recv().unwrap().origin, Origin::Remote);

        // Idempotent.
        assert!(guest.apply_remote(&host.full_state()).unwrap().is_empty());
        assert_eq!(guest.host_name().as_deref(), Some("Alice"));
    }

    #[test]
    fn test_malformed_update_is_rejected() {
        let doc = SharedDoc::new();
        let mut changes = doc.subscribe();

        assert!(matches!(
            doc.apply_remote(&[0xff, 0x01, 0x02]),
            Err(DocError::Decode(_))
        ));
        assert!(doc.is_empty());
        assert!(changes.try_recv().is_err());
    }

    #[test]
    fn test_concurrent_renames_converge() {
        let a = SharedDoc::new();
        let b = SharedDoc::new();
        let file = Item::file(None, "a.move", "");
        a.insert_item(&file).unwrap();
        sync(&a, &b);

        let mut left = file.record.clone();
        left.name = "left.move".into();
        let mut right = file.record.clone();
        right.name = "right.move".into();
        a.update_record(&left).unwrap();
        b.update_record(&right).unwrap();

        sync(&a, &b);
        sync(&b, &a);
        assert_eq!(a.records(), b.records());
        assert_eq!(a.records().len(), 1);
    }

    #[test]
    fn test_remove_clears_text() {
        let doc = SharedDoc::new();
        let dir = Item::folder(None, "src");
        let file = Item::file(Some(dir.id()), "a.move", "body");
        doc.seed(&[dir.clone(), file.clone()], None).unwrap();

        doc.remove_items(&[dir.id(), file.id()]).unwrap();
        assert!(doc.is_empty());
        assert_eq!(doc.content(&file.id()).as_deref(), Some(""));
    }

    #[test]
    fn test_reads_normalise_coupling() {
        let doc = SharedDoc::new();
        let mut record = FileRecord::new(None, ItemKind::Folder, "src");
        record.is_expand_locked = true;
        doc.insert_item(&Item::new(record.clone(), "")).unwrap();

        let read = doc.record(&record.id).unwrap();
        assert!(read.is_locked && read.is_expand_locked);

        let mut unlocked = read.clone();
        lock::apply_field(&mut unlocked, LockField::IsLocked, false);
        doc.update_record(&unlocked).unwrap();
        assert!(!doc.record(&record.id).unwrap().is_expand_locked);
    }

    #[test]
    fn test_edit_content_uses_char_offsets() {
        let doc = SharedDoc::new();
        let file = Item::file(None, "notes.md", "héllo");
        doc.insert_item(&file).unwrap();

        doc.edit_content(&file.id(), 1, 1, "e").unwrap();
        assert_eq!(doc.content(&file.id()).as_deref(), Some("hello"));
        assert!(matches!(
            doc.edit_content(&file.id(), 9, 0, "x"),
            Err(DocError::OutOfRange(_))
        ));
    }

    #[test]
    fn test_seed_content_only_when_empty() {
        let doc = SharedDoc::new();
        let file = Item::file(None, "a.move", "");
        doc.insert_item(&file).unwrap();

        assert!(doc.seed_content(&file.id(), "host text").unwrap());
        assert!(!doc.seed_content(&file.id(), "other").unwrap());
        assert_eq!(doc.content(&file.id()).as_deref(), Some("host text"));
    }

    #[test]
    fn test_meta_round_trip() {
        let doc = SharedDoc::new();
        assert_eq!(doc.status(), None);
        assert!(!doc.project_locked());

        let project = ProjectDescriptor::new("demo", "empty");
        doc.set_status(SessionStatus::Ended).unwrap();
        doc.set_project_locked(true).unwrap();
        doc.set_project(&project).unwrap();

        assert_eq!(doc.status(), Some(SessionStatus::Ended));
        assert!(doc.project_locked());
        assert_eq!(doc.project(), Some(project));
        // Unchanged value writes nothing.
        assert!(doc.set_project_locked(true).unwrap().is_empty());
    }
}
