//! Dashboard activity: recent files, recently deleted, last-used tool and
//! per-tool usage counts.
//!
//! Kept in a [`KeyValueStorage`] as small JSON documents under
//! `<ns>.history.*`, separate from the stage keys so `clear()` on the store
//! never touches it. Every mutation is a read-modify-write of one key.

use crate::error::StorageError;
use crate::stage::storage::KeyValueStorage;
use crate::tools::ToolId;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::warn;

/// Maximum entries kept in each list.
pub const HISTORY_LIMIT: usize = 20;

/// A file that went through a tool.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecentFile {
    pub file_name: String,
    pub tool: ToolId,
    /// Seconds since the Unix epoch.
    pub used_at: u64,
}

/// Activity log over a key/value facility.
pub struct ActivityLog {
    storage: Arc<dyn KeyValueStorage>,
    namespace: String,
}

impl ActivityLog {
    pub fn new(storage: Arc<dyn KeyValueStorage>, namespace: impl Into<String>) -> Self {
        Self {
            storage,
            namespace: namespace.into(),
        }
    }

    fn key(&self, name: &str) -> String {
        format!("{}.history.{name}", self.namespace)
    }

    fn read<T: DeserializeOwned + Default>(&self, name: &str) -> T {
        let Some(json) = self.storage.get_item(&self.key(name)) else {
            return T::default();
        };
        serde_json::from_str(&json).unwrap_or_else(|e| {
            warn!("Discarding unreadable history '{}': {}", name, e);
            T::default()
        })
    }

    fn write<T: Serialize>(&self, name: &str, value: &T) -> Result<(), StorageError> {
        // Plain data: serialisation cannot fail.
        let json = serde_json::to_string(value).unwrap_or_default();
        self.storage.set_item(&self.key(name), &json)
    }

    /// Remember `tool` as the last one opened.
    pub fn set_last_used_tool(&self, tool: ToolId) -> Result<(), StorageError> {
        self.write("last_tool", &tool)
    }

    pub fn last_used_tool(&self) -> Option<ToolId> {
        self.read::<Option<ToolId>>("last_tool")
    }

    /// The tool to offer under "Resume your work", unless the user dismissed
    /// the banner for that same tool.
    pub fn resume_tool(&self) -> Option<ToolId> {
        let last = self.last_used_tool()?;
        let hidden = self.read::<Option<ToolId>>("hide_resume_for");
        (hidden != Some(last)).then_some(last)
    }

    /// Hide the resume banner until a different tool is used.
    pub fn dismiss_resume(&self) -> Result<(), StorageError> {
        match self.last_used_tool() {
            Some(tool) => self.write("hide_resume_for", &tool),
            None => Ok(()),
        }
    }

    /// Record a completed run: recent file, usage count and last-used tool.
    pub fn record_use(&self, tool: ToolId, file_name: &str) -> Result<(), StorageError> {
        let mut recent: Vec<RecentFile> = self.read("recent");
        recent.insert(
            0,
            RecentFile {
                file_name: file_name.to_string(),
                tool,
                used_at: now_secs(),
            },
        );
        recent.truncate(HISTORY_LIMIT);
        self.write("recent", &recent)?;

        let mut counts: BTreeMap<String, u64> = self.read("usage");
        *counts.entry(tool.slug().to_string()).or_default() += 1;
        self.write("usage", &counts)?;

        self.set_last_used_tool(tool)
    }

    /// Recent files, newest first.
    pub fn recent_files(&self) -> Vec<RecentFile> {
        self.read("recent")
    }

    /// Recently deleted files, most recently deleted first.
    pub fn deleted_files(&self) -> Vec<RecentFile> {
        self.read("deleted")
    }

    /// Move recent entry `index` to the recently-deleted list.
    pub fn delete_recent(&self, index: usize) -> Result<Option<RecentFile>, StorageError> {
        self.move_entry("recent", "deleted", index)
    }

    /// Move deleted entry `index` back to the front of the recent list.
    pub fn restore_deleted(&self, index: usize) -> Result<Option<RecentFile>, StorageError> {
        self.move_entry("deleted", "recent", index)
    }

    /// Forget deleted entry `index` for good.
    pub fn purge_deleted(&self, index: usize) -> Result<Option<RecentFile>, StorageError> {
        let mut deleted: Vec<RecentFile> = self.read("deleted");
        if index >= deleted.len() {
            return Ok(None);
        }
        let entry = deleted.remove(index);
        self.write("deleted", &deleted)?;
        Ok(Some(entry))
    }

    fn move_entry(
        &self,
        from: &str,
        to: &str,
        index: usize,
    ) -> Result<Option<RecentFile>, StorageError> {
        let mut source: Vec<RecentFile> = self.read(from);
        if index >= source.len() {
            return Ok(None);
        }
        let entry = source.remove(index);
        let mut target: Vec<RecentFile> = self.read(to);
        target.insert(0, entry.clone());
        target.truncate(HISTORY_LIMIT);
        self.write(to, &target)?;
        self.write(from, &source)?;
        Ok(Some(entry))
    }

    pub fn clear_recent(&self) {
        self.storage.remove_item(&self.key("recent"));
    }

    pub fn clear_deleted(&self) {
        self.storage.remove_item(&self.key("deleted"));
    }

    /// Completed runs per tool. Tools never used are absent.
    pub fn usage_counts(&self) -> BTreeMap<ToolId, u64> {
        let counts: BTreeMap<String, u64> = self.read("usage");
        counts
            .into_iter()
            .filter_map(|(slug, n)| ToolId::from_slug(&slug).map(|t| (t, n)))
            .collect()
    }

    /// The `n` most used tools, most used first. Ties keep dashboard order.
    pub fn most_used(&self, n: usize) -> Vec<(ToolId, u64)> {
        let mut counts: Vec<(ToolId, u64)> = self.usage_counts().into_iter().collect();
        counts.sort_by(|a, b| b.1.cmp(&a.1).then(a.0.cmp(&b.0)));
        counts.truncate(n);
        counts
    }
}

fn now_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stage::storage::SessionStorage;

    fn log() -> ActivityLog {
        ActivityLog::new(Arc::new(SessionStorage::new()), "docdesk")
    }

    #[test]
    fn record_use_updates_everything() {
        let log = log();
        assert!(log.last_used_tool().is_none());
        log.record_use(ToolId::PdfMerge, "a.pdf").unwrap();
        log.record_use(ToolId::Ocr, "scan.png").unwrap();
        log.record_use(ToolId::PdfMerge, "b.pdf").unwrap();

        let recent = log.recent_files();
        assert_eq!(recent.len(), 3);
        assert_eq!(recent[0].file_name, "b.pdf");
        assert_eq!(log.last_used_tool(), Some(ToolId::PdfMerge));
        assert_eq!(log.usage_counts()[&ToolId::PdfMerge], 2);
        assert_eq!(
            log.most_used(1),
            vec![(ToolId::PdfMerge, 2)]
        );
    }

    #[test]
    fn dismissed_resume_comes_back_for_another_tool() {
        let log = log();
        assert!(log.resume_tool().is_none());
        log.dismiss_resume().unwrap();

        log.record_use(ToolId::PdfMerge, "a.pdf").unwrap();
        assert_eq!(log.resume_tool(), Some(ToolId::PdfMerge));

        log.dismiss_resume().unwrap();
        assert!(log.resume_tool().is_none());
        log.record_use(ToolId::PdfMerge, "b.pdf").unwrap();
        assert!(log.resume_tool().is_none(), "same tool stays dismissed");

        log.record_use(ToolId::Ocr, "scan.png").unwrap();
        assert_eq!(log.resume_tool(), Some(ToolId::Ocr));
        log.record_use(ToolId::PdfMerge, "c.pdf").unwrap();
        assert!(log.resume_tool().is_none(), "dismissal is per tool");
    }

    #[test]
    fn recent_list_is_capped() {
        let log = log();
        for i in 0..25 {
            log.record_use(ToolId::PdfSplit, &format!("f{i}.pdf")).unwrap();
        }
        let recent = log.recent_files();
        assert_eq!(recent.len(), HISTORY_LIMIT);
        assert_eq!(recent[0].file_name, "f24.pdf");
    }

    #[test]
    fn delete_restore_purge() {
        let log = log();
        log.record_use(ToolId::PdfRotate, "a.pdf").unwrap();
        log.record_use(ToolId::PdfRotate, "b.pdf").unwrap();

        let gone = log.delete_recent(1).unwrap().unwrap();
        assert_eq!(gone.file_name, "a.pdf");
        assert_eq!(log.recent_files().len(), 1);
        assert_eq!(log.deleted_files()[0].file_name, "a.pdf");

        log.restore_deleted(0).unwrap();
        assert_eq!(log.recent_files()[0].file_name, "a.pdf");
        assert!(log.deleted_files().is_empty());

        log.delete_recent(0).unwrap();
        assert_eq!(log.purge_deleted(0).unwrap().unwrap().file_name, "a.pdf");
        assert!(log.deleted_files().is_empty());
        assert!(log.purge_deleted(5).unwrap().is_none());
        assert!(log.delete_recent(9).unwrap().is_none());
    }

    #[test]
    fn clear_lists() {
        let log = log();
        log.record_use(ToolId::Ocr, "a.png").unwrap();
        log.delete_recent(0).unwrap();
        log.record_use(ToolId::Ocr, "b.png").unwrap();
        log.clear_recent();
        log.clear_deleted();
        assert!(log.recent_files().is_empty());
        assert!(log.deleted_files().is_empty());
        // Counts survive clearing the lists.
        assert_eq!(log.usage_counts()[&ToolId::Ocr], 2);
    }

    #[test]
    fn corrupt_history_reads_as_empty() {
        let storage = Arc::new(SessionStorage::new());
        storage.set_item("docdesk.history.recent", "nope").unwrap();
        let log = ActivityLog::new(storage, "docdesk");
        assert!(log.recent_files().is_empty());
    }
}
