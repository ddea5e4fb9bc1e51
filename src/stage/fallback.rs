//! The in-process fallback holder.
//!
//! Payloads too large for the size-limited facility are parked here. The
//! holder lives as long as the process: it survives everything short of a
//! restart, which is exactly the lifetime of a page session that navigates
//! client-side but never reloads.
//!
//! [`FallbackHolder::session`] hands out the process-wide instance. Only the
//! staged file store touches it; callers go through `save` / `load` / `clear`.

use crate::stage::record::{StageManifest, StagedFile};
use once_cell::sync::Lazy;
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard};

static SESSION_HOLDER: Lazy<FallbackHolder> = Lazy::new(FallbackHolder::new);

#[derive(Debug, Default)]
struct Held {
    stage_id: String,
    files: BTreeMap<usize, StagedFile>,
    // Present only when the manifest itself could not be written to the facility.
    manifest: Option<StageManifest>,
}

/// Shared handle to in-process staged payloads. Cloning shares the contents.
#[derive(Debug, Clone, Default)]
pub struct FallbackHolder {
    inner: Arc<Mutex<Option<Held>>>,
}

impl FallbackHolder {
    /// A detached, empty holder.
    pub fn new() -> Self {
        Self::default()
    }

    /// The process-wide holder.
    pub fn session() -> Self {
        SESSION_HOLDER.clone()
    }

    fn lock(&self) -> MutexGuard<'_, Option<Held>> {
        self.inner
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Park one file of the set `stage_id`. A different `stage_id` replaces
    /// whatever the holder had.
    pub(crate) fn put_file(&self, stage_id: &str, index: usize, file: StagedFile) {
        let mut held = self.lock();
        if held.as_ref().is_none_or(|h| h.stage_id != stage_id) {
            *held = Some(Held {
                stage_id: stage_id.to_string(),
                ..Held::default()
            });
        }
        if let Some(h) = held.as_mut() {
            h.files.insert(index, file);
        }
    }

    /// Park a whole set, manifest included.
    pub(crate) fn put_set(&self, manifest: StageManifest, files: Vec<StagedFile>) {
        *self.lock() = Some(Held {
            stage_id: manifest.stage_id.clone(),
            files: files.into_iter().enumerate().collect(),
            manifest: Some(manifest),
        });
    }

    /// File `index` of set `stage_id`, if parked here.
    pub(crate) fn file(&self, stage_id: &str, index: usize) -> Option<StagedFile> {
        let held = self.lock();
        let h = held.as_ref().filter(|h| h.stage_id == stage_id)?;
        h.files.get(&index).cloned()
    }

    /// A whole parked set, if the manifest lives here too.
    pub(crate) fn whole_set(&self) -> Option<(StageManifest, Vec<StagedFile>)> {
        let held = self.lock();
        let h = held.as_ref()?;
        let manifest = h.manifest.clone()?;
        let files: Vec<StagedFile> = h.files.values().cloned().collect();
        if files.len() != manifest.files.len() {
            return None;
        }
        Some((manifest, files))
    }

    /// Drop everything. Idempotent.
    pub fn clear(&self) {
        *self.lock() = None;
    }

    pub fn is_empty(&self) -> bool {
        self.lock().as_ref().is_none_or(|h| h.files.is_empty())
    }

    /// Bytes of payload currently held.
    pub fn held_bytes(&self) -> usize {
        self.lock()
            .as_ref()
            .map_or(0, |h| h.files.values().map(|f| f.payload.len()).sum())
    }
}
