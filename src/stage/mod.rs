//! The staged file store.
//!
//! Holds the files selected on an upload step until a processing step picks
//! them up. Payloads go into a size-limited [`KeyValueStorage`] when they fit,
//! through an image [`compress`] pass when they are oversized images, and into
//! the in-process [`FallbackHolder`] otherwise.
//!
//! ## Layout
//!
//! ```text
//! <ns>.stage.manifest   JSON StageManifest (written last)
//! <ns>.stage.file.<i>   data URL of file i, for storage-placed files
//! ```
//!
//! ## Invariants
//!
//! * One active set: `save` clears the previous set before writing.
//! * All or nothing: `load` returns `None` unless every member is reachable.
//! * `save` fails only when an input cannot be read, and then leaves the
//!   previous set untouched.

pub mod compress;
pub mod fallback;
pub mod payload;
pub mod record;
pub mod storage;

use crate::config::StageConfig;
use crate::error::DocDeskError;
use crate::input::StageInput;
use compress::{compress_image_async, COMPRESSED_MIME};
use fallback::FallbackHolder;
use record::{
    is_image_mime, FileEntry, Placement, StageManifest, StagedFile, StagedSet, StagingOptions,
    MANIFEST_VERSION,
};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use storage::KeyValueStorage;
use tracing::{debug, info, warn};

/// What `save` did with each file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StageReceipt {
    pub stage_id: String,
    pub files: Vec<FileEntry>,
}

impl StageReceipt {
    pub fn any_in_memory(&self) -> bool {
        self.files.iter().any(|f| f.placement.in_memory())
    }

    pub fn placements(&self) -> Vec<Placement> {
        self.files.iter().map(|f| f.placement).collect()
    }
}

/// Quota-aware store for the one active staged file set.
pub struct StagedFileStore {
    storage: Arc<dyn KeyValueStorage>,
    holder: FallbackHolder,
    config: StageConfig,
    // FIFO: overlapping saves run in call order, so the last call wins.
    save_lock: tokio::sync::Mutex<()>,
}

impl StagedFileStore {
    /// A store over `storage` using the process-wide fallback holder.
    pub fn new(storage: Arc<dyn KeyValueStorage>, config: StageConfig) -> Self {
        Self::with_holder(storage, FallbackHolder::session(), config)
    }

    /// A store with an explicit fallback holder.
    pub fn with_holder(
        storage: Arc<dyn KeyValueStorage>,
        holder: FallbackHolder,
        config: StageConfig,
    ) -> Self {
        Self {
            storage,
            holder,
            config,
            save_lock: tokio::sync::Mutex::new(()),
        }
    }

    pub fn config(&self) -> &StageConfig {
        &self.config
    }

    fn stage_prefix(&self) -> String {
        format!("{}.stage.", self.config.namespace)
    }

    fn manifest_key(&self) -> String {
        format!("{}manifest", self.stage_prefix())
    }

    fn file_key(&self, index: usize) -> String {
        format!("{}file.{index}", self.stage_prefix())
    }

    /// Stage `files` with `options`, superseding any previous set.
    ///
    /// # Errors
    /// [`DocDeskError::EmptySelection`] for an empty selection, or an
    /// input-read error when a source cannot be read. Capacity and
    /// compression problems never surface; they are absorbed by the fallback.
    pub async fn save(
        &self,
        files: Vec<StageInput>,
        options: StagingOptions,
    ) -> Result<StageReceipt, DocDeskError> {
        if files.is_empty() {
            return Err(DocDeskError::EmptySelection);
        }
        let _turn = self.save_lock.lock().await;

        let timeout = self.config.download_timeout_secs;
        let contents =
            futures::future::try_join_all(files.iter().map(|f| f.read(timeout))).await?;

        self.clear();
        let stage_id = next_stage_id();
        let mut entries = Vec::with_capacity(files.len());
        let mut staged = Vec::with_capacity(files.len());

        for (index, (input, raw)) in files.iter().zip(contents).enumerate() {
            let (file, placement) = self.place(&stage_id, index, input, raw).await;
            entries.push(FileEntry {
                name: file.name.clone(),
                mime_type: file.mime_type.clone(),
                size_bytes: file.size_bytes,
                placement,
            });
            staged.push(file);
        }

        let mut manifest = StageManifest {
            version: MANIFEST_VERSION,
            stage_id: stage_id.clone(),
            files: entries,
            options,
        };
        let json = serde_json::to_string(&manifest)
            .map_err(|e| DocDeskError::Internal(format!("manifest serialisation: {e}")))?;

        if let Err(e) = self.storage.set_item(&self.manifest_key(), &json) {
            warn!("Manifest rejected ({}); holding the whole set in memory", e);
            for (index, entry) in manifest.files.iter_mut().enumerate() {
                if !entry.placement.in_memory() {
                    self.storage.remove_item(&self.file_key(index));
                }
                entry.placement = Placement::Memory;
            }
            self.holder.put_set(manifest.clone(), staged);
        }

        info!(
            "Staged {} file(s) as {} ({} bytes)",
            manifest.files.len(),
            stage_id,
            manifest.total_bytes()
        );
        Ok(StageReceipt {
            stage_id,
            files: manifest.files,
        })
    }

    /// Put one file somewhere, trying storage, then compression, then memory.
    async fn place(
        &self,
        stage_id: &str,
        index: usize,
        input: &StageInput,
        raw: Vec<u8>,
    ) -> (StagedFile, Placement) {
        let key = self.file_key(index);
        let budget = self.config.storage_budget_bytes;
        let original = StagedFile {
            name: input.name.clone(),
            mime_type: input.mime_type.clone(),
            payload: payload::encode_data_url(&input.mime_type, &raw),
            size_bytes: raw.len() as u64,
        };

        if original.payload.len() <= budget {
            match self.storage.set_item(&key, &original.payload) {
                Ok(()) => {
                    debug!("{} → storage ({} bytes)", original.name, original.payload.len());
                    return (original, Placement::Storage);
                }
                Err(e) => warn!("{}: {}", original.name, e),
            }
        }

        if is_image_mime(&original.mime_type) {
            match compress_image_async(raw, budget, self.config.compression).await {
                Ok(out) if out.within_budget => {
                    let compressed = StagedFile {
                        name: original.name.clone(),
                        mime_type: COMPRESSED_MIME.to_string(),
                        payload: payload::encode_data_url(COMPRESSED_MIME, &out.bytes),
                        size_bytes: original.size_bytes,
                    };
                    match self.storage.set_item(&key, &compressed.payload) {
                        Ok(()) => {
                            info!(
                                "{} compressed at q{} → storage ({} bytes)",
                                compressed.name,
                                out.quality,
                                compressed.payload.len()
                            );
                            return (
                                compressed,
                                Placement::Compressed {
                                    quality: out.quality,
                                },
                            );
                        }
                        Err(e) => warn!("{} (compressed): {}", original.name, e),
                    }
                }
                Ok(out) => debug!(
                    "{} still {} bytes at quality floor {}",
                    original.name, out.payload_len, out.quality
                ),
                Err(e) => warn!("Compression failed for {}: {}", original.name, e),
            }
        }

        debug!("{} → process memory ({} bytes)", original.name, original.payload.len());
        self.holder.put_file(stage_id, index, original.clone());
        (original, Placement::Memory)
    }

    /// The active staged set, or `None` when nothing complete is staged.
    pub fn load(&self) -> Option<StagedSet> {
        if let Some(manifest) = self.stored_manifest() {
            return self.assemble(manifest);
        }
        let (manifest, files) = self.holder.whole_set()?;
        Some(StagedSet {
            stage_id: manifest.stage_id,
            files,
            options: manifest.options,
        })
    }

    /// Describe the active set without decoding payloads.
    pub fn status(&self) -> Option<StageManifest> {
        let manifest = match self.stored_manifest() {
            Some(m) => m,
            None => return self.holder.whole_set().map(|(m, _)| m),
        };
        // Memory members from an earlier process are gone, and stored items
        // can be evicted or unreadable. Either makes the set absent.
        let reachable = manifest.files.iter().enumerate().all(|(i, f)| {
            if f.placement.in_memory() {
                self.holder.file(&manifest.stage_id, i).is_some()
            } else {
                self.storage.get_item(&self.file_key(i)).is_some()
            }
        });
        reachable.then_some(manifest)
    }

    fn stored_manifest(&self) -> Option<StageManifest> {
        let json = self.storage.get_item(&self.manifest_key())?;
        match serde_json::from_str::<StageManifest>(&json) {
            Ok(m) if m.version == MANIFEST_VERSION => Some(m),
            Ok(m) => {
                warn!("Ignoring manifest with unsupported version {}", m.version);
                None
            }
            Err(e) => {
                warn!("Ignoring unreadable manifest: {}", e);
                None
            }
        }
    }

    fn assemble(&self, manifest: StageManifest) -> Option<StagedSet> {
        let mut files = Vec::with_capacity(manifest.files.len());
        for (index, entry) in manifest.files.iter().enumerate() {
            let file = if entry.placement.in_memory() {
                self.holder.file(&manifest.stage_id, index)
            } else {
                self.storage
                    .get_item(&self.file_key(index))
                    .map(|payload| StagedFile {
                        name: entry.name.clone(),
                        mime_type: entry.mime_type.clone(),
                        payload,
                        size_bytes: entry.size_bytes,
                    })
            };
            match file {
                Some(f) => files.push(f),
                None => {
                    debug!(
                        "Staged set {} is incomplete: '{}' unavailable",
                        manifest.stage_id, entry.name
                    );
                    return None;
                }
            }
        }
        Some(StagedSet {
            stage_id: manifest.stage_id,
            files,
            options: manifest.options,
        })
    }

    /// Remove every staged payload and all metadata. Idempotent.
    pub fn clear(&self) {
        // Manifest first: without it nothing else is reachable.
        self.storage.remove_item(&self.manifest_key());
        let prefix = self.stage_prefix();
        for key in self.storage.keys() {
            if key.starts_with(&prefix) {
                self.storage.remove_item(&key);
            }
        }
        self.holder.clear();
    }
}

static STAGE_COUNTER: AtomicU64 = AtomicU64::new(0);

fn next_stage_id() -> String {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos();
    let n = STAGE_COUNTER.fetch_add(1, Ordering::Relaxed);
    format!("{nanos:x}-{n:x}")
}
