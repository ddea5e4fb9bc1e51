//! Staged records and the manifest persisted alongside them.

use crate::error::DocDeskError;
use crate::stage::payload;
use crate::tools::ToolId;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Manifest format version. Manifests with another version load as absent.
pub(crate) const MANIFEST_VERSION: u32 = 1;

/// A user-selected file held between the upload and processing steps.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StagedFile {
    /// Name of the original file.
    pub name: String,
    /// Declared content type. `image/jpeg` after the compression pass.
    pub mime_type: String,
    /// Base64 data URL of the content.
    pub payload: String,
    /// Byte length of the original upload.
    pub size_bytes: u64,
}

impl StagedFile {
    /// Decode the payload back to raw bytes.
    pub fn bytes(&self) -> Result<Vec<u8>, DocDeskError> {
        payload::decode_data_url(&self.payload).map(|(_, bytes)| bytes)
    }

    pub fn is_image(&self) -> bool {
        is_image_mime(&self.mime_type)
    }
}

pub(crate) fn is_image_mime(mime: &str) -> bool {
    mime.starts_with("image/")
}

/// Per-tool parameters persisted next to the staged files.
///
/// The store treats the values as opaque; [`crate::options::ToolParams`]
/// gives them meaning on the processing side.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StagingOptions {
    /// Tool the options belong to. Namespaces the keys.
    pub tool: Option<ToolId>,
    #[serde(default)]
    values: BTreeMap<String, String>,
}

impl StagingOptions {
    pub fn for_tool(tool: ToolId) -> Self {
        Self {
            tool: Some(tool),
            values: BTreeMap::new(),
        }
    }

    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.insert(key, value);
        self
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.values.insert(key.into(), value.into());
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.values.get(key).map(String::as_str)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.values.contains_key(key)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.values.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

/// The one active staged set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StagedSet {
    /// Identifier assigned by `save`; distinguishes successive sets.
    pub stage_id: String,
    pub files: Vec<StagedFile>,
    pub options: StagingOptions,
}

impl StagedSet {
    pub fn tool(&self) -> Option<ToolId> {
        self.options.tool
    }

    /// The first staged file. Single-file tools only look at this one.
    pub fn primary(&self) -> Option<&StagedFile> {
        self.files.first()
    }
}

/// Where a staged file's payload ended up.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum Placement {
    /// Original payload in the size-limited facility.
    Storage,
    /// Re-encoded JPEG payload in the size-limited facility.
    Compressed { quality: u8 },
    /// Original payload in the in-process fallback holder.
    Memory,
}

impl Placement {
    pub fn in_memory(self) -> bool {
        matches!(self, Placement::Memory)
    }
}

/// Manifest entry for one staged file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileEntry {
    pub name: String,
    pub mime_type: String,
    pub size_bytes: u64,
    pub placement: Placement,
}

/// Everything about a staged set except the payloads.
///
/// Written to the facility last, so its presence means every
/// storage-placed payload is already there.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageManifest {
    pub version: u32,
    pub stage_id: String,
    pub files: Vec<FileEntry>,
    pub options: StagingOptions,
}

impl StageManifest {
    pub fn total_bytes(&self) -> u64 {
        self.files.iter().map(|f| f.size_bytes).sum()
    }
}
