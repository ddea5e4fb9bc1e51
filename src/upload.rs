//! The upload step: validate a selection, stage it, navigate.

use crate::error::DocDeskError;
use crate::history::ActivityLog;
use crate::input::StageInput;
use crate::options::check_required;
use crate::stage::record::StagingOptions;
use crate::stage::StagedFileStore;
use crate::tools::ToolId;
use std::fmt;
use std::sync::Arc;
use tracing::{info, warn};

/// Where the application navigates next.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
    Dashboard,
    Upload(ToolId),
    Processing(ToolId),
}

impl Route {
    pub fn path(&self) -> String {
        match self {
            Route::Dashboard => "/dashboard".to_string(),
            Route::Upload(tool) => format!("/tool/{}", tool.slug()),
            Route::Processing(tool) => format!("/tool/{}/processing", tool.slug()),
        }
    }
}

impl fmt::Display for Route {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.path())
    }
}

/// Upload step for every tool in the table.
pub struct UploadStep {
    store: Arc<StagedFileStore>,
    history: Option<Arc<ActivityLog>>,
}

impl UploadStep {
    pub fn new(store: Arc<StagedFileStore>) -> Self {
        Self {
            store,
            history: None,
        }
    }

    pub fn with_history(mut self, history: Arc<ActivityLog>) -> Self {
        self.history = Some(history);
        self
    }

    /// Check a selection against the tool table without staging anything.
    pub fn validate(
        &self,
        tool: ToolId,
        inputs: &[StageInput],
        options: &StagingOptions,
    ) -> Result<(), DocDeskError> {
        let spec = tool.spec();
        spec.validate_names(inputs.iter().map(|i| i.name.as_str()))?;

        let max = self.store.config().max_file_bytes;
        for input in inputs {
            if let Some(size) = input.known_size().filter(|&s| s > max) {
                return Err(DocDeskError::FileTooLarge {
                    name: input.name.clone(),
                    size,
                    max,
                });
            }
        }

        check_required(tool, options)
    }

    /// Validate, stage, and return the processing route.
    ///
    /// On `Err`, show [`DocDeskError::user_message`] inline and let the user
    /// resubmit; the previously staged set, if any, is untouched.
    pub async fn submit(
        &self,
        tool: ToolId,
        inputs: Vec<StageInput>,
        mut options: StagingOptions,
    ) -> Result<Route, DocDeskError> {
        options.tool = Some(tool);
        self.validate(tool, &inputs, &options)?;

        let receipt = self.store.save(inputs, options).await?;
        info!(
            "{}: staged {} file(s) as {}{}",
            tool,
            receipt.files.len(),
            receipt.stage_id,
            if receipt.any_in_memory() { " (memory fallback)" } else { "" }
        );

        if let Some(history) = &self.history {
            if let Err(e) = history.set_last_used_tool(tool) {
                warn!("Could not record last used tool: {}", e);
            }
        }
        Ok(Route::Processing(tool))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::StageConfig;
    use crate::stage::fallback::FallbackHolder;
    use crate::stage::storage::SessionStorage;

    fn step() -> (UploadStep, Arc<StagedFileStore>, Arc<ActivityLog>) {
        let storage = Arc::new(SessionStorage::new());
        let store = Arc::new(StagedFileStore::with_holder(
            storage.clone(),
            FallbackHolder::new(),
            StageConfig::builder()
                .max_file_bytes(1024 * 1024)
                .build()
                .unwrap(),
        ));
        let history = Arc::new(ActivityLog::new(storage, "docdesk"));
        let step = UploadStep::new(store.clone()).with_history(history.clone());
        (step, store, history)
    }

    #[test]
    fn routes() {
        assert_eq!(Route::Dashboard.path(), "/dashboard");
        assert_eq!(Route::Upload(ToolId::PdfMerge).path(), "/tool/pdf-merge");
        assert_eq!(
            Route::Processing(ToolId::Ocr).to_string(),
            "/tool/ocr/processing"
        );
    }

    #[tokio::test]
    async fn submit_stages_and_routes_to_processing() {
        let (step, store, history) = step();
        let route = step
            .submit(
                ToolId::PdfProtect,
                vec![StageInput::from_bytes("a.pdf", "application/pdf", b"%PDF".to_vec())],
                StagingOptions::default().with("password", "pw"),
            )
            .await
            .unwrap();
        assert_eq!(route, Route::Processing(ToolId::PdfProtect));

        let set = store.load().unwrap();
        assert_eq!(set.tool(), Some(ToolId::PdfProtect));
        assert_eq!(set.options.get("password"), Some("pw"));
        assert_eq!(history.last_used_tool(), Some(ToolId::PdfProtect));
    }

    #[tokio::test]
    async fn oversized_file_is_rejected_before_staging() {
        let (step, store, _) = step();
        let err = step
            .submit(
                ToolId::PdfSplit,
                vec![StageInput::from_bytes("big.pdf", "application/pdf", vec![0u8; 1024 * 1024 + 1])],
                StagingOptions::default(),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, DocDeskError::FileTooLarge { .. }));
        assert_eq!(err.user_message(), "File is too large. Max file size: 1MB");
        assert!(store.load().is_none());
    }

    #[tokio::test]
    async fn missing_password_is_rejected() {
        let (step, _, _) = step();
        let err = step
            .submit(
                ToolId::PdfProtect,
                vec![StageInput::from_bytes("a.pdf", "application/pdf", b"%PDF".to_vec())],
                StagingOptions::default(),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, DocDeskError::MissingOption { .. }));
    }

    #[tokio::test]
    async fn wrong_extension_is_rejected() {
        let (step, _, _) = step();
        let err = step
            .submit(
                ToolId::Ocr,
                vec![StageInput::from_bytes("a.pdf", "application/pdf", b"%PDF".to_vec())],
                StagingOptions::default(),
            )
            .await
            .unwrap_err();
        assert_eq!(
            err.user_message(),
            "Unsupported file type. Allowed: .jpg, .jpeg, .png"
        );
    }
}
