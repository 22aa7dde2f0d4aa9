//! Spam gate: wraps the classifier and decides suppress vs. process.

use std::sync::Arc;

use tracing::debug;

use crate::error::PipelineError;
use crate::pipeline::types::SpamClassifier;

/// Binary gate in front of retrieval and generation.
pub struct SpamGate {
    classifier: Arc<dyn SpamClassifier>,
}

impl SpamGate {
    pub fn new(classifier: Arc<dyn SpamClassifier>) -> Self {
        Self { classifier }
    }

    /// Returns `true` when the message must be suppressed.
    ///
    /// `text` is expected to be normalized already (see `normalize_text`).
    pub async fn classify(&self, text: &str) -> Result<bool, PipelineError> {
        // Nothing to classify; let the reply path handle it.
        if text.is_empty() {
            return Ok(false);
        }

        let is_spam = self
            .classifier
            .predict(text)
            .await
            .map_err(PipelineError::SpamCheck)?;
        debug!(is_spam, "Spam gate decision");
        Ok(is_spam)
    }
}
