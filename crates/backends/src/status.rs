//! Recording status sink.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use contracts::{AcquisitionError, StatusSink};
use tracing::{info, warn};

use crate::lock;

/// Status sink that logs and keeps everything it is told
pub struct RecordingStatus {
    answer: AtomicBool,
    messages: Mutex<Vec<String>>,
    failures: Mutex<Vec<AcquisitionError>>,
    prompts: Mutex<Vec<String>>,
}

impl RecordingStatus {
    /// Sink that confirms every prompt
    pub fn new() -> Self {
        Self::answering(true)
    }

    /// Sink that answers every prompt with `answer`
    pub fn answering(answer: bool) -> Self {
        Self {
            answer: AtomicBool::new(answer),
            messages: Mutex::new(Vec::new()),
            failures: Mutex::new(Vec::new()),
            prompts: Mutex::new(Vec::new()),
        }
    }

    pub fn set_answer(&self, answer: bool) {
        self.answer.store(answer, Ordering::SeqCst);
    }

    pub fn messages(&self) -> Vec<String> {
        lock(&self.messages).clone()
    }

    pub fn failures(&self) -> Vec<AcquisitionError> {
        lock(&self.failures).clone()
    }

    pub fn prompts(&self) -> Vec<String> {
        lock(&self.prompts).clone()
    }
}

impl Default for RecordingStatus {
    fn default() -> Self {
        Self::new()
    }
}

impl StatusSink for RecordingStatus {
    fn status(&self, message: &str) {
        info!(status = message, "acquisition status");
        lock(&self.messages).push(message.to_string());
    }

    fn report_failure(&self, error: &AcquisitionError) {
        warn!(error = %error, kind = error.kind(), "acquisition failure reported");
        lock(&self.failures).push(error.clone());
    }

    fn confirm(&self, prompt: &str) -> bool {
        lock(&self.prompts).push(prompt.to_string());
        self.answer.load(Ordering::SeqCst)
    }
}
