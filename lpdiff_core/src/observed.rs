use crate::input::{DecodeInput, EncodeInput};
use std::sync::{Mutex, PoisonError};

/// Inputs seen during one run, in the order they were recorded.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ObservedInputs {
    pub decode: Vec<DecodeInput>,
    pub encode: Vec<EncodeInput>,
}

impl ObservedInputs {
    pub fn is_empty(&self) -> bool {
        self.decode.is_empty() && self.encode.is_empty()
    }
}

/// State owned by one test or fuzz run.
///
/// Every decode and encode goes through a context so that the inputs can be
/// written back to the corpus when the run ends. Appends take a short lock;
/// the collected inputs are handed out once, by value, in [`RunContext::finish`].
#[derive(Debug)]
pub struct RunContext {
    label: String,
    recording: bool,
    decode: Mutex<Vec<DecodeInput>>,
    encode: Mutex<Vec<EncodeInput>>,
}

impl RunContext {
    /// A context that records every input under `label`.
    pub fn new(label: impl Into<String>) -> Self {
        RunContext {
            label: label.into(),
            recording: true,
            decode: Mutex::new(Vec::new()),
            encode: Mutex::new(Vec::new()),
        }
    }

    /// A context that records nothing.
    pub fn unrecorded(label: impl Into<String>) -> Self {
        RunContext {
            recording: false,
            ..RunContext::new(label)
        }
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn is_recording(&self) -> bool {
        self.recording
    }

    pub fn record_decode(&self, input: &DecodeInput) {
        if self.recording {
            self.decode
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .push(input.clone());
        }
    }

    pub fn record_encode(&self, input: &EncodeInput) {
        if self.recording {
            self.encode
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .push(input.clone());
        }
    }

    /// Ends the run and returns everything recorded.
    pub fn finish(self) -> ObservedInputs {
        ObservedInputs {
            decode: self
                .decode
                .into_inner()
                .unwrap_or_else(PoisonError::into_inner),
            encode: self
                .encode
                .into_inner()
                .unwrap_or_else(PoisonError::into_inner),
        }
    }
}
