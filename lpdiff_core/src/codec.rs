use crate::binary::Bytes;
use crate::input::{DecodeInput, EncodeInput};
use crate::metric::Metric;
use crate::output::Output;
use std::any::Any;
use std::collections::BTreeMap;
use std::fmt;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, warn};

/// Errors a codec implementation can return.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CodecError {
    /// The implementation does not apply to this input or configuration.
    /// Skipped implementations take no part in the comparison.
    #[error("skipped: {0}")]
    Skip(String),
    /// A genuine decode or encode failure.
    #[error("{0}")]
    Failed(String),
}

impl CodecError {
    pub fn skip(reason: impl Into<String>) -> Self {
        CodecError::Skip(reason.into())
    }

    pub fn failed(message: impl fmt::Display) -> Self {
        CodecError::Failed(message.to_string())
    }

    pub fn is_skip(&self) -> bool {
        matches!(self, CodecError::Skip(_))
    }
}

/// Decodes one line of line protocol into a [`Metric`].
pub trait Decoder: Send + Sync {
    fn decode(&self, input: &DecodeInput) -> Result<Metric, CodecError>;
}

/// Encodes one [`Metric`] into line protocol.
pub trait Encoder: Send + Sync {
    fn encode(&self, input: &EncodeInput) -> Result<Bytes, CodecError>;
}

impl<F> Decoder for F
where
    F: Fn(&DecodeInput) -> Result<Metric, CodecError> + Send + Sync,
{
    fn decode(&self, input: &DecodeInput) -> Result<Metric, CodecError> {
        self(input)
    }
}

impl<F> Encoder for F
where
    F: Fn(&EncodeInput) -> Result<Bytes, CodecError> + Send + Sync,
{
    fn encode(&self, input: &EncodeInput) -> Result<Bytes, CodecError> {
        self(input)
    }
}

#[derive(Error, Debug, PartialEq, Eq)]
pub enum RegistryError {
    #[error("{side} implementation {name:?} is already registered")]
    Duplicate { side: &'static str, name: String },
}

/// The outcome of running one implementation, before comparison.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Outcome<T> {
    Skipped(String),
    Completed(Output<T>),
}

impl<T> Outcome<T> {
    fn from_result(result: Result<T, CodecError>) -> Self {
        match result {
            Ok(value) => Outcome::Completed(Output::Success(value)),
            Err(CodecError::Skip(reason)) => Outcome::Skipped(reason),
            Err(CodecError::Failed(message)) => Outcome::Completed(Output::failure(message)),
        }
    }

    pub fn output(&self) -> Option<&Output<T>> {
        match self {
            Outcome::Skipped(_) => None,
            Outcome::Completed(output) => Some(output),
        }
    }

    pub fn into_output(self) -> Option<Output<T>> {
        match self {
            Outcome::Skipped(_) => None,
            Outcome::Completed(output) => Some(output),
        }
    }
}

/// Named decoder and encoder implementations.
///
/// Implementations are kept sorted by name, so every fan-out visits them in
/// the same order regardless of registration order.
#[derive(Default, Clone)]
pub struct Registry {
    decoders: BTreeMap<String, Arc<dyn Decoder>>,
    encoders: BTreeMap<String, Arc<dyn Encoder>>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_decoder(
        &mut self,
        name: impl Into<String>,
        decoder: impl Decoder + 'static,
    ) -> Result<(), RegistryError> {
        let name = name.into();
        if self.decoders.contains_key(&name) {
            return Err(RegistryError::Duplicate {
                side: "decoder",
                name,
            });
        }
        self.decoders.insert(name, Arc::new(decoder));
        Ok(())
    }

    pub fn register_encoder(
        &mut self,
        name: impl Into<String>,
        encoder: impl Encoder + 'static,
    ) -> Result<(), RegistryError> {
        let name = name.into();
        if self.encoders.contains_key(&name) {
            return Err(RegistryError::Duplicate {
                side: "encoder",
                name,
            });
        }
        self.encoders.insert(name, Arc::new(encoder));
        Ok(())
    }

    pub fn decoder_names(&self) -> impl Iterator<Item = &str> {
        self.decoders.keys().map(String::as_str)
    }

    pub fn encoder_names(&self) -> impl Iterator<Item = &str> {
        self.encoders.keys().map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.decoders.is_empty() && self.encoders.is_empty()
    }

    /// Keeps only the implementations whose name is in `names`.
    pub fn retain(&mut self, names: &[String]) {
        self.decoders.retain(|name, _| names.contains(name));
        self.encoders.retain(|name, _| names.contains(name));
    }

    /// Runs `input` through every decoder. A panic inside one decoder becomes
    /// a failure of that decoder only.
    pub fn decode_all(&self, input: &DecodeInput) -> BTreeMap<String, Outcome<Metric>> {
        self.decoders
            .iter()
            .map(|(name, decoder)| {
                let outcome = Outcome::from_result(guarded(name, || decoder.decode(input)));
                debug!(implementation = %name, ?outcome, "decoded");
                (name.clone(), outcome)
            })
            .collect()
    }

    /// Runs `input` through every encoder, with the same isolation as
    /// [`Registry::decode_all`].
    pub fn encode_all(&self, input: &EncodeInput) -> BTreeMap<String, Outcome<Bytes>> {
        self.encoders
            .iter()
            .map(|(name, encoder)| {
                let outcome = Outcome::from_result(guarded(name, || encoder.encode(input)));
                debug!(implementation = %name, ?outcome, "encoded");
                (name.clone(), outcome)
            })
            .collect()
    }
}

impl fmt::Debug for Registry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Registry")
            .field("decoders", &self.decoders.keys().collect::<Vec<_>>())
            .field("encoders", &self.encoders.keys().collect::<Vec<_>>())
            .finish()
    }
}

/// Calls into one implementation, turning a panic into [`CodecError::Failed`].
fn guarded<T>(name: &str, call: impl FnOnce() -> Result<T, CodecError>) -> Result<T, CodecError> {
    match catch_unwind(AssertUnwindSafe(call)) {
        Ok(result) => result,
        Err(payload) => {
            let message = panic_message(payload.as_ref());
            warn!(implementation = %name, "implementation panicked: {message}");
            Err(CodecError::Failed(format!("panic: {message}")))
        }
    }
}

pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "Unknown panic type".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fixed(metric: Metric) -> impl Fn(&DecodeInput) -> Result<Metric, CodecError> {
        move |_: &DecodeInput| Ok(metric.clone())
    }

    #[test]
    fn iterates_by_name_regardless_of_registration_order() {
        let mut registry = Registry::new();
        registry.register_decoder("zeta", fixed(Metric::new("z", 0))).unwrap();
        registry.register_decoder("alpha", fixed(Metric::new("a", 0))).unwrap();
        registry.register_decoder("mid", fixed(Metric::new("m", 0))).unwrap();
        let names: Vec<&str> = registry.decoder_names().collect();
        assert_eq!(names, ["alpha", "mid", "zeta"]);
        let outcomes = registry.decode_all(&DecodeInput::new("x"));
        assert_eq!(outcomes.keys().collect::<Vec<_>>(), ["alpha", "mid", "zeta"]);
    }

    #[test]
    fn duplicate_names_are_rejected() {
        let mut registry = Registry::new();
        registry.register_decoder("a", fixed(Metric::default())).unwrap();
        let err = registry.register_decoder("a", fixed(Metric::default())).unwrap_err();
        assert_eq!(
            err,
            RegistryError::Duplicate {
                side: "decoder",
                name: "a".into()
            }
        );
        // The encoder side has its own namespace.
        registry
            .register_encoder("a", |_: &EncodeInput| -> Result<Bytes, CodecError> {
                Ok(Bytes::from("x"))
            })
            .unwrap();
    }

    #[test]
    fn skip_is_kept_apart_from_failure() {
        let mut registry = Registry::new();
        registry
            .register_decoder("skips", |_: &DecodeInput| -> Result<Metric, CodecError> {
                Err(CodecError::skip("no ms precision"))
            })
            .unwrap();
        registry
            .register_decoder("fails", |_: &DecodeInput| -> Result<Metric, CodecError> {
                Err(CodecError::failed("bad line"))
            })
            .unwrap();
        let outcomes = registry.decode_all(&DecodeInput::new("x"));
        assert_eq!(outcomes["skips"], Outcome::Skipped("no ms precision".into()));
        assert_eq!(outcomes["fails"], Outcome::Completed(Output::Failure("bad line".into())));
        assert!(outcomes["skips"].output().is_none());
    }

    #[test]
    fn empty_failure_messages_are_replaced() {
        let mut registry = Registry::new();
        registry
            .register_decoder("silent", |_: &DecodeInput| -> Result<Metric, CodecError> {
                Err(CodecError::failed(""))
            })
            .unwrap();
        let outcomes = registry.decode_all(&DecodeInput::new("x"));
        assert_eq!(
            outcomes["silent"],
            Outcome::Completed(Output::Failure(crate::output::UNKNOWN_ERROR.into()))
        );
    }

    #[test]
    fn panic_in_one_implementation_is_contained() {
        let mut registry = Registry::new();
        registry
            .register_decoder("boom", |input: &DecodeInput| -> Result<Metric, CodecError> {
                let index = input.text.len() + 10;
                Ok(Metric::new(vec![input.text[index]], 0))
            })
            .unwrap();
        registry.register_decoder("fine", fixed(Metric::new("ok", 1))).unwrap();
        let outcomes = registry.decode_all(&DecodeInput::new("abc"));
        match &outcomes["boom"] {
            Outcome::Completed(Output::Failure(message)) => {
                assert!(message.starts_with("panic:"), "{message}");
                assert!(message.contains("index out of bounds"), "{message}");
            }
            other => panic!("expected a contained panic, got {other:?}"),
        }
        assert_eq!(
            outcomes["fine"],
            Outcome::Completed(Output::Success(Metric::new("ok", 1)))
        );
    }

    #[test]
    fn retain_filters_both_sides() {
        let mut registry = Registry::new();
        registry.register_decoder("a", fixed(Metric::default())).unwrap();
        registry.register_decoder("b", fixed(Metric::default())).unwrap();
        registry
            .register_encoder("b", |_: &EncodeInput| -> Result<Bytes, CodecError> {
                Ok(Bytes::default())
            })
            .unwrap();
        registry.retain(&["a".to_string()]);
        assert_eq!(registry.decoder_names().collect::<Vec<_>>(), ["a"]);
        assert_eq!(registry.encoder_names().count(), 0);
        assert!(!registry.is_empty());
    }

    #[test]
    fn encode_all_runs_every_encoder() {
        let mut registry = Registry::new();
        registry
            .register_encoder("plain", |input: &EncodeInput| -> Result<Bytes, CodecError> {
                Ok(Bytes::from(format!("{}\n", String::from_utf8_lossy(&input.metric.name))))
            })
            .unwrap();
        let outcomes = registry.encode_all(&EncodeInput::new(Metric::new("cpu", 0)));
        assert_eq!(
            outcomes["plain"],
            Outcome::Completed(Output::Success(Bytes::from("cpu\n")))
        );
    }
}
