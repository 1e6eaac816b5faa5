use crate::codec::Registry;
use crate::config::{ConfigError, HarnessConfig};
use crate::input::DecodeInput;
use crate::metric::Metric;
use crate::observed::{ObservedInputs, RunContext};
use crate::oracle::{DifferentialOracle, Evaluation, Inconsistency, Priority};
use crate::store::{CorpusStore, StoreError, finish_run};
use tracing::{info, warn};

/// Everything one fuzzing or test run needs: the oracle over the configured
/// implementations and the run's context.
#[derive(Debug)]
pub struct Harness {
    config: HarnessConfig,
    oracle: DifferentialOracle,
    ctx: RunContext,
}

impl Harness {
    /// Builds a harness from `config`, adding its command codecs to the
    /// in-process implementations already in `registry`.
    pub fn new(config: HarnessConfig, registry: Registry) -> Result<Self, ConfigError> {
        let registry = config.build_registry(registry)?;
        let ctx = if config.run.record_inputs {
            RunContext::new(config.run.label.clone())
        } else {
            RunContext::unrecorded(config.run.label.clone())
        };
        info!(
            label = %config.run.label,
            decoders = ?registry.decoder_names().collect::<Vec<_>>(),
            encoders = ?registry.encoder_names().collect::<Vec<_>>(),
            "harness ready"
        );
        Ok(Harness {
            oracle: DifferentialOracle::new(registry),
            config,
            ctx,
        })
    }

    /// Builds a harness for a fuzzing process, which never calls
    /// [`Harness::finish`]. Input recording is forced off so the context
    /// does not grow for the life of the process.
    pub fn for_fuzzing(mut config: HarnessConfig, registry: Registry) -> Result<Self, ConfigError> {
        if config.run.record_inputs {
            warn!("record-inputs is ignored while fuzzing");
            config.run.record_inputs = false;
        }
        Self::new(config, registry)
    }

    pub fn config(&self) -> &HarnessConfig {
        &self.config
    }

    pub fn oracle(&self) -> &DifferentialOracle {
        &self.oracle
    }

    pub fn context(&self) -> &RunContext {
        &self.ctx
    }

    pub fn decode_input(&self, raw: &[u8]) -> DecodeInput {
        self.config.run.decode_input(raw)
    }

    /// Decodes `raw` with every implementation and keeps all of their outcomes.
    pub fn evaluate(&self, raw: &[u8]) -> Evaluation<Metric> {
        self.oracle.evaluate_decode(&self.ctx, &self.decode_input(raw))
    }

    pub fn check_one_input(&self, raw: &[u8]) -> Result<Priority, Inconsistency<Metric>> {
        self.oracle.examine_decode(&self.ctx, &self.decode_input(raw))
    }

    /// The fuzzing entry point.
    ///
    /// # Panics
    ///
    /// Panics with the full report when two implementations disagree, so
    /// the fuzzing engine records the input as a crash.
    pub fn run_one_input(&self, raw: &[u8]) -> Priority {
        match self.check_one_input(raw) {
            Ok(priority) => priority,
            Err(inconsistency) => panic!("{inconsistency}"),
        }
    }

    /// Ends the run, writing recorded inputs to the corpus directory when
    /// one is configured.
    pub fn finish(self) -> (ObservedInputs, Result<(), StoreError>) {
        let store = if self.ctx.is_recording() {
            CorpusStore::resolve(&self.config.store)
        } else {
            None
        };
        finish_run(self.ctx, store.as_ref())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::CodecError;

    fn length_decoder(input: &DecodeInput) -> Result<Metric, CodecError> {
        if input.text.is_empty() {
            return Err(CodecError::failed("empty"));
        }
        Ok(Metric::new("len", input.text.len() as i64))
    }

    fn harness(config: HarnessConfig, quirk: bool) -> Harness {
        let mut registry = Registry::new();
        registry.register_decoder("a", length_decoder).unwrap();
        if quirk {
            registry
                .register_decoder("b", |input: &DecodeInput| -> Result<Metric, CodecError> {
                    if input.text.as_slice() == b"quirk" {
                        return Err(CodecError::failed("rejected"));
                    }
                    length_decoder(input)
                })
                .unwrap();
        } else {
            registry.register_decoder("b", length_decoder).unwrap();
        }
        Harness::new(config, registry).unwrap()
    }

    #[test]
    fn priority_follows_success() {
        let harness = harness(HarnessConfig::default(), false);
        assert_eq!(harness.run_one_input(b"abc"), Priority::High);
        assert_eq!(harness.run_one_input(b""), Priority::Normal);
    }

    #[test]
    #[should_panic(expected = "inconsistent result between a and b")]
    fn disagreement_aborts() {
        let harness = harness(HarnessConfig::default(), true);
        harness.run_one_input(b"quirk");
    }

    #[test]
    fn check_reports_without_panicking() {
        let harness = harness(HarnessConfig::default(), true);
        assert!(harness.check_one_input(b"quirk").is_err());
        assert_eq!(harness.check_one_input(b"fine"), Ok(Priority::High));
        let evaluation = harness.evaluate(b"quirk");
        assert_eq!(evaluation.outcomes.len(), 2);
    }

    #[test]
    fn inputs_use_configured_time_settings() {
        let mut config = HarnessConfig::default();
        config.run.default_time = 7;
        let harness = harness(config, false);
        let input = harness.decode_input(b"x");
        assert_eq!(input.default_time, 7);
        assert_eq!(input.text.as_slice(), b"x");
    }

    #[test]
    fn recording_is_opt_in() {
        let harness = harness(HarnessConfig::default(), false);
        harness.run_one_input(b"abc");
        let (observed, written) = harness.finish();
        assert!(observed.is_empty());
        assert!(written.is_ok());
    }

    #[test]
    fn fuzzing_never_records() {
        let mut config = HarnessConfig::default();
        config.run.record_inputs = true;
        let mut registry = Registry::new();
        registry.register_decoder("a", length_decoder).unwrap();
        let harness = Harness::for_fuzzing(config, registry).unwrap();
        assert!(!harness.context().is_recording());
        assert!(!harness.config().run.record_inputs);
        harness.run_one_input(b"abc");
        let (observed, _) = harness.finish();
        assert!(observed.is_empty());
    }

    #[test]
    fn allow_list_limits_the_comparison() {
        let mut config = HarnessConfig::default();
        config.run.implementations = Some(vec!["a".into()]);
        let harness = harness(config, true);
        assert_eq!(harness.check_one_input(b"quirk"), Ok(Priority::High));
    }
}
