use crate::binary::Bytes;
use crate::codec::{Outcome, Registry};
use crate::input::{CodecInput, DecodeInput, EncodeInput};
use crate::metric::Metric;
use crate::observed::RunContext;
use crate::output::Output;
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;
use tracing::debug;

/// Advisory classification of an input that raised no inconsistency.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Priority {
    #[default]
    Normal,
    /// Every implementation that took part succeeded, so the input is
    /// well-formed and worth mutating further.
    High,
}

/// Two implementations disagreed on one input.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Inconsistency<T> {
    pub first: String,
    pub second: String,
    pub first_output: Output<T>,
    pub second_output: Output<T>,
    /// MD5 fingerprint of the input, for deduplicating reports.
    pub input_hash: String,
}

impl<T: Serialize> fmt::Display for Inconsistency<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "inconsistent result between {} and {} (input {})",
            self.first, self.second, self.input_hash
        )?;
        for (name, output) in [
            (&self.first, &self.first_output),
            (&self.second, &self.second_output),
        ] {
            let text = serde_yaml::to_string(output).map_err(|_| fmt::Error)?;
            writeln!(f, "--- {name}")?;
            f.write_str(&text)?;
        }
        Ok(())
    }
}

impl<T: Serialize + fmt::Debug> std::error::Error for Inconsistency<T> {}

/// The outcome of one differential evaluation: what every implementation
/// produced, and whether they agree.
#[derive(Debug, Clone)]
pub struct Evaluation<T> {
    pub outcomes: BTreeMap<String, Outcome<T>>,
    pub verdict: Result<Priority, Inconsistency<T>>,
}

/// Compares the outcomes of every implementation for one input.
///
/// Skipped implementations are left out entirely. With fewer than two
/// remaining outputs there is nothing to compare.
pub fn compare<I, T>(
    input: &I,
    outcomes: &BTreeMap<String, Outcome<T>>,
) -> Result<Priority, Inconsistency<T>>
where
    I: CodecInput,
    T: Clone + PartialEq,
{
    let outputs: Vec<(&String, &Output<T>)> = outcomes
        .iter()
        .filter_map(|(name, outcome)| outcome.output().map(|output| (name, output)))
        .collect();

    let priority = if !outputs.is_empty() && outputs.iter().all(|(_, output)| output.is_success()) {
        Priority::High
    } else {
        Priority::Normal
    };

    let Some(((first, expected), rest)) = outputs.split_first() else {
        return Ok(priority);
    };
    for (name, output) in rest {
        if !output.equivalent(expected) {
            return Err(Inconsistency {
                first: (*first).clone(),
                second: (*name).clone(),
                first_output: (*expected).clone(),
                second_output: (*output).clone(),
                input_hash: input.fingerprint(),
            });
        }
    }
    Ok(priority)
}

/// Runs inputs through every registered implementation and checks that they
/// agree.
#[derive(Debug, Clone)]
pub struct DifferentialOracle {
    registry: Registry,
}

impl DifferentialOracle {
    pub fn new(registry: Registry) -> Self {
        DifferentialOracle { registry }
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn evaluate_decode(&self, ctx: &RunContext, input: &DecodeInput) -> Evaluation<Metric> {
        ctx.record_decode(input);
        let outcomes = self.registry.decode_all(input);
        let verdict = compare(input, &outcomes);
        debug!(input = %input.fingerprint(), ?verdict, "decode evaluated");
        Evaluation { outcomes, verdict }
    }

    pub fn evaluate_encode(&self, ctx: &RunContext, input: &EncodeInput) -> Evaluation<Bytes> {
        ctx.record_encode(input);
        let outcomes = self.registry.encode_all(input);
        let verdict = compare(input, &outcomes);
        debug!(input = %input.fingerprint(), ?verdict, "encode evaluated");
        Evaluation { outcomes, verdict }
    }

    pub fn examine_decode(
        &self,
        ctx: &RunContext,
        input: &DecodeInput,
    ) -> Result<Priority, Inconsistency<Metric>> {
        self.evaluate_decode(ctx, input).verdict
    }

    pub fn examine_encode(
        &self,
        ctx: &RunContext,
        input: &EncodeInput,
    ) -> Result<Priority, Inconsistency<Bytes>> {
        self.evaluate_encode(ctx, input).verdict
    }
}
