use crate::binary::Bytes;
use crate::codec::{Outcome, Registry};
use crate::input::{CodecInput, DecodeInput, EncodeInput};
use crate::observed::RunContext;
use crate::oracle::{DifferentialOracle, compare};
use crate::output::{DecodeOutput, EncodeOutput, Output};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::{info, warn};

/// Named test fixtures.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Corpus {
    #[serde(default)]
    pub encode: BTreeMap<String, EncodeInput>,
    #[serde(default)]
    pub decode: BTreeMap<String, DecodeInput>,
}

impl Corpus {
    pub fn is_empty(&self) -> bool {
        self.encode.is_empty() && self.decode.is_empty()
    }
}

/// A decode fixture and what each implementation made of it.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DecodeResults {
    pub input: DecodeInput,
    pub output: BTreeMap<String, DecodeOutput>,
}

/// An encode fixture and what each implementation made of it.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncodeResults {
    pub input: EncodeInput,
    pub output: BTreeMap<String, EncodeOutput>,
}

/// Golden outputs for every fixture in a corpus, keyed by fixture name.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Results {
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub encode: BTreeMap<String, EncodeResults>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub decode: BTreeMap<String, DecodeResults>,
}

impl Results {
    /// Runs every fixture through every implementation in `registry`.
    ///
    /// Skipped implementations are left out of the recorded outputs.
    /// Disagreements are recorded as they are and logged; use
    /// [`Results::inconsistencies`] to list them.
    pub fn gather(corpus: &Corpus, registry: &Registry, ctx: &RunContext) -> Results {
        let oracle = DifferentialOracle::new(registry.clone());
        let mut results = Results::default();

        for (name, input) in &corpus.decode {
            let evaluation = oracle.evaluate_decode(ctx, input);
            if let Err(inconsistency) = &evaluation.verdict {
                warn!(fixture = %name, "{inconsistency}");
            }
            let output = evaluation
                .outcomes
                .into_iter()
                .filter_map(|(implementation, outcome)| {
                    outcome.into_output().map(|output| (implementation, output))
                })
                .collect();
            results.decode.insert(
                name.clone(),
                DecodeResults {
                    input: input.clone(),
                    output,
                },
            );
        }

        for (name, input) in &corpus.encode {
            let evaluation = oracle.evaluate_encode(ctx, input);
            if let Err(inconsistency) = &evaluation.verdict {
                warn!(fixture = %name, "{inconsistency}");
            }
            let output = evaluation
                .outcomes
                .into_iter()
                .filter_map(|(implementation, outcome)| {
                    outcome.into_output().map(|output| (implementation, output))
                })
                .collect();
            results.encode.insert(
                name.clone(),
                EncodeResults {
                    input: input.clone(),
                    output,
                },
            );
        }

        info!(
            decode = results.decode.len(),
            encode = results.encode.len(),
            "gathered results"
        );
        results
    }

    /// Names of fixtures whose recorded outputs disagree, decode fixtures
    /// first, each group sorted by name.
    pub fn inconsistencies(&self) -> Vec<String> {
        let decode = self.decode.iter().filter_map(|(name, results)| {
            disagree(&results.input, &results.output).then(|| name.clone())
        });
        let encode = self.encode.iter().filter_map(|(name, results)| {
            disagree(&results.input, &results.output).then(|| name.clone())
        });
        decode.chain(encode).collect()
    }
}

fn disagree<I, T>(input: &I, outputs: &BTreeMap<String, Output<T>>) -> bool
where
    I: CodecInput,
    T: Clone + PartialEq,
{
    let outcomes: BTreeMap<_, _> = outputs
        .iter()
        .map(|(name, output)| (name.clone(), Outcome::Completed(output.clone())))
        .collect();
    compare(input, &outcomes).is_err()
}

/// Distinct decode fixture texts, for seeding a fuzzer.
pub fn decode_seeds(corpus: &Corpus) -> BTreeMap<String, Bytes> {
    corpus
        .decode
        .values()
        .map(|input| {
            (
                format!("{:x}", md5::compute(input.text.as_slice())),
                input.text.clone(),
            )
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::CodecError;
    use crate::input::DEFAULT_TIME;
    use crate::metric::Metric;

    fn registry() -> Registry {
        let mut registry = Registry::new();
        registry
            .register_decoder("echo", |input: &DecodeInput| -> Result<Metric, CodecError> {
                match input.text.as_text() {
                    Some("") | None => Err(CodecError::failed("empty")),
                    Some(text) => Ok(Metric::new(text, input.default_time)),
                }
            })
            .unwrap();
        registry
            .register_decoder("picky", |input: &DecodeInput| -> Result<Metric, CodecError> {
                match input.text.as_text() {
                    Some("odd") => Err(CodecError::failed("odd")),
                    Some("skipme") => Err(CodecError::skip("unsupported")),
                    Some("") | None => Err(CodecError::failed("empty")),
                    Some(text) => Ok(Metric::new(text, input.default_time)),
                }
            })
            .unwrap();
        registry
            .register_encoder("names", |input: &EncodeInput| -> Result<Bytes, CodecError> {
                Ok(input.metric.name.clone())
            })
            .unwrap();
        registry
    }

    fn corpus() -> Corpus {
        let mut corpus = Corpus::default();
        for text in ["plain", "odd", "skipme", ""] {
            corpus
                .decode
                .insert(format!("fixture-{text}"), DecodeInput::new(text));
        }
        corpus
            .encode
            .insert("metric".into(), EncodeInput::new(Metric::new("cpu", 0)));
        corpus
    }

    #[test]
    fn gather_records_every_non_skipped_output() {
        let ctx = RunContext::unrecorded("test");
        let results = Results::gather(&corpus(), &registry(), &ctx);
        assert_eq!(results.decode.len(), 4);
        let skipped = &results.decode["fixture-skipme"].output;
        assert_eq!(skipped.keys().collect::<Vec<_>>(), ["echo"]);
        let plain = &results.decode["fixture-plain"].output;
        assert_eq!(plain["picky"], Output::Success(Metric::new("plain", DEFAULT_TIME)));
        assert_eq!(
            results.encode["metric"].output["names"],
            Output::Success(Bytes::from("cpu"))
        );
    }

    #[test]
    fn disagreements_are_listed_not_dropped() {
        let ctx = RunContext::unrecorded("test");
        let results = Results::gather(&corpus(), &registry(), &ctx);
        assert_eq!(results.inconsistencies(), ["fixture-odd"]);
        assert_eq!(results.decode["fixture-odd"].output.len(), 2);
    }

    #[test]
    fn gather_records_inputs_in_the_context() {
        let ctx = RunContext::new("test");
        Results::gather(&corpus(), &registry(), &ctx);
        let observed = ctx.finish();
        assert_eq!(observed.decode.len(), 4);
        assert_eq!(observed.encode.len(), 1);
    }

    #[test]
    fn results_read_back_from_yaml() {
        let ctx = RunContext::unrecorded("test");
        let results = Results::gather(&corpus(), &registry(), &ctx);
        let text = serde_yaml::to_string(&results).unwrap();
        let back: Results = serde_yaml::from_str(&text).unwrap();
        assert_eq!(back, results);
    }

    #[test]
    fn silent_failures_still_read_back() {
        let mut registry = registry();
        registry
            .register_decoder("mute", |_: &DecodeInput| -> Result<Metric, CodecError> {
                Err(CodecError::failed(""))
            })
            .unwrap();
        let ctx = RunContext::unrecorded("test");
        let results = Results::gather(&corpus(), &registry, &ctx);
        let text = serde_yaml::to_string(&results).unwrap();
        let back: Results = serde_yaml::from_str(&text).unwrap();
        assert_eq!(back, results);
        assert_eq!(
            back.decode["fixture-plain"].output["mute"].error(),
            Some(crate::output::UNKNOWN_ERROR)
        );
    }

    #[test]
    fn empty_sections_are_omitted() {
        let text = serde_yaml::to_string(&Results::default()).unwrap();
        assert_eq!(text, "{}\n");
        let corpus: Corpus = serde_yaml::from_str("decode: {}\n").unwrap();
        assert!(corpus.is_empty());
    }

    #[test]
    fn seeds_are_named_by_content_hash() {
        let mut corpus = corpus();
        corpus.decode.insert("again".into(), DecodeInput::new("plain"));
        let seeds = decode_seeds(&corpus);
        assert_eq!(seeds.len(), 4);
        let name = format!("{:x}", md5::compute(b"plain"));
        assert_eq!(seeds[&name], Bytes::from("plain"));
    }
}
