use crate::config::StoreSettings;
use crate::corpus::{Corpus, Results};
use crate::observed::{ObservedInputs, RunContext};
use serde::de::DeserializeOwned;
use serde::ser::SerializeMap;
use serde::{Serialize, Serializer};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use thiserror::Error;
use tracing::{debug, info, warn};

/// Errors from loading or saving corpus data through the external tool.
///
/// A failed load never yields a partial corpus, and a failed write reports
/// the first file that could not be written.
#[derive(Error, Debug)]
pub enum StoreError {
    /// The tool could not be started at all.
    #[error("failed to run {program:?}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: io::Error,
    },

    /// The tool ran but reported failure.
    #[error("{program} {action} failed: {status}")]
    Tool {
        program: String,
        action: &'static str,
        status: String,
    },

    /// The tool's export output was not the expected YAML.
    #[error("cannot unmarshal YAML output of {expr:?}: {message}")]
    Parse { expr: String, message: String },

    #[error("cannot marshal {what}: {message}")]
    Serialize { what: String, message: String },

    #[error("corpus store I/O error: {0}")]
    Io(String),

    /// Run labels name generated files, so they are kept to a safe alphabet.
    #[error("label {0:?} must be non-empty and contain only [A-Za-z0-9_-]")]
    InvalidLabel(String),
}

impl From<io::Error> for StoreError {
    fn from(err: io::Error) -> Self {
        StoreError::Io(err.to_string())
    }
}

pub fn validate_label(label: &str) -> Result<(), StoreError> {
    let valid = !label.is_empty()
        && label
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'_' || b == b'-');
    if valid {
        Ok(())
    } else {
        Err(StoreError::InvalidLabel(label.to_string()))
    }
}

/// Wraps a value in nested single-entry maps, outermost key first.
struct Nest<'a, T> {
    path: &'a [&'a str],
    inner: &'a T,
}

impl<T: Serialize> Serialize for Nest<'_, T> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self.path.split_first() {
            None => self.inner.serialize(serializer),
            Some((key, rest)) => {
                let mut map = serializer.serialize_map(Some(1))?;
                map.serialize_entry(
                    key,
                    &Nest {
                        path: rest,
                        inner: self.inner,
                    },
                )?;
                map.end()
            }
        }
    }
}

/// A corpus directory managed by an external schema tool such as `cue`.
///
/// Reads run `<program> export -e <expr> --out=yaml` inside the directory.
/// Writes pipe YAML into `<program> import -f -o=<file> -p=<package> yaml: -`.
/// Every written file ends in `-generated.<extension>`, so hand-written
/// fixtures are never touched.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CorpusStore {
    dir: PathBuf,
    program: String,
    package: String,
    extension: String,
}

impl CorpusStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self::with_settings(dir, &StoreSettings::default())
    }

    pub fn with_settings(dir: impl Into<PathBuf>, settings: &StoreSettings) -> Self {
        CorpusStore {
            dir: dir.into(),
            program: settings.program.clone(),
            package: settings.package.clone(),
            extension: settings.extension.clone(),
        }
    }

    /// The store for this run, or `None` (with a warning) when no corpus
    /// directory is configured.
    pub fn resolve(settings: &StoreSettings) -> Option<Self> {
        match settings.resolve_corpus_dir() {
            Some(dir) => Some(Self::with_settings(dir, settings)),
            None => {
                warn!(
                    "no ${} set; not writing line-protocol corpus files",
                    settings.corpus_dir_env
                );
                None
            }
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn generated_path(&self, prefix: &str) -> PathBuf {
        self.dir
            .join(format!("{prefix}-generated.{}", self.extension))
    }

    pub fn read_corpus(&self) -> Result<Corpus, StoreError> {
        self.export("corpus")
    }

    pub fn read_results(&self) -> Result<Results, StoreError> {
        self.export("results")
    }

    /// Writes `results-decode-generated` and `results-encode-generated`.
    ///
    /// Both documents are serialized before either file is touched. The two
    /// imports are separate tool runs, so if the second fails the decode
    /// file has already been replaced.
    pub fn write_results(&self, results: &Results) -> Result<(), StoreError> {
        let decode = nested("results-decode", &["results", "decode"], &results.decode)?;
        let encode = nested("results-encode", &["results", "encode"], &results.encode)?;
        self.import("results-decode", &decode)?;
        self.import("results-encode", &encode)
    }

    /// Writes the inputs observed during a run under `label`.
    pub fn write_observed(&self, label: &str, observed: &ObservedInputs) -> Result<(), StoreError> {
        validate_label(label)?;
        let decode_prefix = format!("inputs-decode-{label}");
        let encode_prefix = format!("inputs-encode-{label}");
        let decode = nested(&decode_prefix, &["inputs", "decode", label], &observed.decode)?;
        let encode = nested(&encode_prefix, &["inputs", "encode", label], &observed.encode)?;
        self.import(&decode_prefix, &decode)?;
        self.import(&encode_prefix, &encode)
    }

    fn export<T: DeserializeOwned>(&self, expr: &str) -> Result<T, StoreError> {
        debug!(program = %self.program, dir = ?self.dir, expr, "exporting");
        let output = Command::new(&self.program)
            .args(["export", "-e", expr, "--out=yaml"])
            .current_dir(&self.dir)
            .stdin(Stdio::null())
            .stderr(Stdio::inherit())
            .output()
            .map_err(|source| StoreError::Spawn {
                program: self.program.clone(),
                source,
            })?;
        if !output.status.success() {
            return Err(StoreError::Tool {
                program: self.program.clone(),
                action: "export",
                status: output.status.to_string(),
            });
        }
        serde_yaml::from_slice(&output.stdout).map_err(|e| StoreError::Parse {
            expr: expr.to_string(),
            message: e.to_string(),
        })
    }

    fn import(&self, prefix: &str, data: &str) -> Result<(), StoreError> {
        let outfile = self.generated_path(prefix);
        let mut child = Command::new(&self.program)
            .arg("import")
            .arg("-f")
            .arg(format!("-o={}", outfile.display()))
            .arg(format!("-p={}", self.package))
            .args(["yaml:", "-"])
            .stdin(Stdio::piped())
            .stdout(Stdio::from(io::stderr()))
            .stderr(Stdio::inherit())
            .spawn()
            .map_err(|source| StoreError::Spawn {
                program: self.program.clone(),
                source,
            })?;
        let fed = match child.stdin.take() {
            Some(mut stdin) => stdin.write_all(data.as_bytes()),
            None => Ok(()),
        };
        let status = child.wait()?;
        if !status.success() {
            return Err(StoreError::Tool {
                program: self.program.clone(),
                action: "import",
                status: status.to_string(),
            });
        }
        fed?;
        info!(file = %outfile.display(), "wrote corpus data");
        Ok(())
    }
}

/// Serializes `value` wrapped in the mappings named by `path`.
fn nested<T: Serialize>(prefix: &str, path: &[&str], value: &T) -> Result<String, StoreError> {
    serde_yaml::to_string(&Nest { path, inner: value }).map_err(|e| StoreError::Serialize {
        what: prefix.to_string(),
        message: e.to_string(),
    })
}

/// Ends a run and writes the inputs it recorded when there is a store to
/// write them to. The recorded inputs are returned whether or not the write
/// succeeded.
pub fn finish_run(
    ctx: RunContext,
    store: Option<&CorpusStore>,
) -> (ObservedInputs, Result<(), StoreError>) {
    let label = ctx.label().to_string();
    let recording = ctx.is_recording();
    let observed = ctx.finish();
    let written = match store {
        Some(store) if recording => store.write_observed(&label, &observed),
        Some(_) => Ok(()),
        None => {
            debug!(label = %label, "no corpus store; observed inputs not written");
            Ok(())
        }
    };
    (observed, written)
}
