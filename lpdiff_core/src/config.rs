use crate::codec::{Registry, RegistryError};
use crate::command::CommandCodec;
use crate::input::{DEFAULT_TIME, DecodeInput, Precision};
use crate::store::{StoreError, validate_label};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, warn};

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("codec {0:?} has an empty command")]
    EmptyCommand(String),
    #[error("codec {0:?} declares no operations")]
    NoOperations(String),
    #[error("invalid run label: {0}")]
    Label(#[from] StoreError),
    #[error(transparent)]
    Registry(#[from] RegistryError),
}

#[derive(Deserialize, Debug, Clone, Default, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum ConfigInputDelivery {
    #[default]
    StdIn,
    File {
        template: String,
    },
}

/// Which side of the registry a command codec is registered on.
#[derive(Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "kebab-case")]
pub enum Operation {
    Decode,
    Encode,
}

impl Operation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Operation::Decode => "decode",
            Operation::Encode => "encode",
        }
    }
}

/// An implementation that lives in another process.
#[derive(Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
#[serde(deny_unknown_fields)]
pub struct CodecSettings {
    pub name: String,
    pub command: Vec<String>,
    #[serde(default)]
    pub input_delivery: ConfigInputDelivery,
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    pub working_dir: Option<PathBuf>,
    #[serde(default = "default_operations")]
    pub operations: Vec<Operation>,
}

fn default_timeout_ms() -> u64 {
    2000
}

fn default_operations() -> Vec<Operation> {
    vec![Operation::Decode, Operation::Encode]
}

#[derive(Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
#[serde(deny_unknown_fields)]
pub struct RunSettings {
    /// Names the generated inputs files written at the end of a run.
    #[serde(default = "default_label")]
    pub label: String,
    #[serde(default = "default_time")]
    pub default_time: i64,
    #[serde(default)]
    pub precision: Precision,
    #[serde(default)]
    pub record_inputs: bool,
    /// When set, only these implementations take part.
    #[serde(default)]
    pub implementations: Option<Vec<String>>,
}

pub fn default_label() -> String {
    "lpdiff".to_string()
}

fn default_time() -> i64 {
    DEFAULT_TIME
}

impl Default for RunSettings {
    fn default() -> Self {
        Self {
            label: default_label(),
            default_time: default_time(),
            precision: Precision::default(),
            record_inputs: false,
            implementations: None,
        }
    }
}

impl RunSettings {
    /// A decode input for raw `text` using this run's time settings.
    pub fn decode_input(&self, text: &[u8]) -> DecodeInput {
        DecodeInput {
            text: text.into(),
            default_time: self.default_time,
            precision: self.precision,
        }
    }
}

#[derive(Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
#[serde(deny_unknown_fields)]
pub struct StoreSettings {
    #[serde(default = "default_program")]
    pub program: String,
    #[serde(default = "default_package")]
    pub package: String,
    #[serde(default = "default_extension")]
    pub extension: String,
    #[serde(default = "default_corpus_dir_env")]
    pub corpus_dir_env: String,
    pub corpus_dir: Option<PathBuf>,
}

fn default_program() -> String {
    "cue".to_string()
}

fn default_package() -> String {
    "lpcorpus".to_string()
}

fn default_extension() -> String {
    "cue".to_string()
}

fn default_corpus_dir_env() -> String {
    "CORPUS".to_string()
}

impl Default for StoreSettings {
    fn default() -> Self {
        Self {
            program: default_program(),
            package: default_package(),
            extension: default_extension(),
            corpus_dir_env: default_corpus_dir_env(),
            corpus_dir: None,
        }
    }
}

impl StoreSettings {
    /// The corpus directory for this run: the environment variable first,
    /// then the configured fallback.
    pub fn resolve_corpus_dir(&self) -> Option<PathBuf> {
        self.resolve_corpus_dir_with(|key| std::env::var_os(key))
    }

    fn resolve_corpus_dir_with(
        &self,
        lookup: impl Fn(&str) -> Option<std::ffi::OsString>,
    ) -> Option<PathBuf> {
        if let Some(dir) = lookup(self.corpus_dir_env.as_str()).filter(|dir| !dir.is_empty()) {
            return Some(PathBuf::from(dir));
        }
        self.corpus_dir.clone()
    }
}

#[derive(Deserialize, Debug, Clone, Default, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
#[serde(deny_unknown_fields)]
pub struct HarnessConfig {
    #[serde(default)]
    pub run: RunSettings,
    #[serde(default)]
    pub store: StoreSettings,
    #[serde(default)]
    pub codecs: Vec<CodecSettings>,
}

impl HarnessConfig {
    pub fn load_from_file(path: &Path) -> Result<Self, anyhow::Error> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| anyhow::anyhow!("Failed to read config file at {:?}: {}", path, e))?;

        let config: HarnessConfig = toml::from_str(&content).map_err(|e| {
            anyhow::anyhow!("Failed to parse TOML from config file {:?}: {}", path, e)
        })?;

        config
            .validate()
            .map_err(|e| anyhow::anyhow!("Invalid config file {:?}: {}", path, e))?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_label(&self.run.label)?;
        for codec in &self.codecs {
            if codec.command.is_empty() {
                return Err(ConfigError::EmptyCommand(codec.name.clone()));
            }
            if codec.operations.is_empty() {
                return Err(ConfigError::NoOperations(codec.name.clone()));
            }
        }
        Ok(())
    }

    /// Adds every configured command codec to `registry`, then applies the
    /// implementation allow-list.
    pub fn build_registry(&self, mut registry: Registry) -> Result<Registry, ConfigError> {
        self.validate()?;
        for settings in &self.codecs {
            let codec = CommandCodec::new(settings.clone());
            for operation in &settings.operations {
                match operation {
                    Operation::Decode => {
                        registry.register_decoder(settings.name.clone(), codec.clone())?
                    }
                    Operation::Encode => {
                        registry.register_encoder(settings.name.clone(), codec.clone())?
                    }
                }
                debug!(codec = %settings.name, operation = operation.as_str(), "registered command codec");
            }
        }
        if let Some(names) = &self.run.implementations {
            for name in names {
                if !registry.decoder_names().chain(registry.encoder_names()).any(|n| n == name) {
                    warn!(implementation = %name, "allow-listed implementation is not registered");
                }
            }
            registry.retain(names);
        }
        Ok(registry)
    }
}
