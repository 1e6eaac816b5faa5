pub mod binary;
pub mod codec;
pub mod command;
pub mod config;
pub mod corpus;
pub mod driver;
pub mod input;
pub mod metric;
pub mod observed;
pub mod oracle;
pub mod output;
pub mod store;
pub mod value;

pub use binary::Bytes;
pub use codec::{CodecError, Decoder, Encoder, Outcome, Registry, RegistryError};
pub use command::CommandCodec;
pub use config::{ConfigError, HarnessConfig};
pub use corpus::{Corpus, DecodeResults, EncodeResults, Results};
pub use driver::Harness;
pub use input::{CodecInput, DEFAULT_TIME, DecodeInput, EncodeInput, Precision, PrecisionError};
pub use metric::{Field, Metric, Tag};
pub use observed::{ObservedInputs, RunContext};
pub use oracle::{DifferentialOracle, Evaluation, Inconsistency, Priority};
pub use output::{DecodeOutput, EncodeOutput, Output};
pub use store::{CorpusStore, StoreError};
pub use value::{Value, ValueKind};
