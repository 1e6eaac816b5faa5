use crate::binary::Bytes;
use crate::metric::Metric;
use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// What one implementation produced for one input: a result or an error.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Output<T> {
    Success(T),
    Failure(String),
}

pub type DecodeOutput = Output<Metric>;
pub type EncodeOutput = Output<Bytes>;

/// Stands in for an empty error message, which could not be read back.
pub const UNKNOWN_ERROR: &str = "unknown error";

impl<T> Output<T> {
    pub fn failure(message: impl Into<String>) -> Self {
        let message = message.into();
        if message.is_empty() {
            Output::Failure(UNKNOWN_ERROR.to_string())
        } else {
            Output::Failure(message)
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Output::Success(_))
    }

    pub fn result(&self) -> Option<&T> {
        match self {
            Output::Success(result) => Some(result),
            Output::Failure(_) => None,
        }
    }

    pub fn error(&self) -> Option<&str> {
        match self {
            Output::Success(_) => None,
            Output::Failure(message) => Some(message),
        }
    }
}

impl<T: PartialEq> Output<T> {
    /// Two outputs agree if both succeeded with equal results or both failed.
    /// Error messages are not compared.
    pub fn equivalent(&self, other: &Output<T>) -> bool {
        match (self, other) {
            (Output::Success(a), Output::Success(b)) => a == b,
            (Output::Failure(_), Output::Failure(_)) => true,
            _ => false,
        }
    }
}

impl<T> From<Result<T, String>> for Output<T> {
    fn from(result: Result<T, String>) -> Self {
        match result {
            Ok(value) => Output::Success(value),
            Err(message) => Output::failure(message),
        }
    }
}

#[derive(Serialize)]
struct OutputRef<'a, T> {
    #[serde(skip_serializing_if = "Option::is_none")]
    result: Option<&'a T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<&'a str>,
}

#[derive(Deserialize)]
struct OwnedOutput<T> {
    result: Option<T>,
    error: Option<String>,
}

impl<T: Serialize> Serialize for Output<T> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        OutputRef {
            result: self.result(),
            error: self.error(),
        }
        .serialize(serializer)
    }
}

impl<'de, T: Deserialize<'de>> Deserialize<'de> for Output<T> {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = OwnedOutput::<T>::deserialize(deserializer)?;
        match (raw.result, raw.error) {
            (Some(result), None) => Ok(Output::Success(result)),
            (None, Some(error)) if !error.is_empty() => Ok(Output::Failure(error)),
            (Some(_), Some(_)) => Err(D::Error::custom("output has both a result and an error")),
            _ => Err(D::Error::custom("output has neither a result nor an error")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn equivalence_ignores_error_text() {
        let a: DecodeOutput = Output::Failure("bad tag".into());
        let b: DecodeOutput = Output::Failure("unexpected end".into());
        assert!(a.equivalent(&b));
    }

    #[test]
    fn equivalence_compares_results_deeply() {
        let a: DecodeOutput = Output::Success(Metric::new("m", 1).with_field("f", 1i64));
        let b: DecodeOutput = Output::Success(Metric::new("m", 1).with_field("f", 1i64));
        let c: DecodeOutput = Output::Success(Metric::new("m", 1).with_field("f", 1u64));
        assert!(a.equivalent(&b));
        assert!(!a.equivalent(&c));
        assert!(!a.equivalent(&Output::Failure("x".into())));
        assert!(!Output::<Metric>::Failure("x".into()).equivalent(&a));
    }

    #[test]
    fn serializes_as_result_or_error() {
        let ok: EncodeOutput = Output::Success(Bytes::from("m f=1i 1\n"));
        let text = serde_yaml::to_string(&ok).unwrap();
        assert!(text.starts_with("result:"), "{text}");
        assert!(!text.contains("error"), "{text}");
        assert_eq!(serde_yaml::from_str::<EncodeOutput>(&text).unwrap(), ok);

        let failed: EncodeOutput = Output::Failure("no fields".into());
        let text = serde_yaml::to_string(&failed).unwrap();
        assert_eq!(text, "error: no fields\n");
        assert_eq!(serde_yaml::from_str::<EncodeOutput>(&text).unwrap(), failed);
    }

    #[test]
    fn rejects_ambiguous_documents() {
        assert!(serde_yaml::from_str::<EncodeOutput>("result: a\nerror: b\n").is_err());
        assert!(serde_yaml::from_str::<EncodeOutput>("{}").is_err());
        assert!(serde_yaml::from_str::<EncodeOutput>("error: ''\n").is_err());
    }

    #[test]
    fn empty_errors_are_replaced() {
        let failed: EncodeOutput = Err(String::new()).into();
        assert_eq!(failed, Output::Failure(UNKNOWN_ERROR.into()));
        let text = serde_yaml::to_string(&failed).unwrap();
        assert_eq!(serde_yaml::from_str::<EncodeOutput>(&text).unwrap(), failed);
        assert_eq!(
            Output::<Bytes>::failure("bad"),
            Output::Failure("bad".into())
        );
    }

    #[test]
    fn error_only_documents_need_no_result_default() {
        #[derive(Debug, PartialEq, Deserialize)]
        struct NoDefault(u8);

        let failed: Output<NoDefault> = serde_yaml::from_str("error: boom\n").unwrap();
        assert_eq!(failed, Output::Failure("boom".into()));
        let ok: Output<NoDefault> = serde_yaml::from_str("result: 3\n").unwrap();
        assert_eq!(ok, Output::Success(NoDefault(3)));
    }
}
