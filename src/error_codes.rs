use std::fmt;

use anyhow::Error;
use serde::Serialize;
use serde_json::{json, Value};

use crate::driver::DriverError;
use crate::fit::FitError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CodedErrorKind {
    /// Bad arguments or scene configuration.
    Usage,
    /// Inputs the math cannot work with (zero-area sizes, NaN, ...).
    InvalidInput,
}

impl CodedErrorKind {
    /// Process exit status; 2 lines up with clap's own usage failures.
    pub fn exit_code(self) -> u8 {
        match self {
            Self::Usage => 2,
            Self::InvalidInput => 3,
        }
    }
}

#[derive(Debug, Clone)]
pub struct CodedError {
    pub code: &'static str,
    pub message: String,
    pub details: Option<Value>,
    pub kind: CodedErrorKind,
}

impl CodedError {
    pub fn usage(code: &'static str, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            details: None,
            kind: CodedErrorKind::Usage,
        }
    }

    pub fn invalid_input(code: &'static str, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            details: None,
            kind: CodedErrorKind::InvalidInput,
        }
    }

    pub fn with_details(mut self, details: Value) -> Self {
        self.details = Some(details);
        self
    }

    pub fn envelope(&self) -> ErrorEnvelope {
        ErrorEnvelope {
            ok: false,
            error: ErrorEnvelopeBody {
                code: self.code.to_owned(),
                message: self.message.clone(),
                details: self.details.clone(),
            },
        }
    }
}

impl fmt::Display for CodedError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.code, self.message)
    }
}

impl std::error::Error for CodedError {}

impl From<FitError> for CodedError {
    fn from(error: FitError) -> Self {
        let details = match error {
            FitError::InvalidDimensions {
                what,
                width,
                height,
            } => json!({ "subject": what, "width": width, "height": height }),
            FitError::InvalidAspectRatio(ratio) => json!({ "aspect_ratio": ratio }),
        };
        Self::invalid_input("INVALID_DIMENSIONS", error.to_string()).with_details(details)
    }
}

impl From<DriverError> for CodedError {
    fn from(error: DriverError) -> Self {
        match error {
            DriverError::InvalidWindow { width, height } => {
                Self::invalid_input("INVALID_DIMENSIONS", error.to_string())
                    .with_details(json!({ "subject": "window", "width": width, "height": height }))
            }
            other => Self::usage("INVALID_UNIFORM", other.to_string()),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ErrorEnvelope {
    pub ok: bool,
    pub error: ErrorEnvelopeBody,
}

#[derive(Debug, Clone, Serialize)]
pub struct ErrorEnvelopeBody {
    pub code: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<Value>,
}

pub fn find_coded_error(error: &Error) -> Option<&CodedError> {
    error
        .chain()
        .find_map(|cause| cause.downcast_ref::<CodedError>())
}

/// Exit status for a failed command; uncoded failures exit with 1.
pub fn exit_code_for(error: &Error) -> u8 {
    find_coded_error(error).map_or(1, |coded| coded.kind.exit_code())
}

/// Envelope for any error; uncoded failures are reported as `INTERNAL`.
pub fn envelope_for(error: &Error) -> ErrorEnvelope {
    match find_coded_error(error) {
        Some(coded) => coded.envelope(),
        None => ErrorEnvelope {
            ok: false,
            error: ErrorEnvelopeBody {
                code: "INTERNAL".to_owned(),
                message: format!("{error:#}"),
                details: None,
            },
        },
    }
}

#[cfg(test)]
mod tests {
    use anyhow::{anyhow, Context};

    use super::*;

    #[test]
    fn fit_errors_map_to_invalid_dimensions() {
        let coded = CodedError::from(FitError::InvalidDimensions {
            what: "viewport",
            width: 0.0,
            height: 10.0,
        });
        assert_eq!(coded.code, "INVALID_DIMENSIONS");
        assert_eq!(coded.kind, CodedErrorKind::InvalidInput);
        assert_eq!(coded.details.as_ref().unwrap()["subject"], "viewport");
    }

    #[test]
    fn coded_error_is_found_through_context() {
        let error = Err::<(), _>(anyhow!(CodedError::usage("INVALID_SIZE", "bad size")))
            .context("while parsing --image")
            .unwrap_err();
        let envelope = envelope_for(&error);
        assert!(!envelope.ok);
        assert_eq!(envelope.error.code, "INVALID_SIZE");
    }

    #[test]
    fn exit_code_follows_error_kind() {
        let usage = anyhow!(CodedError::usage("INVALID_FRAME", "frame 9 of 3"));
        let input = anyhow!(CodedError::from(FitError::InvalidAspectRatio(0.0)));
        assert_eq!(exit_code_for(&usage), 2);
        assert_eq!(exit_code_for(&input), 3);
        assert_eq!(exit_code_for(&anyhow!("boom")), 1);
    }

    #[test]
    fn uncoded_errors_are_internal() {
        let envelope = envelope_for(&anyhow!("disk on fire"));
        assert_eq!(envelope.error.code, "INTERNAL");
        assert!(envelope.error.message.contains("disk on fire"));
    }
}
