//! Error types with actionable diagnostics (Andon principle).
//!
//! Every fatal condition in the calibration pipeline maps to one variant
//! here. Messages carry enough context to fix the problem without reading
//! the source.

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for calibrar operations.
pub type Result<T> = std::result::Result<T, CalibrarError>;

/// Errors that can occur while calibrating, quantizing or evaluating a model.
#[derive(Error, Debug)]
pub enum CalibrarError {
    /// A configuration value is invalid. Raised before any computation starts.
    #[error("Invalid configuration value for '{field}': {message}\n  → {suggestion}")]
    Configuration { field: String, message: String, suggestion: String },

    /// Configuration file has invalid syntax.
    #[error("Invalid configuration syntax in {path}:\n  {message}\n  → Check YAML syntax at the indicated line")]
    ConfigParsing { path: PathBuf, message: String },

    /// Illegal accumulator transition, e.g. an update after finalize.
    #[error("Invalid estimator state: {message}\n  → Create a fresh estimator for every calibration run")]
    State { message: String },

    /// Quantization backend failure or a tensor without a calibrated range.
    #[error("Quantization failed: {message}{}", tensor_suffix(.tensor))]
    Quantization { message: String, tensor: Option<String> },

    /// Model file not found.
    #[error("Model file not found: {path}\n  → Check the model path or export the model first")]
    ModelNotFound { path: PathBuf },

    /// Tensor shape disagreement between model and data.
    #[error("Tensor shape mismatch: expected {expected:?}, got {actual:?}\n  → Check image_size and the model input dimension")]
    ShapeMismatch { expected: Vec<usize>, actual: Vec<usize> },

    /// Malformed dataset record.
    #[error("Invalid dataset record: {message}\n  → Each line must be a JSON object with a pixel column and a label column")]
    DatasetFormat { message: String },

    /// IO error with context.
    #[error("IO error: {context}\n  Cause: {source}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },

    /// Serialization/deserialization error.
    #[error("Serialization error: {message}")]
    Serialization { message: String },

    /// Run-level timeout, checked between shards.
    #[error("Calibration timed out after {elapsed_secs:.1}s (limit {limit_secs}s)\n  → Raise timeout_secs or reduce num_calibration_samples")]
    Timeout { elapsed_secs: f64, limit_secs: u64 },
}

fn tensor_suffix(tensor: &Option<String>) -> String {
    tensor.as_ref().map(|t| format!(" (tensor '{t}')")).unwrap_or_default()
}

impl CalibrarError {
    /// Create an IO error with context.
    pub fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io { context: context.into(), source }
    }

    /// Create a configuration error.
    pub fn config(
        field: impl Into<String>,
        message: impl Into<String>,
        suggestion: impl Into<String>,
    ) -> Self {
        Self::Configuration {
            field: field.into(),
            message: message.into(),
            suggestion: suggestion.into(),
        }
    }

    /// Create a state error.
    pub fn state(message: impl Into<String>) -> Self {
        Self::State { message: message.into() }
    }

    /// Create a quantization error not tied to a specific tensor.
    pub fn quantization(message: impl Into<String>) -> Self {
        Self::Quantization { message: message.into(), tensor: None }
    }

    /// Create a quantization error naming the offending tensor.
    pub fn missing_range(tensor: impl Into<String>) -> Self {
        Self::Quantization {
            message: "no calibrated range for a tensor referenced by the model graph".into(),
            tensor: Some(tensor.into()),
        }
    }

    /// Create a serialization error.
    pub fn serialization(message: impl Into<String>) -> Self {
        Self::Serialization { message: message.into() }
    }

    /// Check if this error is user-recoverable.
    pub fn is_user_error(&self) -> bool {
        matches!(
            self,
            Self::Configuration { .. }
                | Self::ConfigParsing { .. }
                | Self::ModelNotFound { .. }
                | Self::DatasetFormat { .. }
                | Self::Timeout { .. }
        )
    }

    /// Get the error code for structured output.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Configuration { .. } => "E001",
            Self::ConfigParsing { .. } => "E002",
            Self::State { .. } => "E010",
            Self::Quantization { .. } => "E020",
            Self::ModelNotFound { .. } => "E030",
            Self::ShapeMismatch { .. } => "E031",
            Self::DatasetFormat { .. } => "E040",
            Self::Io { .. } => "E050",
            Self::Serialization { .. } => "E051",
            Self::Timeout { .. } => "E060",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes_are_unique() {
        let errors = vec![
            CalibrarError::config("", "", ""),
            CalibrarError::ConfigParsing { path: "".into(), message: "".into() },
            CalibrarError::state(""),
            CalibrarError::quantization(""),
            CalibrarError::ModelNotFound { path: "".into() },
            CalibrarError::ShapeMismatch { expected: vec![], actual: vec![] },
            CalibrarError::DatasetFormat { message: "".into() },
            CalibrarError::io("", std::io::Error::other("x")),
            CalibrarError::serialization(""),
            CalibrarError::Timeout { elapsed_secs: 0.0, limit_secs: 0 },
        ];

        let codes: Vec<_> = errors.iter().map(|e| e.code()).collect();
        let unique: std::collections::HashSet<_> = codes.iter().collect();
        assert_eq!(unique.len(), codes.len());
    }

    #[test]
    fn test_user_errors_are_recoverable() {
        assert!(CalibrarError::config("num_calibration_shards", "0", "use 1").is_user_error());
        assert!(!CalibrarError::state("update after finalize").is_user_error());
        assert!(!CalibrarError::quantization("backend crashed").is_user_error());
    }

    #[test]
    fn test_missing_range_names_tensor() {
        let msg = CalibrarError::missing_range("layers.1.output").to_string();
        assert!(msg.contains("layers.1.output"));
        assert!(msg.starts_with("Quantization failed"));
    }

    #[test]
    fn test_quantization_without_tensor_has_no_suffix() {
        let msg = CalibrarError::quantization("disk full").to_string();
        assert_eq!(msg, "Quantization failed: disk full");
    }

    #[test]
    fn test_config_error_includes_suggestion() {
        let err = CalibrarError::config(
            "num_calibration_shards",
            "must be between 1 and 100, got 0",
            "Use 1 shard unless memory is tight",
        );
        let msg = err.to_string();
        assert!(msg.contains("num_calibration_shards"));
        assert!(msg.contains("got 0"));
        assert!(msg.contains("Use 1 shard"));
    }

    #[test]
    fn test_io_error_constructor() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let err = CalibrarError::io("reading config", io_err);

        assert!(matches!(err, CalibrarError::Io { .. }));
        assert!(err.to_string().contains("reading config"));
    }

    #[test]
    fn test_timeout_message_mentions_limit() {
        let err = CalibrarError::Timeout { elapsed_secs: 12.34, limit_secs: 10 };
        let msg = err.to_string();
        assert!(msg.contains("12.3"));
        assert!(msg.contains("limit 10s"));
    }
}
