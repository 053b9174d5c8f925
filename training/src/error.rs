use thiserror::Error;

/// Errors raised by the classifier and the model-selection helpers.
#[derive(Error, Debug)]
pub enum ClassifierError {
    #[error("This classifier instance is not fitted yet")]
    NotFitted,

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Model error: {0}")]
    Model(#[from] anyhow::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

impl From<serde_json::Error> for ClassifierError {
    fn from(err: serde_json::Error) -> Self {
        ClassifierError::InvalidConfig(err.to_string())
    }
}

impl From<matrix::MatrixError> for ClassifierError {
    fn from(err: matrix::MatrixError) -> Self {
        ClassifierError::InvalidInput(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_messages() {
        assert_eq!(
            ClassifierError::NotFitted.to_string(),
            "This classifier instance is not fitted yet"
        );
        let err = ClassifierError::from(anyhow::anyhow!("bad batch"));
        assert!(matches!(err, ClassifierError::Model(_)));
        assert_eq!(err.to_string(), "Model error: bad batch");
    }
}
