use thiserror::Error;

/// Crate-wide fatal error type. Every kind aborts the run; the phasing
/// engine never retries and never throws for missing genotype data.
#[derive(Error, Debug)]
pub enum PhaseError {
    #[error("{0}")]
    Usage(String),

    #[error("{file}: {msg}{}", line.map(|l| format!(" (line {})", l)).unwrap_or_default())]
    Format {
        file: String,
        line: Option<u64>,
        msg: String,
    },

    #[error("{0}")]
    DataConsistency(String),

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("internal invariant violated: {0}")]
    Invariant(String),
}

impl PhaseError {
    pub fn format(file: impl Into<String>, line: Option<u64>, msg: impl Into<String>) -> Self {
        PhaseError::Format {
            file: file.into(),
            line,
            msg: msg.into(),
        }
    }
}
