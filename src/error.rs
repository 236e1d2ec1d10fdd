use thiserror::Error;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("Config error: {0}")]
    Config(String),

    #[error("No input images found. Pass image paths or `--dir`.")]
    NoInputs,

    #[error("Report has no failed items to resubmit: {0}")]
    NothingToRetry(String),

    #[error("Image error: {0}")]
    Image(#[from] crate::conditioner::ConditionError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),
}

/// Classifies why a remote call or conditioning step failed.
///
/// The set is closed: the retry policy matches on it exhaustively.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    serde::Serialize,
    serde::Deserialize,
    clap::ValueEnum,
)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// Quota or QPS limit hit on the service side.
    RateLimited,
    /// Encoded image exceeds the service payload ceiling.
    PayloadTooLarge,
    /// Image resolution exceeds the service pixel ceiling.
    DimensionExceeded,
    /// Connection failure, timeout or gateway error.
    TransientNetwork,
    /// Bad credentials or an invalid/expired access token.
    AuthError,
    /// Anything the classifier does not recognise.
    Unclassified,
    /// Input could not be conditioned (undecodable, or still too large at the quality floor).
    Unrepairable,
}

impl FailureKind {
    /// Whether a timed retry can help (as opposed to a repair or nothing at all).
    pub fn is_transient(self) -> bool {
        matches!(self, FailureKind::RateLimited | FailureKind::TransientNetwork)
    }

    /// Whether re-conditioning the image with tighter limits can help.
    pub fn is_repairable(self) -> bool {
        matches!(
            self,
            FailureKind::PayloadTooLarge | FailureKind::DimensionExceeded
        )
    }
}

impl std::fmt::Display for FailureKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FailureKind::RateLimited => write!(f, "RateLimited"),
            FailureKind::PayloadTooLarge => write!(f, "PayloadTooLarge"),
            FailureKind::DimensionExceeded => write!(f, "DimensionExceeded"),
            FailureKind::TransientNetwork => write!(f, "TransientNetwork"),
            FailureKind::AuthError => write!(f, "AuthError"),
            FailureKind::Unclassified => write!(f, "Unclassified"),
            FailureKind::Unrepairable => write!(f, "Unrepairable"),
        }
    }
}
