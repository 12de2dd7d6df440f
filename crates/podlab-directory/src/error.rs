use thiserror::Error;

#[derive(Debug, Error)]
pub enum DirectoryError {
    /// Token acquisition failed. Nothing else can succeed after this.
    #[error("authentication failed: {0}")]
    Auth(String),

    #[error("transport error on {url}: {source}")]
    Transport {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    /// Error envelope returned by the service.
    #[error("directory error {code}: {message}")]
    Api { code: String, message: String },

    /// Throttling or a gateway error that outlived the retry budget.
    #[error("transient service error ({status}): {message}")]
    Transient { status: u16, message: String },

    #[error("unexpected response shape from {url}: {message}")]
    Decode { url: String, message: String },
}

impl DirectoryError {
    /// The object (or membership, or activation) already exists. Callers
    /// treat this as idempotent success, never as a failure.
    pub fn is_conflict(&self) -> bool {
        match self {
            DirectoryError::Api { code, message } => {
                code.eq_ignore_ascii_case("Conflict")
                    || code.eq_ignore_ascii_case("Request_MultipleObjectsWithSameKeyValue")
                    || message.contains("already exist")
                    || message.contains("conflicting object")
            }
            _ => false,
        }
    }

    pub fn is_not_found(&self) -> bool {
        match self {
            DirectoryError::Api { code, .. } => {
                code.eq_ignore_ascii_case("Request_ResourceNotFound")
                    || code.eq_ignore_ascii_case("ResourceNotFound")
                    || code.eq_ignore_ascii_case("NotFound")
            }
            _ => false,
        }
    }

    pub fn is_transient(&self) -> bool {
        matches!(self, DirectoryError::Transient { .. })
    }

    /// True for errors that doom the whole run rather than one student:
    /// failed authentication, or a directory that cannot be reached at all.
    pub fn is_fatal(&self) -> bool {
        match self {
            DirectoryError::Auth(_) => true,
            DirectoryError::Transport { source, .. } => source.is_connect(),
            _ => false,
        }
    }
}
