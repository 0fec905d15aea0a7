use std::time::Duration;

/// Failures reported by a browser page primitive.
#[derive(Debug, Clone, thiserror::Error)]
pub enum PageError {
    #[error("no element matches selector '{selector}'")]
    ElementNotFound { selector: String },

    #[error("timed out after {0:?}")]
    Timeout(Duration),

    #[error("navigation to {url} failed: {reason}")]
    Navigation { url: String, reason: String },

    #[error("script error: {0}")]
    Script(String),

    /// The tab or the browser behind it is gone. The loop treats this as fatal.
    #[error("page closed: {0}")]
    Closed(String),

    #[error("browser error: {0}")]
    Browser(String),
}

impl PageError {
    pub fn is_closed(&self) -> bool {
        matches!(self, PageError::Closed(_))
    }
}

/// Failures of a single executed action. These are fed back to the model,
/// never surfaced to the caller.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ActionError {
    #[error("{action} requires '{field}'")]
    MissingField {
        action: &'static str,
        field: &'static str,
    },

    #[error("{action} on '{selector}' failed: {source}")]
    Page {
        action: &'static str,
        selector: String,
        #[source]
        source: PageError,
    },

    #[error("{action} on '{selector}' timed out after {timeout:?}")]
    Timeout {
        action: &'static str,
        selector: String,
        timeout: Duration,
    },

    #[error("no {0} file is available to upload")]
    NoFile(&'static str),
}

impl ActionError {
    /// The underlying page error, if the failure came from the browser.
    pub fn page_error(&self) -> Option<&PageError> {
        match self {
            ActionError::Page { source, .. } => Some(source),
            _ => None,
        }
    }
}

/// Failures of one decision request.
#[derive(Debug, thiserror::Error)]
pub enum DecisionError {
    /// The model answered, but not with a usable action.
    #[error("could not decode model output: {reason}")]
    Decode { reason: String, raw: String },

    #[error("decision transport error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("decision API error ({status}): {message}")]
    Api { status: u16, message: String },
}

impl DecisionError {
    pub fn is_decode(&self) -> bool {
        matches!(self, DecisionError::Decode { .. })
    }
}

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("browser launch failed: {0}")]
    Launch(String),

    #[error("could not open page: {0}")]
    Page(#[from] PageError),
}

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("checkpoint {0} not found")]
    NotFound(String),

    #[error("checkpoint {0} already responded")]
    AlreadyResponded(String),
}
