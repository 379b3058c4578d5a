use thiserror::Error;

/// Errors raised while decoding or encoding stanzas at the harness boundary.
#[derive(Debug, Error)]
pub enum CodecError {
    #[error("failed to parse stanza: {0}")]
    ParseFailed(String),

    #[error("failed to serialize stanza: {0}")]
    SerializeFailed(String),
}

/// Error returned by a registered stanza handler.
///
/// Handler failures are never swallowed by the dispatch path: the registry
/// returns them to whoever drove the dispatch, and an interception chain
/// re-raises its delegate's failure after its own observation has run.
#[derive(Debug, Clone, Error)]
pub enum HandlerError {
    #[error("handler failed to process <{stanza}/> stanza: {details}")]
    Failed { stanza: String, details: String },
}

impl HandlerError {
    pub fn failed(stanza: &crate::stanza::Stanza, details: impl Into<String>) -> Self {
        Self::Failed {
            stanza: stanza.name().to_string(),
            details: details.into(),
        }
    }
}
