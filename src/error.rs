use std::fmt;
use std::future::Future;
use std::time::Duration;
use thiserror::Error;

/// External collaborators whose failures are recovered locally.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Service {
    Completion,
    IntentClassifier,
    QueryExpansion,
    Embedder,
    Reranker,
    WebSearch,
    AnswerGenerator,
    ConversationStore,
    PermissionStore,
}

impl fmt::Display for Service {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Service::Completion => "question completion",
            Service::IntentClassifier => "intent classifier",
            Service::QueryExpansion => "query expansion",
            Service::Embedder => "embedder",
            Service::Reranker => "reranker",
            Service::WebSearch => "web search",
            Service::AnswerGenerator => "answer generator",
            Service::ConversationStore => "conversation store",
            Service::PermissionStore => "permission store",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Error)]
pub enum RetrievalError {
    #[error("{service} call failed: {reason}")]
    ExternalService { service: Service, reason: String },

    #[error("{service} timed out after {timeout:?}")]
    Timeout { service: Service, timeout: Duration },

    #[error("malformed {service} output: {detail}")]
    MalformedOutput { service: Service, detail: String },

    #[error("{corpus} index unavailable: {reason}")]
    IndexUnavailable { corpus: String, reason: String },

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("permission store: {0}")]
    Permission(String),
}

impl RetrievalError {
    pub fn external(service: Service, err: anyhow::Error) -> Self {
        RetrievalError::ExternalService {
            service,
            reason: format!("{err:#}"),
        }
    }

    pub fn malformed(service: Service, detail: impl Into<String>) -> Self {
        RetrievalError::MalformedOutput {
            service,
            detail: detail.into(),
        }
    }

    /// The collaborator responsible, if this is a recoverable external failure.
    pub fn service(&self) -> Option<Service> {
        match self {
            RetrievalError::ExternalService { service, .. }
            | RetrievalError::Timeout { service, .. }
            | RetrievalError::MalformedOutput { service, .. } => Some(*service),
            _ => None,
        }
    }
}

/// Run an external call under a wall-clock bound. Both the call's own error
/// and an elapsed timeout come back as a `RetrievalError`.
pub async fn bounded<T, F>(service: Service, timeout: Duration, call: F) -> Result<T, RetrievalError>
where
    F: Future<Output = anyhow::Result<T>>,
{
    match tokio::time::timeout(timeout, call).await {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(e)) => Err(RetrievalError::external(service, e)),
        Err(_) => Err(RetrievalError::Timeout { service, timeout }),
    }
}

/// A step's value, tagged with whether the documented fallback was used.
#[derive(Debug)]
pub enum Degraded<T> {
    Fresh(T),
    Fallback { value: T, cause: RetrievalError },
}

impl<T> Degraded<T> {
    pub fn value(&self) -> &T {
        match self {
            Degraded::Fresh(value) | Degraded::Fallback { value, .. } => value,
        }
    }

    pub fn into_value(self) -> T {
        match self {
            Degraded::Fresh(value) | Degraded::Fallback { value, .. } => value,
        }
    }

    pub fn cause(&self) -> Option<&RetrievalError> {
        match self {
            Degraded::Fresh(_) => None,
            Degraded::Fallback { cause, .. } => Some(cause),
        }
    }

    pub fn is_fallback(&self) -> bool {
        matches!(self, Degraded::Fallback { .. })
    }
}

/// Degrade-to-default combinator for fallible pipeline steps.
pub trait DegradeExt<T> {
    fn degrade_to(self, fallback: T) -> Degraded<T>;
    fn degrade_with<F: FnOnce() -> T>(self, fallback: F) -> Degraded<T>;
}

impl<T> DegradeExt<T> for Result<T, RetrievalError> {
    fn degrade_to(self, fallback: T) -> Degraded<T> {
        self.degrade_with(|| fallback)
    }

    fn degrade_with<F: FnOnce() -> T>(self, fallback: F) -> Degraded<T> {
        match self {
            Ok(value) => Degraded::Fresh(value),
            Err(cause) => {
                tracing::warn!("Falling back after error: {cause}");
                Degraded::Fallback {
                    value: fallback(),
                    cause,
                }
            }
        }
    }
}
