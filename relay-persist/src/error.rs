/// Errors from the relational store.
///
/// `Unavailable` covers transient connectivity trouble and is retried by
/// the worker pool; `Query` is permanent and gets logged, never retried.
#[derive(Debug)]
pub enum StoreError {
    Unavailable(Box<dyn std::error::Error + Send + Sync>),
    Query(Box<dyn std::error::Error + Send + Sync>),
}

impl StoreError {
    pub fn unavailable(err: impl std::error::Error + Send + Sync + 'static) -> Self {
        StoreError::Unavailable(Box::new(err))
    }

    pub fn query(err: impl std::error::Error + Send + Sync + 'static) -> Self {
        StoreError::Query(Box::new(err))
    }

    /// Whether the worker pool should retry the task.
    pub fn is_transient(&self) -> bool {
        matches!(self, StoreError::Unavailable(_))
    }
}

impl std::fmt::Display for StoreError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StoreError::Unavailable(e) => write!(f, "store unavailable: {e}"),
            StoreError::Query(e) => write!(f, "store query failed: {e}"),
        }
    }
}

impl std::error::Error for StoreError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            StoreError::Unavailable(e) | StoreError::Query(e) => Some(e.as_ref()),
        }
    }
}
