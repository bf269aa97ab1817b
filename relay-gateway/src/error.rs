/// Errors surfaced to the client-facing session layer. Infrastructure
/// failures (bus, presence store, queue) never appear here; those are
/// logged and the real-time path continues.
#[derive(Debug, PartialEq, Eq)]
pub enum GatewayError {
    /// Admission denied by the rate governor.
    RateLimited { retry_after_secs: u64 },
    /// Malformed or unauthorized request, dropped with no side effects.
    Validation(String),
}

impl std::fmt::Display for GatewayError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            GatewayError::RateLimited { retry_after_secs } => {
                write!(f, "rate limited, retry after {retry_after_secs}s")
            }
            GatewayError::Validation(reason) => write!(f, "invalid request: {reason}"),
        }
    }
}

impl std::error::Error for GatewayError {}
