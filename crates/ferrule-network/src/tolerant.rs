//! Tolerant strategies

use ferrule_core::{Request, Response, RpcError, RpcResult, TolerantStrategyKind};
use tracing::warn;

/// Final handling of a call that failed after retries
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TolerantStrategy {
    /// Re-raise the error
    FailFast,
    /// Log the error and complete with an empty response
    FailSafe,
}

impl TolerantStrategy {
    /// Strategy for a configuration key
    pub fn from_kind(kind: TolerantStrategyKind) -> Self {
        match kind {
            TolerantStrategyKind::FailFast => TolerantStrategy::FailFast,
            TolerantStrategyKind::FailSafe => TolerantStrategy::FailSafe,
        }
    }

    /// Turn a failed call into its outcome
    pub fn handle(&self, request: &Request, error: RpcError) -> RpcResult<Response> {
        match self {
            TolerantStrategy::FailFast => Err(RpcError::CallFailed(Box::new(error))),
            TolerantStrategy::FailSafe => {
                warn!(
                    service = %request.service_name,
                    method = %request.method_name,
                    error = %error,
                    "Call failed, returning empty response"
                );
                Ok(Response::empty())
            }
        }
    }
}

impl Default for TolerantStrategy {
    fn default() -> Self {
        TolerantStrategy::FailFast
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fail_fast_reraises() {
        let request = Request::new("UserService", "get_user");
        let err = TolerantStrategy::FailFast
            .handle(&request, RpcError::Transport("refused".to_string()))
            .unwrap_err();

        match err {
            RpcError::CallFailed(inner) => assert!(matches!(*inner, RpcError::Transport(_))),
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[test]
    fn test_fail_safe_returns_empty() {
        let request = Request::new("UserService", "get_user");
        let response = TolerantStrategy::from_kind(TolerantStrategyKind::FailSafe)
            .handle(&request, RpcError::Discovery("none".to_string()))
            .unwrap();

        assert_eq!(response, Response::empty());
        assert!(!response.is_error());
    }
}
