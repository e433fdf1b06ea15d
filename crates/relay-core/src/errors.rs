use crate::ids::UserId;

/// Typed error hierarchy for the routing pipeline.
///
/// Every variant is locally contained: the owning worker pool logs it and
/// moves on. Only an uncommitted queue unit is ever retried (by redelivery).
#[derive(Clone, Debug, thiserror::Error)]
pub enum RelayError {
    #[error("decode error: {0}")]
    Decode(String),
    #[error("no dispatcher available for {0}")]
    RoutingUnavailable(UserId),
    #[error("no dispatcher session for {0}")]
    SessionMissing(UserId),
    #[error("no client session for {0}")]
    DeliveryMissing(UserId),
    #[error("publish failed: {0}")]
    PublishFailure(String),
    #[error("processing failed: {0}")]
    ProcessingFailure(String),
    #[error("unknown request type {0}")]
    UnknownRequestType(u16),
    #[error("worker pool {0} rejected task")]
    PoolRejected(String),
}

impl RelayError {
    /// Short classification string for logging/metrics.
    pub fn error_kind(&self) -> &'static str {
        match self {
            Self::Decode(_) => "decode",
            Self::RoutingUnavailable(_) => "routing_unavailable",
            Self::SessionMissing(_) => "session_missing",
            Self::DeliveryMissing(_) => "delivery_missing",
            Self::PublishFailure(_) => "publish_failure",
            Self::ProcessingFailure(_) => "processing_failure",
            Self::UnknownRequestType(_) => "unknown_request_type",
            Self::PoolRejected(_) => "pool_rejected",
        }
    }

    /// Whether a queue unit that failed with this error should stay
    /// uncommitted so the queue redelivers it.
    pub fn is_redeliverable(&self) -> bool {
        matches!(self, Self::ProcessingFailure(_) | Self::PublishFailure(_))
    }
}

impl From<serde_json::Error> for RelayError {
    fn from(e: serde_json::Error) -> Self {
        RelayError::Decode(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_kind_strings() {
        assert_eq!(RelayError::Decode("x".into()).error_kind(), "decode");
        assert_eq!(
            RelayError::RoutingUnavailable(UserId::from_raw("u")).error_kind(),
            "routing_unavailable"
        );
        assert_eq!(
            RelayError::SessionMissing(UserId::from_raw("u")).error_kind(),
            "session_missing"
        );
        assert_eq!(RelayError::UnknownRequestType(99).error_kind(), "unknown_request_type");
        assert_eq!(RelayError::PoolRejected("p".into()).error_kind(), "pool_rejected");
    }

    #[test]
    fn only_processing_and_publish_failures_are_redeliverable() {
        assert!(RelayError::ProcessingFailure("boom".into()).is_redeliverable());
        assert!(RelayError::PublishFailure("full".into()).is_redeliverable());
        assert!(!RelayError::Decode("bad".into()).is_redeliverable());
        assert!(!RelayError::DeliveryMissing(UserId::from_raw("u")).is_redeliverable());
    }

    #[test]
    fn json_errors_become_decode_errors() {
        let err = serde_json::from_str::<serde_json::Value>("{nope").unwrap_err();
        let relay: RelayError = err.into();
        assert!(matches!(relay, RelayError::Decode(_)));
    }

    #[test]
    fn display_includes_user() {
        let err = RelayError::DeliveryMissing(UserId::from_raw("carol"));
        assert_eq!(err.to_string(), "no client session for carol");
    }
}
