use thiserror::Error;

/// Errors raised by a telemetry client or by the proxy plumbing around it.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TelemetryError {
    #[error("Failed to send telemetry: {0}")]
    SendError(String),
    #[error("Failed to load telemetry SDK: {0}")]
    LoadError(String),
    #[error("No async runtime available: {0}")]
    RuntimeError(String),
}

pub type TelemetryResult<T> = Result<T, TelemetryError>;

/// Reasons the instance future can reject.
///
/// Every variant is terminal for the proxy that observed it. The type is
/// `Clone` because the same rejection is handed to every waiting dispatch.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum InitError {
    #[error("Error fetching config.json: {0}")]
    ConfigFetch(String),
    #[error("Error parsing config.json: {0}")]
    ConfigParse(String),
    #[error("Telemetry SDK is not yet loaded")]
    SdkNotLoaded,
    #[error("Instrumentation key is not set for this environment, without it telemetry will not work")]
    MissingInstrumentationKey,
    #[error(transparent)]
    SdkLoad(#[from] TelemetryError),
}

/// Why a single tracking call was dropped. Never surfaced to the caller.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DispatchError {
    #[error("telemetry instance unavailable: {0}")]
    Unavailable(#[from] InitError),
    #[error("unknown telemetry operation '{0}'")]
    UnknownOperation(String),
    #[error("telemetry client call failed: {0}")]
    Client(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sdk_failure_converts_into_init_error() {
        let err: InitError = TelemetryError::LoadError("boom".into()).into();
        assert_eq!(err.to_string(), "Failed to load telemetry SDK: boom");
    }

    #[test]
    fn init_error_wraps_into_dispatch_error() {
        let err: DispatchError = InitError::SdkNotLoaded.into();
        assert!(matches!(
            err,
            DispatchError::Unavailable(InitError::SdkNotLoaded)
        ));
    }
}
