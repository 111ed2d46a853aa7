use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::DispatchError;
use crate::properties::TelemetryProps;

/// The six call shapes a telemetry client accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OperationKind {
    #[serde(rename = "trackPageView")]
    PageView,
    #[serde(rename = "trackException")]
    Exception,
    #[serde(rename = "trackEvent")]
    Event,
    #[serde(rename = "trackMetric")]
    Metric,
    #[serde(rename = "trackTrace")]
    Trace,
    #[serde(rename = "trackDependencyData")]
    DependencyData,
}

impl OperationKind {
    pub const ALL: [OperationKind; 6] = [
        OperationKind::PageView,
        OperationKind::Exception,
        OperationKind::Event,
        OperationKind::Metric,
        OperationKind::Trace,
        OperationKind::DependencyData,
    ];

    pub fn tag(self) -> &'static str {
        match self {
            OperationKind::PageView => "trackPageView",
            OperationKind::Exception => "trackException",
            OperationKind::Event => "trackEvent",
            OperationKind::Metric => "trackMetric",
            OperationKind::Trace => "trackTrace",
            OperationKind::DependencyData => "trackDependencyData",
        }
    }

    /// Whether the client method takes a second, custom-properties argument.
    pub fn accepts_custom_properties(self) -> bool {
        !matches!(self, OperationKind::Metric | OperationKind::DependencyData)
    }

    /// Number of positional arguments the client method takes.
    pub fn arity(self) -> usize {
        if self.accepts_custom_properties() {
            2
        } else {
            1
        }
    }

    /// Resolves a string tag, applying `policy` to tags outside the six.
    pub fn resolve(tag: &str, policy: UnknownTagPolicy) -> Result<Self, DispatchError> {
        match (tag.parse::<Self>(), policy) {
            (Ok(kind), _) => Ok(kind),
            (Err(_), UnknownTagPolicy::PageView) => Ok(OperationKind::PageView),
            (Err(err), UnknownTagPolicy::Reject) => Err(err),
        }
    }
}

impl FromStr for OperationKind {
    type Err = DispatchError;

    fn from_str(tag: &str) -> Result<Self, Self::Err> {
        OperationKind::ALL
            .into_iter()
            .find(|kind| kind.tag() == tag)
            .ok_or_else(|| DispatchError::UnknownOperation(tag.to_string()))
    }
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}

/// What to do with a string tag that names none of the six operations.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UnknownTagPolicy {
    /// Log a warning and drop the call.
    #[default]
    Reject,
    /// Legacy compatibility: treat the call as a page view. Older hosts relied
    /// on this fallthrough; opt in only when exact compatibility is needed.
    PageView,
}

/// One buffered telemetry call, consumed exactly once by the dispatcher.
#[derive(Debug, Clone, PartialEq)]
pub struct TrackingCall {
    pub operation: OperationKind,
    pub args: Vec<TelemetryProps>,
    pub issued_at: DateTime<Utc>,
}

impl TrackingCall {
    pub fn new(operation: OperationKind, args: Vec<TelemetryProps>) -> Self {
        Self {
            operation,
            args,
            issued_at: Utc::now(),
        }
    }

    pub(crate) fn with_custom(
        operation: OperationKind,
        payload: TelemetryProps,
        custom_properties: Option<TelemetryProps>,
    ) -> Self {
        let mut args = vec![payload];
        args.extend(custom_properties);
        Self::new(operation, args)
    }

    /// Splits the positional args into the primary payload and the optional
    /// custom properties. A missing primary payload becomes an empty object.
    pub fn into_parts(self) -> (OperationKind, TelemetryProps, Option<TelemetryProps>) {
        let mut args = self.args.into_iter();
        let payload = args.next().unwrap_or_default();
        (self.operation, payload, args.next())
    }
}
