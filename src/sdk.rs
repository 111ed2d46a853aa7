//! Seam between the proxy and the external telemetry SDK.

use std::sync::Arc;

use async_trait::async_trait;
use once_cell::sync::OnceCell;

use crate::config::MergedConfig;
use crate::error::TelemetryResult;
use crate::properties::TelemetryProps;

/// A loaded telemetry client.
///
/// Call shapes follow the SDK: metrics and dependencies take no custom
/// properties. Methods may block on network I/O; the proxy always calls them
/// from the blocking pool.
pub trait TelemetryClient: Send + Sync {
    fn track_page_view(
        &self,
        page_view: TelemetryProps,
        custom_properties: Option<TelemetryProps>,
    ) -> TelemetryResult<()>;

    fn track_exception(
        &self,
        exception: TelemetryProps,
        custom_properties: Option<TelemetryProps>,
    ) -> TelemetryResult<()>;

    fn track_event(
        &self,
        event: TelemetryProps,
        custom_properties: Option<TelemetryProps>,
    ) -> TelemetryResult<()>;

    fn track_metric(&self, metric: TelemetryProps) -> TelemetryResult<()>;

    fn track_trace(
        &self,
        trace: TelemetryProps,
        custom_properties: Option<TelemetryProps>,
    ) -> TelemetryResult<()>;

    fn track_dependency_data(&self, dependency: TelemetryProps) -> TelemetryResult<()>;

    /// Send everything the client has buffered now instead of on its timer.
    fn flush(&self) -> TelemetryResult<()>;
}

/// SDK constructor: builds a client from merged configuration and runs its
/// asynchronous load step.
#[async_trait]
pub trait Sdk: Send + Sync {
    async fn load(&self, config: MergedConfig) -> TelemetryResult<Arc<dyn TelemetryClient>>;
}

static AMBIENT_SDK: OnceCell<Arc<dyn Sdk>> = OnceCell::new();

/// Make an SDK available process-wide, the way a loader script would.
///
/// Must happen before any proxy initializes from the ambient slot. Returns
/// `false` if an SDK was already registered; the first one stays.
pub fn register_sdk(sdk: Arc<dyn Sdk>) -> bool {
    AMBIENT_SDK.set(sdk).is_ok()
}

pub fn ambient_sdk() -> Option<Arc<dyn Sdk>> {
    AMBIENT_SDK.get().cloned()
}
