//! Deferred dispatch of telemetry calls.
//!
//! The SDK loads asynchronously but application code wants to track things
//! right away. Every entry point here returns immediately; the call itself is
//! spawned as a task that waits on the shared instance future and is routed to
//! the client once that resolves. There is no queue: each task waits on its
//! own, so calls issued before readiness are not lost, and calls issued after
//! a failed initialization are dropped with a warning.

use std::sync::Arc;

use chrono::Utc;
use futures::future::{BoxFuture, FutureExt, Shared};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::runtime::Handle;
use tokio::task::JoinSet;
use tracing::{debug, warn};

use crate::call::{OperationKind, TrackingCall, UnknownTagPolicy};
use crate::config::ProxyOptions;
use crate::error::{DispatchError, InitError, TelemetryError, TelemetryResult};
use crate::initializer::Initializer;
use crate::properties::TelemetryProps;
use crate::sdk::TelemetryClient;

/// Resolve-once future yielding the loaded client.
pub type PendingInstance =
    Shared<BoxFuture<'static, Result<Arc<dyn TelemetryClient>, InitError>>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProxyState {
    Initializing,
    Ready,
    Failed,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProxySettings {
    #[serde(default)]
    pub unknown_tags: UnknownTagPolicy,
}

pub struct TelemetryProxy {
    instance: PendingInstance,
    runtime: Handle,
    in_flight: Mutex<JoinSet<()>>,
    settings: ProxySettings,
}

impl TelemetryProxy {
    /// Starts initialization on the current Tokio runtime.
    pub fn new(initializer: Initializer, options: ProxyOptions) -> TelemetryResult<Self> {
        Self::with_settings(initializer, options, ProxySettings::default())
    }

    pub fn with_settings(
        initializer: Initializer,
        options: ProxyOptions,
        settings: ProxySettings,
    ) -> TelemetryResult<Self> {
        let runtime =
            Handle::try_current().map_err(|e| TelemetryError::RuntimeError(e.to_string()))?;

        let instance = async move {
            let result = initializer.initialize(options).await;
            if let Err(err) = &result {
                warn!(error = %err, "telemetry disabled, initialization failed");
            }
            result
        }
        .boxed()
        .shared();

        // Initialization runs even if nothing is ever tracked.
        runtime.spawn(instance.clone().map(drop));

        Ok(Self {
            instance,
            runtime,
            in_flight: Mutex::new(JoinSet::new()),
            settings,
        })
    }

    /// The raw instance future, for callers that need the client itself.
    pub fn instance(&self) -> PendingInstance {
        self.instance.clone()
    }

    pub fn state(&self) -> ProxyState {
        match self.instance.peek() {
            None => ProxyState::Initializing,
            Some(Ok(_)) => ProxyState::Ready,
            Some(Err(_)) => ProxyState::Failed,
        }
    }

    pub fn track_page_view(
        &self,
        page_view: TelemetryProps,
        custom_properties: Option<TelemetryProps>,
    ) {
        self.submit(TrackingCall::with_custom(
            OperationKind::PageView,
            page_view,
            custom_properties,
        ));
    }

    pub fn track_exception(
        &self,
        exception: TelemetryProps,
        custom_properties: Option<TelemetryProps>,
    ) {
        self.submit(TrackingCall::with_custom(
            OperationKind::Exception,
            exception,
            custom_properties,
        ));
    }

    pub fn track_event(&self, event: TelemetryProps, custom_properties: Option<TelemetryProps>) {
        self.submit(TrackingCall::with_custom(
            OperationKind::Event,
            event,
            custom_properties,
        ));
    }

    pub fn track_metric(&self, metric: TelemetryProps) {
        self.submit(TrackingCall::new(OperationKind::Metric, vec![metric]));
    }

    pub fn track_trace(&self, trace: TelemetryProps, custom_properties: Option<TelemetryProps>) {
        self.submit(TrackingCall::with_custom(
            OperationKind::Trace,
            trace,
            custom_properties,
        ));
    }

    pub fn track_dependency_data(&self, dependency: TelemetryProps) {
        self.submit(TrackingCall::new(
            OperationKind::DependencyData,
            vec![dependency],
        ));
    }

    /// String-tagged entry point for call sites that pick the operation at
    /// runtime. Tags outside the six are handled per [`ProxySettings`].
    pub fn track(&self, tag: &str, args: Vec<TelemetryProps>) {
        match OperationKind::resolve(tag, self.settings.unknown_tags) {
            Ok(operation) => {
                if args.len() > operation.arity() {
                    debug!(
                        %operation,
                        given = args.len(),
                        accepted = operation.arity(),
                        "ignoring extra telemetry arguments"
                    );
                }
                self.submit(TrackingCall::new(operation, args))
            }
            Err(err) => warn!(error = %err, "dropping telemetry call"),
        }
    }

    /// Waits until every call tracked so far has been delivered or dropped.
    pub async fn drain(&self) {
        let mut pending = std::mem::take(&mut *self.in_flight.lock());
        while pending.join_next().await.is_some() {}
    }

    fn submit(&self, call: TrackingCall) {
        let instance = self.instance.clone();
        let operation = call.operation;

        let mut in_flight = self.in_flight.lock();
        // reap finished dispatches so the set only holds live ones
        while in_flight.try_join_next().is_some() {}
        in_flight.spawn_on(
            async move {
                if let Err(err) = dispatch(instance, call).await {
                    warn!(%operation, error = %err, "dropping telemetry call");
                }
            },
            &self.runtime,
        );
    }
}

impl Drop for TelemetryProxy {
    fn drop(&mut self) {
        // tracked calls are never cancelled
        self.in_flight.get_mut().detach_all();
    }
}

/// Waits for the client, routes `call` to the matching method, then flushes.
///
/// Client methods are synchronous and may block on delivery, so they run on
/// the blocking pool rather than on the runtime's worker.
pub async fn dispatch(instance: PendingInstance, call: TrackingCall) -> Result<(), DispatchError> {
    let client = instance.await?;

    let waited_ms = (Utc::now() - call.issued_at).num_milliseconds();
    let (operation, payload, custom_properties) = call.into_parts();
    debug!(%operation, waited_ms, "dispatching telemetry call");

    tokio::task::spawn_blocking(move || {
        deliver(client.as_ref(), operation, payload, custom_properties)
    })
    .await
    .map_err(|e| DispatchError::Client(e.to_string()))?
}

fn deliver(
    client: &dyn TelemetryClient,
    operation: OperationKind,
    payload: TelemetryProps,
    custom_properties: Option<TelemetryProps>,
) -> Result<(), DispatchError> {
    let tracked = match operation {
        OperationKind::PageView => client.track_page_view(payload, custom_properties),
        OperationKind::Exception => client.track_exception(payload, custom_properties),
        OperationKind::Event => client.track_event(payload, custom_properties),
        OperationKind::Metric => client.track_metric(payload),
        OperationKind::Trace => client.track_trace(payload, custom_properties),
        OperationKind::DependencyData => client.track_dependency_data(payload),
    };
    // flush even when the tracking call itself failed
    let flushed = client.flush();

    tracked
        .and(flushed)
        .map_err(|e| DispatchError::Client(e.to_string()))
}
