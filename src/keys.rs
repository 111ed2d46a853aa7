//! Handing the proxy to the rest of the application.
//!
//! The host owns a [`Container`] and asks for capabilities by key. Installing
//! telemetry provides the proxy under [`APP_INSIGHTS`] and also parks the same
//! instance in a process-wide slot for code that cannot take it by injection.

use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;

use once_cell::sync::OnceCell;
use tracing::{info, warn};

use crate::config::ProxyOptions;
use crate::error::TelemetryResult;
use crate::initializer::Initializer;
use crate::proxy::TelemetryProxy;

/// Typed name for a capability held in a [`Container`].
pub struct InjectionKey<T> {
    name: &'static str,
    _marker: PhantomData<fn() -> T>,
}

impl<T> InjectionKey<T> {
    pub const fn new(name: &'static str) -> Self {
        Self {
            name,
            _marker: PhantomData,
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }
}

impl<T> fmt::Debug for InjectionKey<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("InjectionKey").field(&self.name).finish()
    }
}

pub const APP_INSIGHTS: InjectionKey<TelemetryProxy> = InjectionKey::new("appInsights");

/// Capability container the host hands to its components.
#[derive(Default)]
pub struct Container {
    provided: HashMap<&'static str, Arc<dyn Any + Send + Sync>>,
}

impl Container {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces whatever was provided under the same key.
    pub fn provide<T: Send + Sync + 'static>(&mut self, key: &InjectionKey<T>, value: Arc<T>) {
        self.provided.insert(key.name, value);
    }

    pub fn inject<T: Send + Sync + 'static>(&self, key: &InjectionKey<T>) -> Option<Arc<T>> {
        self.provided
            .get(key.name)
            .cloned()
            .and_then(|value| value.downcast::<T>().ok())
    }
}

static GLOBAL_TELEMETRY: OnceCell<Arc<TelemetryProxy>> = OnceCell::new();

/// Sets the process-wide proxy. Only the first call wins.
pub fn init_telemetry(proxy: Arc<TelemetryProxy>) -> bool {
    GLOBAL_TELEMETRY.set(proxy).is_ok()
}

pub fn get_telemetry() -> Option<Arc<TelemetryProxy>> {
    GLOBAL_TELEMETRY.get().cloned()
}

/// Starts initialization and exposes the proxy both by injection and globally.
pub fn install(
    container: &mut Container,
    initializer: Initializer,
    options: ProxyOptions,
) -> TelemetryResult<Arc<TelemetryProxy>> {
    let proxy = Arc::new(TelemetryProxy::new(initializer, options)?);

    container.provide(&APP_INSIGHTS, proxy.clone());
    if !init_telemetry(proxy.clone()) {
        warn!("a global telemetry proxy is already installed; keeping the first one");
    }
    info!(key = APP_INSIGHTS.name(), "telemetry proxy installed");

    Ok(proxy)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::initializer::tests::{Recorded, RecordingSdk, StaticSource};
    use crate::properties::TelemetryProps;
    use crate::sdk::Sdk;
    use serde_json::json;

    #[test]
    fn inject_is_typed_by_key() {
        let mut container = Container::new();
        let key: InjectionKey<String> = InjectionKey::new("greeting");
        let other: InjectionKey<u32> = InjectionKey::new("greeting");

        container.provide(&key, Arc::new("hello".to_string()));

        assert_eq!(container.inject(&key).as_deref(), Some(&"hello".to_string()));
        assert!(container.inject(&other).is_none());
        assert!(container.inject(&APP_INSIGHTS).is_none());
    }

    #[tokio::test]
    async fn install_provides_the_global_instance() {
        let sdk = Arc::new(RecordingSdk::default());
        let initializer = Initializer::new(
            Arc::new(StaticSource(Ok(json!({"instrumentationKey": "abc123"})))),
            Some(sdk.clone() as Arc<dyn Sdk>),
        );
        let mut container = Container::new();

        let installed = install(&mut container, initializer, ProxyOptions::new()).unwrap();
        let injected = container.inject(&APP_INSIGHTS).unwrap();
        assert!(Arc::ptr_eq(&installed, &injected));

        // this is the only test that installs, so the global slot holds it
        let global = get_telemetry().unwrap();
        assert!(Arc::ptr_eq(&installed, &global));

        injected.track_page_view(TelemetryProps::named("home"), None);
        global.drain().await;
        assert_eq!(
            sdk.client.calls(),
            vec![
                Recorded::PageView(TelemetryProps::named("home"), None),
                Recorded::Flush
            ]
        );
    }
}
