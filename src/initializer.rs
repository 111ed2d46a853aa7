use std::sync::Arc;

use tracing::{debug, info};

use crate::config::{ConfigSource, ProxyOptions, RemoteConfig};
use crate::error::InitError;
use crate::sdk::{ambient_sdk, Sdk, TelemetryClient};

/// Where the SDK constructor is looked up.
enum SdkProvider {
    /// The process-wide slot, read once the config has been fetched.
    Ambient,
    Explicit(Option<Arc<dyn Sdk>>),
}

impl SdkProvider {
    fn resolve(&self) -> Option<Arc<dyn Sdk>> {
        match self {
            SdkProvider::Ambient => ambient_sdk(),
            SdkProvider::Explicit(sdk) => sdk.clone(),
        }
    }
}

/// Builds the one telemetry client a proxy will ever use.
pub struct Initializer {
    source: Arc<dyn ConfigSource>,
    sdk: SdkProvider,
}

impl Initializer {
    pub fn new(source: Arc<dyn ConfigSource>, sdk: Option<Arc<dyn Sdk>>) -> Self {
        Self {
            source,
            sdk: SdkProvider::Explicit(sdk),
        }
    }

    /// Uses whatever SDK is registered process-wide when `initialize` gets
    /// past the config fetch. If none is by then, it fails with `SdkNotLoaded`.
    pub fn from_ambient(source: Arc<dyn ConfigSource>) -> Self {
        Self {
            source,
            sdk: SdkProvider::Ambient,
        }
    }

    pub async fn initialize(
        &self,
        options: ProxyOptions,
    ) -> Result<Arc<dyn TelemetryClient>, InitError> {
        debug!("fetching telemetry config");
        let payload = self.source.fetch().await?;
        let remote = RemoteConfig::parse(&payload)?;

        let sdk = self.sdk.resolve().ok_or(InitError::SdkNotLoaded)?;

        let merged = remote.merge(options);
        if merged.instrumentation_key().is_none() {
            return Err(InitError::MissingInstrumentationKey);
        }

        let client = sdk.load(merged).await?;
        info!("telemetry client loaded");
        Ok(client)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::config::MergedConfig;
    use crate::error::{TelemetryError, TelemetryResult};
    use crate::properties::TelemetryProps;
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use serde_json::{json, Value};

    /// Serves a fixed `config.json` body, or fails like a 404 would.
    pub(crate) struct StaticSource(pub Result<Value, InitError>);

    #[async_trait]
    impl ConfigSource for StaticSource {
        async fn fetch(&self) -> Result<Vec<u8>, InitError> {
            self.0.clone().map(|body| body.to_string().into_bytes())
        }
    }

    #[derive(Debug, Clone, PartialEq)]
    pub(crate) enum Recorded {
        PageView(TelemetryProps, Option<TelemetryProps>),
        Exception(TelemetryProps, Option<TelemetryProps>),
        Event(TelemetryProps, Option<TelemetryProps>),
        Metric(TelemetryProps),
        Trace(TelemetryProps, Option<TelemetryProps>),
        DependencyData(TelemetryProps),
        Flush,
    }

    #[derive(Default)]
    pub(crate) struct RecordingClient {
        pub calls: Mutex<Vec<Recorded>>,
        /// Record events but report them as failed sends.
        pub fail_events: bool,
    }

    impl RecordingClient {
        pub fn calls(&self) -> Vec<Recorded> {
            self.calls.lock().clone()
        }

        fn record(&self, call: Recorded) -> TelemetryResult<()> {
            self.calls.lock().push(call);
            Ok(())
        }
    }

    impl TelemetryClient for RecordingClient {
        fn track_page_view(
            &self,
            page_view: TelemetryProps,
            custom_properties: Option<TelemetryProps>,
        ) -> TelemetryResult<()> {
            self.record(Recorded::PageView(page_view, custom_properties))
        }

        fn track_exception(
            &self,
            exception: TelemetryProps,
            custom_properties: Option<TelemetryProps>,
        ) -> TelemetryResult<()> {
            self.record(Recorded::Exception(exception, custom_properties))
        }

        fn track_event(
            &self,
            event: TelemetryProps,
            custom_properties: Option<TelemetryProps>,
        ) -> TelemetryResult<()> {
            self.record(Recorded::Event(event, custom_properties))?;
            if self.fail_events {
                return Err(TelemetryError::SendError("event rejected".into()));
            }
            Ok(())
        }

        fn track_metric(&self, metric: TelemetryProps) -> TelemetryResult<()> {
            self.record(Recorded::Metric(metric))
        }

        fn track_trace(
            &self,
            trace: TelemetryProps,
            custom_properties: Option<TelemetryProps>,
        ) -> TelemetryResult<()> {
            self.record(Recorded::Trace(trace, custom_properties))
        }

        fn track_dependency_data(&self, dependency: TelemetryProps) -> TelemetryResult<()> {
            self.record(Recorded::DependencyData(dependency))
        }

        fn flush(&self) -> TelemetryResult<()> {
            self.record(Recorded::Flush)
        }
    }

    /// Hands out a shared [`RecordingClient`] and remembers what it was
    /// loaded with.
    #[derive(Default)]
    pub(crate) struct RecordingSdk {
        pub client: Arc<RecordingClient>,
        pub loaded_with: Mutex<Vec<MergedConfig>>,
        pub fail_with: Option<TelemetryError>,
    }

    #[async_trait]
    impl Sdk for RecordingSdk {
        async fn load(&self, config: MergedConfig) -> TelemetryResult<Arc<dyn TelemetryClient>> {
            self.loaded_with.lock().push(config);
            match &self.fail_with {
                Some(err) => Err(err.clone()),
                None => Ok(self.client.clone()),
            }
        }
    }

    fn initializer(body: Result<Value, InitError>, sdk: Option<Arc<RecordingSdk>>) -> Initializer {
        Initializer::new(
            Arc::new(StaticSource(body)),
            sdk.map(|sdk| sdk as Arc<dyn Sdk>),
        )
    }

    #[tokio::test]
    async fn loads_client_with_merged_config() {
        let sdk = Arc::new(RecordingSdk::default());
        let init = initializer(
            Ok(json!({"instrumentationKey": "abc123", "applicationinsights": {"samplingPercentage": 50}})),
            Some(sdk.clone()),
        );

        init.initialize(ProxyOptions::new().with("samplingPercentage", 10))
            .await
            .unwrap();

        let loaded = sdk.loaded_with.lock();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].instrumentation_key(), Some("abc123"));
        assert_eq!(loaded[0].setting("samplingPercentage"), Some(&json!(10)));
    }

    #[tokio::test]
    async fn fetch_failure_rejects() {
        let sdk = Arc::new(RecordingSdk::default());
        let init = initializer(
            Err(InitError::ConfigFetch("unexpected status 404 Not Found".into())),
            Some(sdk.clone()),
        );

        let err = init.initialize(ProxyOptions::new()).await.err().unwrap();
        assert!(matches!(err, InitError::ConfigFetch(_)));
        assert!(sdk.loaded_with.lock().is_empty());
    }

    #[tokio::test]
    async fn missing_sdk_rejects_before_key_check() {
        let init = initializer(Ok(json!({})), None);
        let err = init.initialize(ProxyOptions::new()).await.err().unwrap();
        assert_eq!(err, InitError::SdkNotLoaded);
    }

    #[tokio::test]
    async fn missing_key_rejects_before_construction() {
        let sdk = Arc::new(RecordingSdk::default());
        let init = initializer(Ok(json!({"applicationinsights": {}})), Some(sdk.clone()));

        let err = init.initialize(ProxyOptions::new()).await.err().unwrap();
        assert_eq!(err, InitError::MissingInstrumentationKey);
        assert!(sdk.loaded_with.lock().is_empty());
    }

    #[tokio::test]
    async fn ambient_sdk_is_looked_up_after_fetch() {
        let init = Initializer::from_ambient(Arc::new(StaticSource(Ok(
            json!({"instrumentationKey": "abc123"}),
        ))));
        // registered after construction, as a late loader would
        let sdk = Arc::new(RecordingSdk::default());
        assert!(crate::sdk::register_sdk(sdk.clone()));

        init.initialize(ProxyOptions::new()).await.unwrap();
        assert_eq!(sdk.loaded_with.lock().len(), 1);
    }

    #[tokio::test]
    async fn sdk_load_failure_rejects() {
        let sdk = Arc::new(RecordingSdk {
            fail_with: Some(TelemetryError::LoadError("offline".into())),
            ..Default::default()
        });
        let init = initializer(Ok(json!({"instrumentationKey": "abc123"})), Some(sdk));

        let err = init.initialize(ProxyOptions::new()).await.err().unwrap();
        assert_eq!(err, InitError::SdkLoad(TelemetryError::LoadError("offline".into())));
    }
}
