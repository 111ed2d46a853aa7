use crate::{MergedConfig, Sdk, TelemetryClient, TelemetryError, TelemetryProps, TelemetryResult};
use async_trait::async_trait;
use once_cell::sync::OnceCell;
use posthog_rs::{
    client, Client as PostHogClient, ClientOptions as PostHogClientOptions, Event, EventBase,
    Exception,
};
use sentry;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::debug;
use uuid::Uuid;

const FLUSH_TIMEOUT: Duration = Duration::from_secs(2);

static SENTRY: OnceCell<sentry::ClientInitGuard> = OnceCell::new();

const PAGE_VIEW_EVENT: &str = "$pageview";
const METRIC_EVENT: &str = "$metric";
const DEPENDENCY_EVENT: &str = "$dependency";
const TRACE_EVENT: &str = "$trace";

/// Exception payload reshaped into an error so both backends can report it.
#[derive(Error, Debug)]
#[error("{message}")]
struct ReportedException {
    message: String,
}

impl ReportedException {
    fn from_props(exception: &TelemetryProps) -> Self {
        let message = exception
            .get_str("message")
            .or_else(|| exception.get_str("name"))
            .map(str::to_string)
            .unwrap_or_else(|| exception.as_value().to_string());
        Self { message }
    }
}

/// Bundled SDK: PostHog for product events, Sentry for errors and traces.
///
/// Reads from the merged configuration:
/// * `config.instrumentationKey` – PostHog project key.
/// * `sentryDsn` – enables Sentry when present.
/// * `disableTelemetry` – loads a client that drops everything.
/// * `appName`, `appVersion`, `instanceId` – attached to every event.
///
/// Sentry has one client per process. The first load that carries a DSN
/// initializes it; later loads report to that same client and their DSN is
/// ignored.
#[derive(Debug, Default, Clone)]
pub struct NativeSdk;

#[async_trait]
impl Sdk for NativeSdk {
    async fn load(&self, config: MergedConfig) -> TelemetryResult<Arc<dyn TelemetryClient>> {
        Ok(Arc::new(Telemetry::new(&config)?))
    }
}

pub struct Telemetry {
    app_name: String,
    app_version: String,
    instance_id: String,
    enabled: bool,
    posthog: Option<PostHogClient>,
    sentry_enabled: bool,
}

impl Telemetry {
    pub fn new(config: &MergedConfig) -> TelemetryResult<Self> {
        let app_name = config.setting_str("appName").unwrap_or("unknown").to_string();
        let app_version = config
            .setting_str("appVersion")
            .unwrap_or(env!("CARGO_PKG_VERSION"))
            .to_string();
        let instance_id = config
            .setting_str("instanceId")
            .map(str::to_string)
            .unwrap_or_else(|| Uuid::new_v4().to_string());
        let enabled = !config.setting_bool("disableTelemetry").unwrap_or(false);

        let posthog_key = config
            .instrumentation_key()
            .ok_or_else(|| TelemetryError::LoadError("instrumentation key missing".into()))?
            .to_string();
        let sentry_dsn = config.setting_str("sentryDsn").map(str::to_string);

        let (posthog, sentry_enabled) = if enabled {
            let app = app_name.clone();
            let version = app_version.clone();
            let client_options = PostHogClientOptions::new(
                posthog_key.as_str(),
                Some(&instance_id),
                sentry_dsn.is_none(),
                Some(move |panic_exception: &mut Exception| {
                    let _ = Telemetry::add_posthog_default_props(panic_exception, &app, &version);
                }),
            );
            let posthog = Some(client(client_options));

            let sentry_enabled = match sentry_dsn {
                Some(dsn) => {
                    if !ensure_sentry(&dsn, &app_name, &app_version) {
                        debug!("sentry already initialized, reusing the process client");
                    }
                    true
                }
                None => false,
            };

            (posthog, sentry_enabled)
        } else {
            (None, false)
        };

        Ok(Self {
            app_name,
            app_version,
            instance_id,
            enabled,
            posthog,
            sentry_enabled,
        })
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    fn capture(
        &self,
        event_name: &str,
        payload: TelemetryProps,
        custom_properties: Option<TelemetryProps>,
    ) -> TelemetryResult<()> {
        if !self.enabled {
            return Ok(());
        }

        if let Some(client) = &self.posthog {
            let mut event = Event::new(event_name, &self.instance_id);

            // custom properties are applied last and win on conflicts
            for props in [Some(payload), custom_properties].into_iter().flatten() {
                for (key, value) in props.to_map().unwrap_or_default() {
                    event
                        .insert_prop(key, value)
                        .map_err(|e| TelemetryError::SendError(e.to_string()))?;
                }
            }
            Telemetry::add_posthog_default_props(&mut event, &self.app_name, &self.app_version)?;

            client
                .capture(event)
                .map_err(|e| TelemetryError::SendError(e.to_string()))?;
        }

        Ok(())
    }

    fn add_posthog_default_props(
        event: &mut impl EventBase,
        app_name: &str,
        app_version: &str,
    ) -> TelemetryResult<()> {
        event
            .insert_prop("app", app_name)
            .map_err(|e| TelemetryError::SendError(e.to_string()))?;
        event
            .insert_prop("app_version", app_version)
            .map_err(|e| TelemetryError::SendError(e.to_string()))?;
        event
            .insert_prop("platform", std::env::consts::OS)
            .map_err(|e| TelemetryError::SendError(e.to_string()))?;
        event
            .insert_prop("deferred_telemetry_version", env!("CARGO_PKG_VERSION"))
            .map_err(|e| TelemetryError::SendError(e.to_string()))?;

        Ok(())
    }
}

/// AppInsights-style severity (0 verbose .. 4 critical) to a Sentry level.
/// Initializes the process-wide Sentry client unless it already is.
/// Returns whether this call did the initialization.
fn ensure_sentry(dsn: &str, app_name: &str, app_version: &str) -> bool {
    let mut initialized = false;
    SENTRY.get_or_init(|| {
        initialized = true;
        let options = sentry::ClientOptions {
            release: Some(app_version.to_string().into()),
            ..Default::default()
        };
        let guard = sentry::init((dsn, options));

        sentry::configure_scope(|scope| {
            scope.set_tag("app", app_name);
            scope.set_tag("app_version", app_version);
            scope.set_tag("platform", std::env::consts::OS);
            scope.set_tag("deferred_telemetry_version", env!("CARGO_PKG_VERSION"));
        });
        guard
    });
    initialized
}

fn sentry_level(trace: &TelemetryProps) -> sentry::Level {
    match trace.get("severityLevel").and_then(Value::as_u64) {
        Some(0) => sentry::Level::Debug,
        Some(2) => sentry::Level::Warning,
        Some(3) => sentry::Level::Error,
        Some(4) => sentry::Level::Fatal,
        _ => sentry::Level::Info,
    }
}

impl TelemetryClient for Telemetry {
    fn track_page_view(
        &self,
        page_view: TelemetryProps,
        custom_properties: Option<TelemetryProps>,
    ) -> TelemetryResult<()> {
        self.capture(PAGE_VIEW_EVENT, page_view, custom_properties)
    }

    fn track_exception(
        &self,
        exception: TelemetryProps,
        custom_properties: Option<TelemetryProps>,
    ) -> TelemetryResult<()> {
        if !self.enabled {
            return Ok(());
        }

        let error = ReportedException::from_props(&exception);
        if self.sentry_enabled {
            let extras = custom_properties.and_then(TelemetryProps::to_map).unwrap_or_default();
            sentry::with_scope(
                |scope| {
                    for (key, value) in extras {
                        scope.set_extra(&key, value);
                    }
                },
                || sentry::capture_error(&error),
            );
        } else if let Some(posthog_client) = &self.posthog {
            let mut exception = Exception::new(&error, &self.instance_id);
            Telemetry::add_posthog_default_props(
                &mut exception,
                &self.app_name,
                &self.app_version,
            )?;

            posthog_client
                .capture_exception(exception)
                .map_err(|e| TelemetryError::SendError(e.to_string()))?;
        }

        Ok(())
    }

    fn track_event(
        &self,
        event: TelemetryProps,
        custom_properties: Option<TelemetryProps>,
    ) -> TelemetryResult<()> {
        let name = event.get_str("name").unwrap_or("event").to_string();
        self.capture(&name, event, custom_properties)
    }

    fn track_metric(&self, metric: TelemetryProps) -> TelemetryResult<()> {
        self.capture(METRIC_EVENT, metric, None)
    }

    fn track_trace(
        &self,
        trace: TelemetryProps,
        custom_properties: Option<TelemetryProps>,
    ) -> TelemetryResult<()> {
        if !self.enabled {
            return Ok(());
        }

        if self.sentry_enabled {
            let message = trace.get_str("message").unwrap_or_default().to_string();
            let level = sentry_level(&trace);
            let extras = custom_properties.and_then(TelemetryProps::to_map).unwrap_or_default();
            sentry::with_scope(
                |scope| {
                    for (key, value) in extras {
                        scope.set_extra(&key, value);
                    }
                },
                || sentry::capture_message(&message, level),
            );
            Ok(())
        } else {
            self.capture(TRACE_EVENT, trace, custom_properties)
        }
    }

    fn track_dependency_data(&self, dependency: TelemetryProps) -> TelemetryResult<()> {
        self.capture(DEPENDENCY_EVENT, dependency, None)
    }

    fn flush(&self) -> TelemetryResult<()> {
        if self.sentry_enabled {
            if let Some(client) = sentry::Hub::current().client() {
                client.flush(Some(FLUSH_TIMEOUT));
            }
        }
        Ok(())
    }
}
