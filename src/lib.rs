// lib.rs
pub mod call;
pub mod config;
pub mod error;
pub mod initializer;
pub mod keys;
pub mod properties;
pub mod proxy;
pub mod sdk;
pub mod telemetry;

pub use call::{OperationKind, TrackingCall, UnknownTagPolicy};
pub use config::{
    ConfigSource, FileConfigSource, HttpConfigSource, HttpSourceConfig, MergedConfig,
    ProxyOptions, RemoteConfig,
};
pub use error::{DispatchError, InitError, TelemetryError, TelemetryResult};
pub use initializer::Initializer;
pub use keys::{get_telemetry, init_telemetry, install, Container, InjectionKey, APP_INSIGHTS};
pub use properties::TelemetryProps;
pub use proxy::{dispatch, PendingInstance, ProxySettings, ProxyState, TelemetryProxy};
pub use sdk::{ambient_sdk, register_sdk, Sdk, TelemetryClient};
pub use telemetry::{NativeSdk, Telemetry};
