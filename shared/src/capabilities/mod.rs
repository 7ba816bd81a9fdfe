mod geolocation;
mod http;
mod inference;
mod kv;

pub use self::geolocation::{
    FixedGeolocation, GeoFix, Geolocation, GeolocationError, UnavailableGeolocation,
};
pub use self::http::{
    execute_with_deadline, HttpError, HttpHeaders, HttpMethod, HttpRequest, HttpResponse,
    HttpTransport, ReqwestTransport, ValidatedUrl, MAX_TIMEOUT_MS,
};
pub use self::inference::{HttpInferenceClient, InferenceClient};
#[cfg(not(target_arch = "wasm32"))]
pub use self::kv::SqliteKeyValueStore;
pub use self::kv::{
    FileKeyValueStore, KeyNamespace, KeyValueStore, KvError, KvKey, MemoryKeyValueStore,
    StorageErrorCode,
};

use std::sync::Arc;

/// Host-provided services the intake core runs against.
#[derive(Clone)]
pub struct Capabilities {
    pub geolocation: Arc<dyn Geolocation>,
    pub http: Arc<dyn HttpTransport>,
    pub kv: Arc<dyn KeyValueStore>,
    pub inference: Arc<dyn InferenceClient>,
    pub speech_supported: bool,
}
