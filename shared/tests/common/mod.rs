//! In-memory capability fakes shared by the integration tests.

#![allow(dead_code)]

use async_trait::async_trait;
use image::{ImageFormat, RgbImage};
use std::io::Cursor;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use shared::capabilities::{
    FixedGeolocation, GeoFix, Geolocation, HttpError, HttpHeaders, HttpMethod, HttpRequest,
    HttpResponse, HttpTransport, InferenceClient, KeyValueStore, MemoryKeyValueStore,
};
use shared::image_capture::SelectedFile;
use shared::voice_intent::ExtractionError;
use shared::{Capabilities, IntakeConfig, IntakeSession, ReporterIdentity, SessionContext};

pub const SUBMISSION_URL: &str = "https://reports.example.org/incidents";

#[derive(Debug, Clone)]
pub enum Geocoder {
    Area(&'static str),
    Fail,
    Stall,
}

/// Serves reverse geocoding on GET and the submission endpoint on POST.
pub struct FakeNetwork {
    geocoder: Geocoder,
    submission_status: u16,
    submissions: Mutex<Vec<serde_json::Value>>,
}

impl FakeNetwork {
    pub fn new(geocoder: Geocoder, submission_status: u16) -> Arc<Self> {
        Arc::new(Self {
            geocoder,
            submission_status,
            submissions: Mutex::new(Vec::new()),
        })
    }

    pub fn submissions(&self) -> Vec<serde_json::Value> {
        self.submissions.lock().unwrap().clone()
    }
}

#[async_trait]
impl HttpTransport for FakeNetwork {
    async fn execute(&self, request: HttpRequest) -> Result<HttpResponse, HttpError> {
        if request.method() == HttpMethod::Post {
            let body = serde_json::from_slice(request.body().unwrap_or_default()).unwrap();
            self.submissions.lock().unwrap().push(body);
            return Ok(HttpResponse::new(
                self.submission_status,
                HttpHeaders::new(),
                b"{}".to_vec(),
            ));
        }

        match &self.geocoder {
            Geocoder::Area(village) => {
                let body = serde_json::json!({ "address": { "village": village } });
                Ok(HttpResponse::new(
                    200,
                    HttpHeaders::new(),
                    serde_json::to_vec(&body).unwrap(),
                ))
            }
            Geocoder::Fail => Err(HttpError::Connection {
                host: request.url().host().to_string(),
                message: "network unreachable".into(),
            }),
            Geocoder::Stall => std::future::pending().await,
        }
    }
}

/// Counts calls and answers with a canned completion.
pub struct FakeInference {
    reply: Result<String, ()>,
    calls: AtomicUsize,
}

impl FakeInference {
    pub fn replying(reply: &str) -> Arc<Self> {
        Arc::new(Self {
            reply: Ok(reply.to_string()),
            calls: AtomicUsize::new(0),
        })
    }

    pub fn failing() -> Arc<Self> {
        Arc::new(Self {
            reply: Err(()),
            calls: AtomicUsize::new(0),
        })
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl InferenceClient for FakeInference {
    async fn complete(&self, _system: &str, _transcript: &str) -> Result<String, ExtractionError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.reply
            .clone()
            .map_err(|()| ExtractionError::MalformedResponse("service unavailable".into()))
    }
}

pub struct Harness {
    pub network: Arc<FakeNetwork>,
    pub inference: Arc<FakeInference>,
    pub kv: Arc<dyn KeyValueStore>,
    pub geolocation: Arc<dyn Geolocation>,
}

impl Harness {
    pub fn new() -> Self {
        Self {
            network: FakeNetwork::new(Geocoder::Area("Sillari"), 201),
            inference: FakeInference::replying("{}"),
            kv: Arc::new(MemoryKeyValueStore::new()),
            geolocation: Arc::new(FixedGeolocation(GeoFix::new(21.6712, 79.2981))),
        }
    }

    pub fn capabilities(&self) -> Capabilities {
        Capabilities {
            geolocation: Arc::clone(&self.geolocation),
            http: self.network.clone(),
            kv: Arc::clone(&self.kv),
            inference: self.inference.clone(),
            speech_supported: true,
        }
    }

    pub async fn session(&self) -> IntakeSession {
        let mut config = IntakeConfig::default();
        config.submission.endpoint = Some(SUBMISSION_URL.to_string());
        IntakeSession::new(
            &config,
            self.capabilities(),
            SessionContext::new(ReporterIdentity::new("Asha Uikey", "9876500000", "Sillari")),
        )
        .await
        .unwrap()
    }
}

pub fn png_photo() -> SelectedFile {
    let img = RgbImage::from_pixel(8, 6, image::Rgb([34, 139, 34]));
    let mut out = Cursor::new(Vec::new());
    img.write_to(&mut out, ImageFormat::Png).unwrap();
    SelectedFile {
        name: "smoke.png".into(),
        bytes: out.into_inner(),
    }
}
