#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{Method, Request, Response};
use axum::Router;
use http_body_util::BodyExt;
use parking_lot::Mutex;
use tokio::sync::{mpsc, Semaphore};
use tower::ServiceExt;

use hikari_render::config::{Timings, DEFAULT_MAX_UPLOAD_MB};
use hikari_render::controller::Controller;
use hikari_render::error::GatewayError;
use hikari_render::gateway::{Gateway, ProgressFn};
use hikari_render::models::{
    Artifact, AspectRatio, MediaPayload, Settings, StyleReference, Upload, VideoAspectRatio,
};
use hikari_render::presets::PresetStore;
use hikari_render::routes::{router, AppState};

/// One gateway invocation as seen by the fake.
#[derive(Debug, Clone)]
pub struct Call {
    pub kind: &'static str,
    pub settings: Option<Settings>,
    pub style_weights: Vec<f32>,
    pub instruction: Option<String>,
}

/// A gateway that answers from a script and can hold calls until released.
pub struct ScriptedGateway {
    script: Mutex<VecDeque<Result<(), GatewayError>>>,
    gate: Option<Arc<Semaphore>>,
    started_tx: mpsc::UnboundedSender<Call>,
    started_rx: tokio::sync::Mutex<mpsc::UnboundedReceiver<Call>>,
    calls: Mutex<Vec<Call>>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
    produced: AtomicUsize,
    video_polls: AtomicUsize,
}

impl ScriptedGateway {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::build(None))
    }

    /// Every call waits for a [`ScriptedGateway::release`] before answering.
    pub fn gated() -> Arc<Self> {
        Arc::new(Self::build(Some(Arc::new(Semaphore::new(0)))))
    }

    fn build(gate: Option<Arc<Semaphore>>) -> Self {
        let (started_tx, started_rx) = mpsc::unbounded_channel();
        Self {
            script: Mutex::default(),
            gate,
            started_tx,
            started_rx: tokio::sync::Mutex::new(started_rx),
            calls: Mutex::default(),
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
            produced: AtomicUsize::new(0),
            video_polls: AtomicUsize::new(1),
        }
    }

    /// Queues the outcome of the next unscripted call. Unscripted calls succeed.
    pub fn push_outcome(&self, outcome: Result<(), GatewayError>) -> &Self {
        self.script.lock().push_back(outcome);
        self
    }

    /// How many status polls a video call reports before it reaches the gate.
    pub fn set_video_polls(&self, polls: usize) {
        self.video_polls.store(polls, Ordering::SeqCst);
    }

    pub fn release(&self, calls: usize) {
        if let Some(gate) = &self.gate {
            gate.add_permits(calls);
        }
    }

    /// Waits until the next call has reached the gateway.
    pub async fn next_call(&self) -> Call {
        self.started_rx.lock().await.recv().await.expect("gateway dropped")
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().clone()
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    async fn answer(&self, call: Call) -> Result<(), GatewayError> {
        self.calls.lock().push(call.clone());
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        let _ = self.started_tx.send(call);
        if let Some(gate) = &self.gate {
            gate.acquire().await.expect("gate closed").forget();
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        self.script.lock().pop_front().unwrap_or(Ok(()))
    }

    fn image(&self) -> Artifact {
        let n = self.produced.fetch_add(1, Ordering::SeqCst);
        Artifact::image(MediaPayload::new("image/png", format!("image-{}", n)))
    }
}

#[async_trait]
impl Gateway for ScriptedGateway {
    async fn render_plan(
        &self,
        _plan: &MediaPayload,
        styles: &[StyleReference],
        settings: &Settings,
    ) -> Result<Artifact, GatewayError> {
        self.answer(Call {
            kind: "render",
            settings: Some(*settings),
            style_weights: styles.iter().map(StyleReference::weight).collect(),
            instruction: None,
        })
        .await?;
        Ok(self.image())
    }

    async fn edit_artifact(&self, _image: &MediaPayload, instruction: &str) -> Result<Artifact, GatewayError> {
        self.answer(Call { kind: "edit", settings: None, style_weights: vec![], instruction: Some(instruction.into()) })
            .await?;
        Ok(self.image())
    }

    async fn generate_images(
        &self,
        prompt: &str,
        count: u8,
        _aspect_ratio: AspectRatio,
    ) -> Result<Vec<Artifact>, GatewayError> {
        self.answer(Call { kind: "images", settings: None, style_weights: vec![], instruction: Some(prompt.into()) })
            .await?;
        Ok((0..count).map(|_| self.image()).collect())
    }

    async fn generate_video(
        &self,
        _image: &MediaPayload,
        prompt: &str,
        _aspect_ratio: VideoAspectRatio,
        on_progress: ProgressFn<'_>,
    ) -> Result<Artifact, GatewayError> {
        on_progress("Starting video generation...".into());
        for poll in 1..=self.video_polls.load(Ordering::SeqCst) {
            on_progress(format!("Checking status ({}/30)...", poll));
        }
        self.answer(Call { kind: "video", settings: None, style_weights: vec![], instruction: Some(prompt.into()) })
            .await?;
        Ok(Artifact::video(MediaPayload::new("video/mp4", "mp4-bytes")))
    }
}

pub fn controller(gateway: Arc<ScriptedGateway>) -> Arc<Controller> {
    Controller::new(gateway, Timings::immediate())
}

pub fn png(name: &str) -> Upload {
    Upload { name: Some(name.into()), mime_type: Some("image/png".into()), data: vec![0x89, b'P', b'N', b'G'] }
}

pub fn build_test_app(gateway: Arc<ScriptedGateway>) -> Router {
    router(AppState {
        controller: controller(gateway),
        presets: Arc::new(PresetStore::in_memory()),
        max_upload_bytes: DEFAULT_MAX_UPLOAD_MB * 1024 * 1024,
    })
}

pub async fn send(app: &Router, method: Method, uri: &str, body: Option<serde_json::Value>) -> Response<Body> {
    let builder = Request::builder().method(method).uri(uri);
    let request = match body {
        Some(json) => builder
            .header("content-type", "application/json")
            .body(Body::from(serde_json::to_vec(&json).unwrap()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    };
    app.clone().oneshot(request).await.unwrap()
}

pub async fn body_bytes(response: Response<Body>) -> Vec<u8> {
    response.into_body().collect().await.unwrap().to_bytes().to_vec()
}

pub async fn body_json(response: Response<Body>) -> serde_json::Value {
    serde_json::from_slice(&body_bytes(response).await).unwrap()
}
