use base64::Engine;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_with::{base64::Base64, serde_as};
use uuid::Uuid;

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
pub enum Resolution {
    #[serde(rename = "1080p")]
    FullHd,
    #[default]
    #[serde(rename = "2k")]
    TwoK,
    #[serde(rename = "4k")]
    FourK,
}

impl Resolution {
    pub fn as_str(&self) -> &'static str {
        match self {
            Resolution::FullHd => "1080p",
            Resolution::TwoK => "2k",
            Resolution::FourK => "4k",
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
pub enum AspectRatio {
    #[default]
    #[serde(rename = "16:9")]
    Landscape,
    #[serde(rename = "9:16")]
    Portrait,
    #[serde(rename = "1:1")]
    Square,
    #[serde(rename = "4:3")]
    Classic,
    #[serde(rename = "3:4")]
    ClassicPortrait,
}

impl AspectRatio {
    pub fn as_str(&self) -> &'static str {
        match self {
            AspectRatio::Landscape => "16:9",
            AspectRatio::Portrait => "9:16",
            AspectRatio::Square => "1:1",
            AspectRatio::Classic => "4:3",
            AspectRatio::ClassicPortrait => "3:4",
        }
    }
}

/// Video models only accept the two widescreen orientations.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
pub enum VideoAspectRatio {
    #[default]
    #[serde(rename = "16:9")]
    Landscape,
    #[serde(rename = "9:16")]
    Portrait,
}

impl VideoAspectRatio {
    pub fn as_str(&self) -> &'static str {
        match self {
            VideoAspectRatio::Landscape => "16:9",
            VideoAspectRatio::Portrait => "9:16",
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum LightingPreset {
    #[default]
    Studio,
    Sunny,
    Night,
    Dramatic,
    #[serde(rename = "golden hour")]
    GoldenHour,
    Overcast,
}

impl LightingPreset {
    pub fn as_str(&self) -> &'static str {
        match self {
            LightingPreset::Studio => "studio",
            LightingPreset::Sunny => "sunny",
            LightingPreset::Night => "night",
            LightingPreset::Dramatic => "dramatic",
            LightingPreset::GoldenHour => "golden hour",
            LightingPreset::Overcast => "overcast",
        }
    }
}

/// Render settings. Plain value data, copied into every batch job.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct Settings {
    pub resolution: Resolution,
    pub aspect_ratio: AspectRatio,
    pub lighting_preset: LightingPreset,
    pub lock_structure: bool,
    pub denoising: f32,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            resolution: Resolution::TwoK,
            aspect_ratio: AspectRatio::Landscape,
            lighting_preset: LightingPreset::Studio,
            lock_structure: true,
            denoising: 0.2,
        }
    }
}

impl Settings {
    pub fn normalized(mut self) -> Self {
        self.denoising = clamp_unit(self.denoising);
        self
    }
}

pub(crate) fn clamp_unit(v: f32) -> f32 {
    if v.is_nan() { 1.0 } else { v.clamp(0.0, 1.0) }
}

/// Raw media handed to the gateway: bytes plus their MIME type.
#[derive(Debug, Clone, PartialEq)]
pub struct MediaPayload {
    pub mime_type: String,
    pub data: Bytes,
}

impl MediaPayload {
    pub fn new(mime_type: impl Into<String>, data: impl Into<Bytes>) -> Self {
        Self { mime_type: mime_type.into(), data: data.into() }
    }

    pub fn base64(&self) -> String {
        base64::engine::general_purpose::STANDARD.encode(&self.data)
    }

    pub fn data_url(&self) -> String {
        format!("data:{};base64,{}", self.mime_type, self.base64())
    }
}

/// An auxiliary image steering the render's aesthetic.
///
/// `weight` may be unset; [`StyleReference::weight`] reads it as full influence.
#[derive(Debug, Clone, PartialEq)]
pub struct StyleReference {
    pub image: MediaPayload,
    pub weight: Option<f32>,
}

impl StyleReference {
    pub fn new(image: MediaPayload) -> Self {
        Self { image, weight: None }
    }

    pub fn with_weight(mut self, weight: f32) -> Self {
        self.weight = Some(clamp_unit(weight));
        self
    }

    pub fn weight(&self) -> f32 {
        self.weight.unwrap_or(1.0)
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ArtifactKind {
    Image,
    Video,
}

/// One successful generation result. Never mutated after creation.
#[derive(Debug, Clone, PartialEq)]
pub struct Artifact {
    pub id: Uuid,
    pub kind: ArtifactKind,
    pub media: MediaPayload,
    pub created_at: DateTime<Utc>,
}

impl Artifact {
    pub fn image(media: MediaPayload) -> Self {
        Self::new(ArtifactKind::Image, media)
    }

    pub fn video(media: MediaPayload) -> Self {
        Self::new(ArtifactKind::Video, media)
    }

    fn new(kind: ArtifactKind, media: MediaPayload) -> Self {
        Self { id: Uuid::new_v4(), kind, media, created_at: Utc::now() }
    }

    pub fn summary(&self) -> ArtifactSummary {
        ArtifactSummary {
            id: self.id,
            kind: self.kind,
            mime_type: self.media.mime_type.clone(),
            size: self.media.data.len(),
            created_at: self.created_at,
            url: format!("/api/artifacts/{}", self.id),
        }
    }
}

#[derive(Debug, Serialize, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ArtifactSummary {
    pub id: Uuid,
    pub kind: ArtifactKind,
    pub mime_type: String,
    pub size: usize,
    pub created_at: DateTime<Utc>,
    pub url: String,
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Queued,
    Rendering,
    Completed,
    Failed,
}

impl JobStatus {
    pub fn is_settled(&self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }
}

#[derive(Debug, Clone)]
pub struct BatchJob {
    pub id: String,
    pub settings: Settings,
    pub style_references: Vec<StyleReference>,
    pub status: JobStatus,
    pub result: Option<Artifact>,
    pub created_at: DateTime<Utc>,
}

// --- Wire types ---

/// An uploaded file as posted by the front-end.
#[serde_as]
#[derive(Debug, Deserialize, Clone)]
#[serde(rename_all = "camelCase")]
pub struct Upload {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub mime_type: Option<String>,
    #[serde_as(as = "Base64")]
    pub data: Vec<u8>,
}

#[derive(Debug, Serialize, Clone)]
#[serde(rename_all = "camelCase")]
pub struct JobView {
    pub id: String,
    pub status: JobStatus,
    pub settings: Settings,
    pub style_count: usize,
    pub style_weights: Vec<f32>,
    pub result: Option<ArtifactSummary>,
    pub created_at: DateTime<Utc>,
}

impl From<&BatchJob> for JobView {
    fn from(job: &BatchJob) -> Self {
        Self {
            id: job.id.clone(),
            status: job.status,
            settings: job.settings,
            style_count: job.style_references.len(),
            style_weights: job.style_references.iter().map(StyleReference::weight).collect(),
            result: job.result.as_ref().map(Artifact::summary),
            created_at: job.created_at,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct EnhanceRequest {
    pub prompt: String,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(rename_all = "camelCase")]
pub struct ImagesRequest {
    pub prompt: String,
    #[serde(default = "default_image_count")]
    pub count: u8,
    #[serde(default = "default_images_aspect")]
    pub aspect_ratio: AspectRatio,
}

fn default_image_count() -> u8 { 1 }
fn default_images_aspect() -> AspectRatio { AspectRatio::Square }

#[derive(Debug, Deserialize, Clone)]
#[serde(rename_all = "camelCase")]
pub struct AnimateRequest {
    #[serde(default)]
    pub prompt: Option<String>,
    #[serde(default)]
    pub aspect_ratio: VideoAspectRatio,
}

#[derive(Debug, Deserialize, Clone)]
pub struct WeightRequest {
    pub weight: f32,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ReorderRequest {
    pub from: usize,
    pub to: usize,
}

#[derive(Debug, Deserialize, Clone)]
pub struct SavePresetRequest {
    pub name: String,
}
