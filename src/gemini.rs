use async_trait::async_trait;
use base64::Engine;
use reqwest::Client;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{error, info, warn};

use crate::config::{PollPolicy, DEFAULT_API_BASE};
use crate::error::GatewayError;
use crate::gateway::{Gateway, ProgressFn};
use crate::models::{
    AspectRatio, Artifact, MediaPayload, Settings, StyleReference, VideoAspectRatio,
};

const IMAGE_MODEL: &str = "gemini-2.5-flash-image";
const TEXT_TO_IMAGE_MODEL: &str = "imagen-4.0-generate-001";
const VIDEO_MODEL: &str = "veo-3.1-fast-generate-preview";

// Helper function to truncate base64 data in JSON for cleaner logging
fn truncate_base64_in_json(value: &mut Value) {
    match value {
        Value::Object(map) => {
            for (key, val) in map.iter_mut() {
                if key == "data" || key == "bytesBase64Encoded" {
                    if let Value::String(s) = val {
                        if s.len() > 100 && s.chars().all(|c| c.is_ascii_alphanumeric() || c == '+' || c == '/' || c == '=') {
                            *val = Value::String(format!("{}...[truncated {} chars]", &s[..50], s.len() - 50));
                        }
                    }
                } else {
                    truncate_base64_in_json(val);
                }
            }
        }
        Value::Array(arr) => {
            for val in arr.iter_mut() {
                truncate_base64_in_json(val);
            }
        }
        _ => {}
    }
}

fn loggable(body: &str) -> String {
    if body.len() <= 1000 {
        return body.to_string();
    }
    match serde_json::from_str::<Value>(body) {
        Ok(mut v) => {
            truncate_base64_in_json(&mut v);
            serde_json::to_string_pretty(&v).unwrap_or_else(|_| format!("{}...", body.chars().take(1000).collect::<String>()))
        }
        Err(_) => format!("{}...", body.chars().take(1000).collect::<String>()),
    }
}

/// Gemini REST client implementing [`Gateway`].
///
/// Without an API key it runs in demo mode and answers with SVG placeholders.
pub struct GeminiClient {
    client: Client,
    api_key: Option<String>,
    base_url: String,
    polling: PollPolicy,
}

impl GeminiClient {
    pub fn new(api_key: Option<String>) -> Self {
        Self::with_base_url(api_key, DEFAULT_API_BASE)
    }

    pub fn with_base_url(api_key: Option<String>, base_url: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            api_key,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            polling: PollPolicy::default(),
        }
    }

    pub fn with_polling(mut self, polling: PollPolicy) -> Self {
        self.polling = polling;
        self
    }

    pub fn is_demo(&self) -> bool {
        self.api_key.is_none()
    }

    fn key(&self) -> &str {
        self.api_key.as_deref().unwrap_or_default()
    }

    fn model_url(&self, model: &str, method: &str) -> String {
        format!("{}/models/{}:{}?key={}", self.base_url, model, method, self.key())
    }

    fn redact(&self, url: &str) -> String {
        match &self.api_key {
            Some(k) => url.replace(k.as_str(), "***"),
            None => url.to_string(),
        }
    }

    async fn send(&self, request: reqwest::RequestBuilder, url: &str) -> Result<String, GatewayError> {
        info!("🔗 Making request to: {}", self.redact(url));
        let response = request.send().await.map_err(|e| GatewayError::OperationError(e.to_string()))?;

        let status = response.status();
        info!("📥 Response status: {}", status);

        let text = response.text().await.map_err(|e| GatewayError::TransportFailure(e.to_string()))?;
        if !status.is_success() {
            error!("❌ API Error response: {}", loggable(&text));
            return Err(GatewayError::Http { status: status.as_u16(), body: text });
        }
        info!("📥 Raw Gemini API response: {}", loggable(&text));
        Ok(text)
    }

    async fn post_json(&self, url: &str, body: &Value) -> Result<String, GatewayError> {
        let mut logged = body.clone();
        truncate_base64_in_json(&mut logged);
        info!("📤 Request body: {}", serde_json::to_string_pretty(&logged).unwrap_or_default());
        self.send(self.client.post(url).json(body), url).await
    }

    async fn generate_image_content(&self, parts: Vec<Value>) -> Result<Artifact, GatewayError> {
        let url = self.model_url(IMAGE_MODEL, "generateContent");
        let body = json!({
            "contents": [{ "parts": parts }],
            "generationConfig": { "responseModalities": ["IMAGE"] }
        });
        let text = self.post_json(&url, &body).await?;
        let parsed: GeminiResponse =
            serde_json::from_str(&text).map_err(|e| GatewayError::Parse(e.to_string()))?;
        let media = extract_image(&parsed)?;
        info!("🖼️ Extracted {} image ({} bytes)", media.mime_type, media.data.len());
        Ok(Artifact::image(media))
    }

    async fn start_video(&self, image: &MediaPayload, prompt: &str, aspect_ratio: VideoAspectRatio) -> Result<Operation, GatewayError> {
        let url = self.model_url(VIDEO_MODEL, "predictLongRunning");
        let body = json!({
            "instances": [{
                "prompt": prompt,
                "image": { "bytesBase64Encoded": image.base64(), "mimeType": image.mime_type }
            }],
            "parameters": { "aspectRatio": aspect_ratio.as_str(), "resolution": "720p", "sampleCount": 1 }
        });
        let text = self.post_json(&url, &body).await?;
        serde_json::from_str(&text).map_err(|e| GatewayError::Parse(e.to_string()))
    }

    async fn poll_video(&self, operation: &Operation) -> Result<Operation, GatewayError> {
        let url = format!("{}/{}?key={}", self.base_url, operation.name, self.key());
        let text = self.send(self.client.get(&url), &url).await?;
        serde_json::from_str(&text).map_err(|e| GatewayError::Parse(e.to_string()))
    }

    async fn download(&self, uri: &str) -> Result<MediaPayload, GatewayError> {
        let sep = if uri.contains('?') { '&' } else { '?' };
        let url = format!("{}{}key={}", uri, sep, self.key());
        info!("⬇️ Downloading generated video from {}", self.redact(&url));
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| GatewayError::TransportFailure(e.to_string()))?;
        if !response.status().is_success() {
            return Err(GatewayError::TransportFailure(format!(
                "failed to download the generated video (status {})",
                response.status()
            )));
        }
        let mime = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .filter(|v| v.starts_with("video/"))
            .unwrap_or("video/mp4")
            .to_string();
        let bytes = response.bytes().await.map_err(|e| GatewayError::TransportFailure(e.to_string()))?;
        Ok(MediaPayload::new(mime, bytes))
    }

    fn placeholder(&self, title: &str, seed: usize) -> Artifact {
        let colors = [
            "#14B8A6", // Teal
            "#3B82F6", // Blue
            "#8B5CF6", // Purple
            "#F59E0B", // Amber
            "#EF4444", // Red
        ];
        let color = colors[seed % colors.len()];
        let svg = format!(r#"<svg width="640" height="360" xmlns="http://www.w3.org/2000/svg">
            <defs>
                <linearGradient id="grad" x1="0%" y1="0%" x2="100%" y2="100%">
                    <stop offset="0%" style="stop-color:{};stop-opacity:1" />
                    <stop offset="100%" style="stop-color:{};stop-opacity:0.6" />
                </linearGradient>
            </defs>
            <rect width="640" height="360" fill="url(#grad)" />
            <text x="320" y="180" font-family="Arial, sans-serif" font-size="28" font-weight="bold"
                  text-anchor="middle" fill="white">
                {}
            </text>
            <text x="320" y="230" font-family="Arial, sans-serif" font-size="14"
                  text-anchor="middle" fill="white" opacity="0.8">
                Hikari Render Studio (demo mode)
            </text>
        </svg>"#, color, color, title);
        Artifact::image(MediaPayload::new("image/svg+xml", svg.into_bytes()))
    }

    /// Influence clause for the render prompt. Unset weights count as 1.0.
    pub fn style_clause(styles: &[StyleReference]) -> String {
        match styles {
            [] => "Generate a modern, minimalist style.".to_string(),
            [only] => format!(
                "The second image is a style reference with an influence weight of {:.1} out of 1.0. Take materials, color palette, lighting, furniture style and overall mood from it. A weight of 1.0 means full influence, 0.0 means none.",
                only.weight()
            ),
            many => {
                let listed = many
                    .iter()
                    .enumerate()
                    .map(|(i, s)| format!("Style Image #{} has an influence weight of {:.1}/1.0", i + 1, s.weight()))
                    .collect::<Vec<_>>()
                    .join("; ");
                format!(
                    "The {} images after the plan are style references, each with an influence weight. Blend their materials, color palettes, lighting, furniture and mood into one cohesive render; higher weights dominate. The references are: {}.",
                    many.len(),
                    listed
                )
            }
        }
    }

    pub fn build_render_prompt(styles: &[StyleReference], settings: &Settings) -> String {
        let geometry = if settings.lock_structure {
            "PRESERVE GEOMETRY: The first image is the 2D floor plan. Do not alter its structure, layout, walls, doors or windows; the render must match the plan exactly."
        } else {
            "FOLLOW THE LAYOUT: The first image is the 2D floor plan. Keep its room layout, minor structural liberties are acceptable."
        };
        format!(
            "You are an expert architectural visualization AI converting a 2D floor plan into an ultra-realistic 3D render.\n\nRULES:\n1. {geometry}\n2. APPLY STYLE: {style}\n3. SETTINGS: Lighting '{lighting}'. Output quality suitable for a '{resolution}' display. Aspect ratio MUST be {aspect}. Surface smoothing strength {denoise:.2} (0 keeps fine detail, 1 is very smooth).\n4. OUTPUT: One high-quality photorealistic 3D rendering from an isometric or eye-level perspective.",
            style = Self::style_clause(styles),
            lighting = settings.lighting_preset.as_str(),
            resolution = settings.resolution.as_str(),
            aspect = settings.aspect_ratio.as_str(),
            denoise = settings.denoising,
        )
    }
}

fn inline_part(media: &MediaPayload) -> Value {
    json!({ "inlineData": { "data": media.base64(), "mimeType": media.mime_type } })
}

#[async_trait]
impl Gateway for GeminiClient {
    async fn render_plan(&self, plan: &MediaPayload, styles: &[StyleReference], settings: &Settings) -> Result<Artifact, GatewayError> {
        if self.is_demo() {
            info!("Using demo mode - no real render generated");
            return Ok(self.placeholder("🏠 3D Render", settings.lighting_preset as usize + styles.len()));
        }
        info!("🎯 Rendering plan with {} style reference(s), lighting '{}'", styles.len(), settings.lighting_preset.as_str());
        let mut parts = vec![inline_part(plan)];
        parts.extend(styles.iter().map(|s| inline_part(&s.image)));
        parts.push(json!({ "text": Self::build_render_prompt(styles, settings) }));
        self.generate_image_content(parts).await
    }

    async fn edit_artifact(&self, image: &MediaPayload, instruction: &str) -> Result<Artifact, GatewayError> {
        if self.is_demo() {
            info!("Using demo mode - no real edit generated");
            return Ok(self.placeholder("✨ Enhanced Render", instruction.len()));
        }
        info!("🎯 Editing image with instruction: {}", instruction.chars().take(100).collect::<String>());
        self.generate_image_content(vec![inline_part(image), json!({ "text": instruction })]).await
    }

    async fn generate_images(&self, prompt: &str, count: u8, aspect_ratio: AspectRatio) -> Result<Vec<Artifact>, GatewayError> {
        if self.is_demo() {
            info!("Using demo mode - generating {} placeholder image(s)", count);
            return Ok((0..count as usize).map(|i| self.placeholder("🖼️ Generated Image", prompt.len() + i)).collect());
        }
        let url = self.model_url(TEXT_TO_IMAGE_MODEL, "predict");
        let body = json!({
            "instances": [{ "prompt": prompt }],
            "parameters": { "sampleCount": count, "aspectRatio": aspect_ratio.as_str(), "outputMimeType": "image/png" }
        });
        let text = self.post_json(&url, &body).await?;
        let parsed: PredictResponse = serde_json::from_str(&text).map_err(|e| GatewayError::Parse(e.to_string()))?;
        let images = extract_predictions(parsed)?;
        info!("✅ Generated {} image(s)", images.len());
        Ok(images.into_iter().map(Artifact::image).collect())
    }

    async fn generate_video(&self, image: &MediaPayload, prompt: &str, aspect_ratio: VideoAspectRatio, on_progress: ProgressFn<'_>) -> Result<Artifact, GatewayError> {
        if self.is_demo() {
            return Err(GatewayError::OperationError("video generation needs GEMINI_API_KEY; demo mode only produces placeholder images".into()));
        }
        on_progress("Starting video generation...".into());
        let mut operation = self.start_video(image, prompt, aspect_ratio).await?;
        on_progress("Video job initiated. This may take a few minutes...".into());

        let max = self.polling.max_attempts;
        let mut attempts = 0;
        while !operation.done && attempts < max {
            tokio::time::sleep(self.polling.interval).await;
            on_progress(format!("Checking status ({}/{})...", attempts + 1, max));
            operation = self.poll_video(&operation).await?;
            attempts += 1;
        }

        if !operation.done {
            warn!("⏱️ Video operation {} still running after {} polls", operation.name, max);
            return Err(GatewayError::Timeout);
        }
        if let Some(err) = operation.error {
            return Err(GatewayError::OperationError(err.message));
        }
        let uri = operation
            .video_uri()
            .ok_or_else(|| GatewayError::TransportFailure("video generation completed, but no download link was found".into()))?;

        on_progress("Fetching generated video...".into());
        let media = self.download(&uri).await?;
        info!("✅ Video downloaded ({} bytes)", media.data.len());
        Ok(Artifact::video(media))
    }
}

// --- Response Parsing Helpers ---

#[derive(Debug, Deserialize)]
struct GeminiResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
    #[serde(default, rename = "promptFeedback")]
    prompt_feedback: Option<PromptFeedback>,
}

#[derive(Debug, Deserialize)]
struct PromptFeedback {
    #[serde(default, rename = "blockReason")]
    block_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Candidate { #[serde(default)] content: Content }

#[derive(Debug, Deserialize, Default)]
struct Content { #[serde(default)] parts: Vec<Part> }

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum Part {
    Inline {
        #[serde(rename = "inlineData")]
        inline_data: InlineData
    },
    Text { text: String },
    #[allow(dead_code)]
    Other(Value)
}

#[derive(Debug, Deserialize)]
struct InlineData {
    data: String,
    #[serde(rename = "mimeType")]
    mime_type: String,
}

fn decode_b64(data: &str) -> Result<Vec<u8>, GatewayError> {
    base64::engine::general_purpose::STANDARD
        .decode(data)
        .map_err(|e| GatewayError::Parse(format!("invalid base64 payload: {}", e)))
}

fn extract_image(resp: &GeminiResponse) -> Result<MediaPayload, GatewayError> {
    let Some(candidate) = resp.candidates.first() else {
        return match resp.prompt_feedback.as_ref().and_then(|f| f.block_reason.clone()) {
            Some(reason) => Err(GatewayError::BlockedContent(reason)),
            None => Err(GatewayError::NoContent),
        };
    };
    for p in &candidate.content.parts {
        if let Part::Inline { inline_data } = p {
            info!("🎯 Found image data with mime type: {}", inline_data.mime_type);
            return Ok(MediaPayload::new(inline_data.mime_type.clone(), decode_b64(&inline_data.data)?));
        }
    }
    for p in &candidate.content.parts {
        if let Part::Text { text } = p {
            error!("❌ Model returned text instead of an image: {}", text);
            return Err(GatewayError::NonImageResponse(text.chars().take(150).collect()));
        }
    }
    info!("⚠️ No inline image data found in response structure");
    Err(GatewayError::NoContent)
}

#[derive(Debug, Deserialize)]
struct PredictResponse {
    #[serde(default)]
    predictions: Vec<Prediction>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Prediction {
    #[serde(default)]
    bytes_base64_encoded: Option<String>,
    #[serde(default)]
    mime_type: Option<String>,
    #[serde(default)]
    rai_filtered_reason: Option<String>,
}

fn extract_predictions(resp: PredictResponse) -> Result<Vec<MediaPayload>, GatewayError> {
    let mut images = Vec::new();
    let mut blocked = None;
    for p in resp.predictions {
        match p.bytes_base64_encoded {
            Some(data) => images.push(MediaPayload::new(
                p.mime_type.unwrap_or_else(|| "image/png".into()),
                decode_b64(&data)?,
            )),
            None => blocked = blocked.or(p.rai_filtered_reason),
        }
    }
    if images.is_empty() {
        return Err(match blocked {
            Some(reason) => GatewayError::BlockedContent(reason),
            None => GatewayError::NoContent,
        });
    }
    Ok(images)
}

#[derive(Debug, Deserialize)]
struct Operation {
    name: String,
    #[serde(default)]
    done: bool,
    #[serde(default)]
    error: Option<OperationFailure>,
    #[serde(default)]
    response: Option<Value>,
}

#[derive(Debug, Deserialize)]
struct OperationFailure {
    #[serde(default)]
    message: String,
}

impl Operation {
    fn video_uri(&self) -> Option<String> {
        self.response
            .as_ref()?
            .pointer("/generateVideoResponse/generatedSamples/0/video/uri")
            .and_then(Value::as_str)
            .map(str::to_string)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::LightingPreset;

    fn parse(raw: &str) -> GeminiResponse {
        serde_json::from_str(raw).unwrap()
    }

    fn style(weight: Option<f32>) -> StyleReference {
        let s = StyleReference::new(MediaPayload::new("image/png", vec![0]));
        match weight {
            Some(w) => s.with_weight(w),
            None => s,
        }
    }

    #[test]
    fn extracts_inline_image() {
        let resp = parse(r#"{"candidates":[{"content":{"parts":[{"text":"here"},{"inlineData":{"mimeType":"image/png","data":"AQID"}}]}}]}"#);
        let media = extract_image(&resp).unwrap();
        assert_eq!(media.mime_type, "image/png");
        assert_eq!(media.data.as_ref(), &[1, 2, 3]);
    }

    #[test]
    fn long_base64_is_truncated_and_other_text_left_alone() {
        let mut v = json!({ "inlineData": { "data": "A".repeat(200) }, "note": "é".repeat(200) });
        v["parts"] = json!([{ "data": "é".repeat(120) }]);
        truncate_base64_in_json(&mut v);
        assert_eq!(v["inlineData"]["data"], format!("{}...[truncated 150 chars]", "A".repeat(50)));
        assert_eq!(v["parts"][0]["data"], "é".repeat(120));
        assert_eq!(v["note"], "é".repeat(200));
    }

    #[test]
    fn empty_candidates_with_block_reason_is_blocked() {
        let resp = parse(r#"{"candidates":[],"promptFeedback":{"blockReason":"SAFETY"}}"#);
        assert!(matches!(extract_image(&resp), Err(GatewayError::BlockedContent(r)) if r == "SAFETY"));
        let resp = parse(r#"{}"#);
        assert!(matches!(extract_image(&resp), Err(GatewayError::NoContent)));
    }

    #[test]
    fn text_only_answer_is_non_image() {
        let long = "x".repeat(400);
        let resp = parse(&format!(r#"{{"candidates":[{{"content":{{"parts":[{{"text":"{long}"}}]}}}}]}}"#));
        match extract_image(&resp) {
            Err(GatewayError::NonImageResponse(t)) => assert_eq!(t.len(), 150),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn predictions_report_filtering() {
        let resp: PredictResponse = serde_json::from_str(r#"{"predictions":[{"raiFilteredReason":"blocked"}]}"#).unwrap();
        assert!(matches!(extract_predictions(resp), Err(GatewayError::BlockedContent(_))));
        let resp: PredictResponse = serde_json::from_str(r#"{"predictions":[{"bytesBase64Encoded":"AQ==","mimeType":"image/png"},{"bytesBase64Encoded":"Ag=="}]}"#).unwrap();
        let images = extract_predictions(resp).unwrap();
        assert_eq!(images.len(), 2);
        assert_eq!(images[1].data.as_ref(), &[2]);
    }

    #[test]
    fn operation_exposes_video_uri() {
        let op: Operation = serde_json::from_str(r#"{"name":"ops/1","done":true,"response":{"generateVideoResponse":{"generatedSamples":[{"video":{"uri":"https://x/v?alt=media"}}]}}}"#).unwrap();
        assert_eq!(op.video_uri().as_deref(), Some("https://x/v?alt=media"));
    }

    #[test]
    fn style_clause_defaults_unset_weights() {
        assert!(GeminiClient::style_clause(&[]).contains("minimalist"));
        assert!(GeminiClient::style_clause(&[style(None)]).contains("weight of 1.0 out of 1.0"));
        let blended = GeminiClient::style_clause(&[style(Some(0.3)), style(None)]);
        assert!(blended.contains("Style Image #1 has an influence weight of 0.3/1.0"));
        assert!(blended.contains("Style Image #2 has an influence weight of 1.0/1.0"));
        assert_eq!(GeminiClient::style_clause(&[style(None)]), GeminiClient::style_clause(&[style(Some(1.0))]));
    }

    #[test]
    fn render_prompt_carries_settings() {
        let settings = Settings { lighting_preset: LightingPreset::GoldenHour, ..Settings::default() };
        let prompt = GeminiClient::build_render_prompt(&[], &settings);
        assert!(prompt.contains("Lighting 'golden hour'"));
        assert!(prompt.contains("'2k' display"));
        assert!(prompt.contains("MUST be 16:9"));
        assert!(prompt.contains("PRESERVE GEOMETRY"));
    }

    #[test]
    fn truncates_large_payloads_for_logs() {
        let mut v = json!({ "inlineData": { "data": "A".repeat(500) } });
        truncate_base64_in_json(&mut v);
        assert!(v["inlineData"]["data"].as_str().unwrap().contains("truncated 450 chars"));
    }

    #[tokio::test]
    async fn demo_mode_answers_with_placeholders() {
        let client = GeminiClient::new(None);
        let plan = MediaPayload::new("image/png", vec![1]);
        let art = client.render_plan(&plan, &[], &Settings::default()).await.unwrap();
        assert_eq!(art.media.mime_type, "image/svg+xml");
        let images = client.generate_images("a chair", 3, AspectRatio::Square).await.unwrap();
        assert_eq!(images.len(), 3);
    }
}
