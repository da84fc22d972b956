use async_trait::async_trait;

use crate::error::GatewayError;
use crate::models::{AspectRatio, Artifact, MediaPayload, Settings, StyleReference, VideoAspectRatio};

/// Receives human-readable progress messages from long-running operations.
pub type ProgressFn<'a> = &'a (dyn Fn(String) + Send + Sync);

/// The AI generation boundary. One call, one result (or failure).
///
/// Implementations must not retry silently; callers decide what a failure means.
#[async_trait]
pub trait Gateway: Send + Sync {
    async fn render_plan(
        &self,
        plan: &MediaPayload,
        styles: &[StyleReference],
        settings: &Settings,
    ) -> Result<Artifact, GatewayError>;

    async fn edit_artifact(&self, image: &MediaPayload, instruction: &str) -> Result<Artifact, GatewayError>;

    /// `count` is 1..=4; results keep the provider's order.
    async fn generate_images(
        &self,
        prompt: &str,
        count: u8,
        aspect_ratio: AspectRatio,
    ) -> Result<Vec<Artifact>, GatewayError>;

    async fn generate_video(
        &self,
        image: &MediaPayload,
        prompt: &str,
        aspect_ratio: VideoAspectRatio,
        on_progress: ProgressFn<'_>,
    ) -> Result<Artifact, GatewayError>;
}
