//! Orchestration of the render workflow.
//!
//! The controller is the only caller of the [`Gateway`] and the only writer of
//! the session (workspace inputs, edit history, batch queue, current view).
//! Session state sits behind one mutex that is never held across an await, so
//! every completion is applied as a single atomic step.
//!
//! There is no cancellation: leaving the workflow or removing a batch job only
//! discards interest in a result. The gateway call itself runs to completion.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde::Serialize;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::batch::{BatchQueue, Next, Settled};
use crate::config::Timings;
use crate::error::{ControllerError, GatewayError};
use crate::gateway::Gateway;
use crate::history::{EditHistory, Step};
use crate::models::{
    Artifact, ArtifactSummary, AspectRatio, JobStatus, JobView, MediaPayload, Settings,
    StyleReference, Upload, VideoAspectRatio,
};
use crate::presets::Preset;
use crate::workspace::{Workspace, WorkspaceView};

pub const DEFAULT_ANIMATE_PROMPT: &str = "Animate this image with cinematic motion.";

#[derive(Debug, Serialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum Phase {
    Idle,
    SingleGenerating,
    BatchRunning,
}

#[derive(Default)]
struct Session {
    workspace: Workspace,
    history: EditHistory,
    queue: BatchQueue,
    /// What the render view shows: the history cursor, or the latest batch result.
    current: Option<Artifact>,
    image_results: Vec<Artifact>,
    video_result: Option<Artifact>,
    single_in_flight: bool,
    /// Bumped whenever the render session is discarded; late results from an
    /// older epoch are dropped.
    epoch: u64,
    status: String,
    progress: u8,
    progress_epoch: u64,
    error: Option<String>,
}

impl Session {
    fn phase(&self) -> Phase {
        if self.queue.is_running() {
            Phase::BatchRunning
        } else if self.single_in_flight {
            Phase::SingleGenerating
        } else {
            Phase::Idle
        }
    }

    fn ensure_idle(&self) -> Result<(), ControllerError> {
        match self.phase() {
            Phase::Idle => Ok(()),
            _ => Err(ControllerError::Busy),
        }
    }

    fn set_progress(&mut self, pct: u8) {
        self.progress = pct;
        self.progress_epoch += 1;
    }

    fn set_status(&mut self, message: impl Into<String>) {
        self.status = message.into();
    }

    fn discard_render(&mut self) {
        self.history.reset();
        self.current = None;
        self.epoch += 1;
    }
}

/// Clears the single-generation flag even if the caller's future is dropped.
struct SingleFlight<'a> {
    controller: &'a Controller,
}

impl Drop for SingleFlight<'_> {
    fn drop(&mut self) {
        self.controller.session.lock().single_in_flight = false;
    }
}

#[derive(Debug, Serialize, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct HistoryView {
    pub len: usize,
    pub cursor: isize,
    pub can_undo: bool,
    pub can_redo: bool,
}

#[derive(Debug, Serialize, Clone)]
#[serde(rename_all = "camelCase")]
pub struct BatchView {
    pub running: bool,
    pub active_index: isize,
    /// Jobs that are Completed or Failed.
    pub settled: usize,
    pub jobs: Vec<JobView>,
}

#[derive(Debug, Serialize, Clone)]
#[serde(rename_all = "camelCase")]
pub struct StateView {
    pub phase: Phase,
    pub status: String,
    pub progress: u8,
    pub error: Option<String>,
    pub current: Option<ArtifactSummary>,
    pub history: HistoryView,
    pub batch: BatchView,
    pub workspace: WorkspaceView,
    pub image_results: Vec<ArtifactSummary>,
    pub video: Option<ArtifactSummary>,
}

pub struct Controller {
    gateway: Arc<dyn Gateway>,
    timings: Timings,
    session: Mutex<Session>,
}

impl Controller {
    pub fn new(gateway: Arc<dyn Gateway>, timings: Timings) -> Arc<Self> {
        Arc::new(Self { gateway, timings, session: Mutex::default() })
    }

    pub fn phase(&self) -> Phase {
        self.session.lock().phase()
    }

    // --- Single generations ---

    /// Renders the workspace plan with the live styles and settings. On
    /// success the result becomes the new base of the edit history. A result
    /// that lands after the session was discarded is dropped with
    /// [`ControllerError::Discarded`].
    pub async fn render(self: &Arc<Self>) -> Result<ArtifactSummary, ControllerError> {
        let (plan, styles, settings, epoch) = {
            let mut s = self.session.lock();
            s.ensure_idle()?;
            let plan = s.workspace.plan().cloned().ok_or(ControllerError::MissingInput("plan"))?;
            s.single_in_flight = true;
            s.error = None;
            s.set_status("Generating 3D render...");
            s.set_progress(10);
            (plan, s.workspace.style_references(), s.workspace.settings(), s.epoch)
        };
        let _flight = SingleFlight { controller: self };

        self.progress_in(epoch, 30);
        info!("🚀 Rendering plan ({} style reference(s))", styles.len());
        let result = self.gateway.render_plan(&plan, &styles, &settings).await;

        let outcome = {
            let mut s = self.session.lock();
            if s.epoch != epoch {
                return Err(discarded("Render", result.map(|a| a.id)));
            }
            let outcome = match result {
                Ok(artifact) => {
                    s.set_progress(90);
                    s.history.reset();
                    s.history.push(artifact.clone());
                    s.current = Some(artifact.clone());
                    s.set_status("Render complete!");
                    info!("✅ Render complete: {}", artifact.id);
                    Ok(artifact.summary())
                }
                Err(e) => {
                    let err = ControllerError::gateway("Render", e);
                    error!("❌ {}", err);
                    s.set_status("Render failed.");
                    s.error = Some(err.to_string());
                    Err(err)
                }
            };
            s.set_progress(100);
            outcome
        };
        self.schedule_progress_reset(self.timings.progress_grace);
        outcome
    }

    /// Applies a natural-language edit to the artifact at the history cursor.
    pub async fn enhance(self: &Arc<Self>, prompt: &str) -> Result<ArtifactSummary, ControllerError> {
        let prompt = prompt.trim();
        if prompt.is_empty() {
            return Err(ControllerError::MissingInput("enhancement prompt"));
        }
        let (target, epoch) = {
            let mut s = self.session.lock();
            s.ensure_idle()?;
            let target = s.history.current().cloned().ok_or(ControllerError::MissingInput("render to enhance"))?;
            s.single_in_flight = true;
            s.error = None;
            s.set_status("Enhancing image with AI...");
            s.set_progress(10);
            (target, s.epoch)
        };
        let _flight = SingleFlight { controller: self };

        self.progress_in(epoch, 30);
        let result = self.gateway.edit_artifact(&target.media, prompt).await;

        let outcome = {
            let mut s = self.session.lock();
            if s.epoch != epoch {
                return Err(discarded("Enhancement", result.map(|a| a.id)));
            }
            let outcome = match result {
                Ok(artifact) => {
                    s.history.push(artifact.clone());
                    s.current = Some(artifact.clone());
                    s.set_status("Enhancement complete!");
                    s.set_progress(90);
                    info!("✅ Enhancement complete: {} (history length {})", artifact.id, s.history.len());
                    Ok(artifact.summary())
                }
                Err(e) => {
                    let err = ControllerError::gateway("Enhancement", e);
                    error!("❌ {}", err);
                    s.set_status("Enhancement failed.");
                    s.error = Some(err.to_string());
                    Err(err)
                }
            };
            s.set_progress(100);
            outcome
        };
        self.schedule_progress_reset(self.timings.progress_grace);
        outcome
    }

    pub fn undo(&self) -> Result<Step, ControllerError> {
        self.navigate(EditHistory::undo)
    }

    pub fn redo(&self) -> Result<Step, ControllerError> {
        self.navigate(EditHistory::redo)
    }

    fn navigate(&self, step: fn(&mut EditHistory) -> Step) -> Result<Step, ControllerError> {
        let mut s = self.session.lock();
        s.ensure_idle()?;
        let moved = step(&mut s.history);
        s.error = None;
        if let Step::Moved(_) = moved {
            s.current = s.history.current().cloned();
        }
        Ok(moved)
    }

    pub fn dismiss_error(&self) {
        self.session.lock().error = None;
    }

    /// Throws away the current render and its history.
    pub fn discard_render(&self) {
        self.session.lock().discard_render();
    }

    pub async fn generate_images(
        self: &Arc<Self>,
        prompt: &str,
        count: u8,
        aspect_ratio: AspectRatio,
    ) -> Result<Vec<ArtifactSummary>, ControllerError> {
        let prompt = prompt.trim();
        if prompt.is_empty() {
            return Err(ControllerError::MissingInput("image prompt"));
        }
        if !(1..=4).contains(&count) {
            return Err(ControllerError::InvalidInput(format!("image count must be between 1 and 4, got {}", count)));
        }
        let epoch = {
            let mut s = self.session.lock();
            s.ensure_idle()?;
            s.single_in_flight = true;
            s.image_results.clear();
            s.error = None;
            s.set_status(format!("Generating {} image(s)...", count));
            s.set_progress(10);
            s.epoch
        };
        let _flight = SingleFlight { controller: self };

        let result = self.gateway.generate_images(prompt, count, aspect_ratio).await;

        let outcome = {
            let mut s = self.session.lock();
            if s.epoch != epoch {
                return Err(discarded("Image generation", result.map(|images| images.len())));
            }
            match result {
                Ok(images) => {
                    let summaries = images.iter().map(Artifact::summary).collect();
                    s.image_results = images;
                    s.set_status("Image generation complete!");
                    s.set_progress(100);
                    Ok(summaries)
                }
                Err(e) => {
                    let err = ControllerError::gateway("Image generation", e);
                    error!("❌ {}", err);
                    s.set_status("Image generation failed.");
                    s.error = Some(err.to_string());
                    Err(err)
                }
            }
        };
        self.schedule_progress_reset(self.timings.media_progress_grace);
        outcome
    }

    /// Turns the animate image into a short video, reporting poll progress
    /// through the status text.
    pub async fn animate(
        self: &Arc<Self>,
        prompt: Option<&str>,
        aspect_ratio: VideoAspectRatio,
    ) -> Result<ArtifactSummary, ControllerError> {
        let prompt = prompt.map(str::trim).filter(|p| !p.is_empty()).unwrap_or(DEFAULT_ANIMATE_PROMPT).to_string();
        let (image, epoch) = {
            let mut s = self.session.lock();
            s.ensure_idle()?;
            let image = s.workspace.animate_image().cloned().ok_or(ControllerError::MissingInput("image to animate"))?;
            s.single_in_flight = true;
            s.video_result = None;
            s.error = None;
            s.set_status("Initializing video generation...");
            s.set_progress(0);
            (image, s.epoch)
        };
        let _flight = SingleFlight { controller: self };

        let on_progress = |message: String| {
            let mut s = self.session.lock();
            if s.epoch != epoch {
                return;
            }
            s.status = message;
            let next = s.progress.saturating_add(5).min(95);
            s.set_progress(next);
        };
        let result = self.gateway.generate_video(&image, &prompt, aspect_ratio, &on_progress).await;

        let outcome = {
            let mut s = self.session.lock();
            if s.epoch != epoch {
                return Err(discarded("Video generation", result.map(|v| v.id)));
            }
            match result {
                Ok(video) => {
                    let summary = video.summary();
                    s.video_result = Some(video);
                    s.set_status("Video generation complete!");
                    s.set_progress(100);
                    Ok(summary)
                }
                Err(e) => {
                    let err = ControllerError::gateway("Video generation", e);
                    error!("❌ {}", err);
                    s.set_status(err.to_string());
                    s.error = Some(err.to_string());
                    Err(err)
                }
            }
        };
        self.schedule_progress_reset(self.timings.media_progress_grace);
        outcome
    }

    // --- Batch ---

    /// Queues the live settings and style references as an independent job.
    pub fn add_to_batch(&self) -> String {
        let mut s = self.session.lock();
        let settings = s.workspace.settings();
        let styles = s.workspace.style_references();
        s.queue.enqueue(settings, styles)
    }

    pub fn remove_from_batch(&self, job_id: &str) -> Result<(), ControllerError> {
        if self.session.lock().queue.remove(job_id) {
            Ok(())
        } else {
            Err(ControllerError::NotFound("batch job"))
        }
    }

    pub fn clear_batch(&self) -> Result<(), ControllerError> {
        let mut s = self.session.lock();
        if s.queue.is_running() {
            return Err(ControllerError::BatchActive);
        }
        s.queue.clear();
        Ok(())
    }

    /// Starts a sequential run over the queue in a background task.
    ///
    /// The render view and its history are cleared once here; completed jobs
    /// are then mirrored into the view without entering the history.
    pub fn start_batch(self: &Arc<Self>) -> Result<JoinHandle<()>, ControllerError> {
        let run_id = {
            let mut s = self.session.lock();
            if s.single_in_flight {
                return Err(ControllerError::Busy);
            }
            if s.queue.is_running() {
                return Err(ControllerError::BatchActive);
            }
            let run_id = s.queue.start().ok_or(ControllerError::MissingInput("batch jobs"))?;
            s.discard_render();
            s.error = None;
            info!("🚀 Starting batch run {} over {} job(s)", run_id, s.queue.len());
            run_id
        };
        let this = Arc::clone(self);
        Ok(tokio::spawn(async move { this.run_batch(run_id).await }))
    }

    async fn run_batch(self: Arc<Self>, run_id: u64) {
        loop {
            let (index, job, plan) = {
                let mut s = self.session.lock();
                let plan = s.workspace.plan().cloned();
                let total = s.queue.len();
                match s.queue.begin_active(run_id, plan.is_some()) {
                    Next::Stale => return,
                    Next::Finished => {
                        info!("✅ Batch run {} complete", run_id);
                        s.set_status("Batch rendering complete!");
                        drop(s);
                        self.schedule_progress_reset(self.timings.progress_grace);
                        return;
                    }
                    Next::Aborted => {
                        warn!("⚠️ Plan missing, aborting batch run {}", run_id);
                        s.set_status("Error: Plan file is missing. Stopping batch.");
                        s.set_progress(0);
                        return;
                    }
                    Next::Render { index, job } => {
                        s.set_status(format!("Batch rendering job {} of {}...", index + 1, total));
                        s.set_progress(10);
                        // begin_active only hands out a job when the plan is present
                        let Some(plan) = plan else { return };
                        (index, job, plan)
                    }
                }
            };

            {
                let mut s = self.session.lock();
                if s.queue.is_current(run_id) {
                    s.set_progress(30);
                }
            }
            let result = self.gateway.render_plan(&plan, &job.style_references, &job.settings).await;

            {
                let mut s = self.session.lock();
                let artifact = match result {
                    Ok(a) => Some(a),
                    Err(e) => {
                        error!("❌ Batch job {} failed: {}", job.id, e);
                        None
                    }
                };
                match s.queue.settle(run_id, &job.id, artifact.clone()) {
                    Settled::Applied { status: JobStatus::Completed, .. } => {
                        s.set_progress(90);
                        s.current = artifact;
                        s.set_progress(100);
                        info!("✅ Batch job {} ({}) completed", index + 1, job.id);
                    }
                    Settled::Applied { .. } => {
                        s.set_status(format!("Job {} failed. See logs for details.", index + 1));
                        s.set_progress(100);
                    }
                    Settled::Discarded => {
                        info!("🗑️ Discarding result of batch job {} (no longer queued)", job.id);
                    }
                }
            }

            if !self.timings.batch_step_delay.is_zero() {
                tokio::time::sleep(self.timings.batch_step_delay).await;
            }
        }
    }

    // --- Workspace ---

    pub fn set_plan(&self, upload: Upload) -> Result<Uuid, ControllerError> {
        self.session.lock().workspace.set_plan(upload)
    }

    pub fn clear_plan(&self) {
        self.session.lock().workspace.clear_plan();
    }

    pub fn add_styles(&self, uploads: Vec<Upload>) -> Result<usize, ControllerError> {
        self.session.lock().workspace.add_styles(uploads)
    }

    pub fn set_style_weight(&self, index: usize, weight: f32) -> Result<(), ControllerError> {
        self.session.lock().workspace.set_style_weight(index, weight)
    }

    pub fn remove_style(&self, index: usize) -> Result<(), ControllerError> {
        self.session.lock().workspace.remove_style(index)
    }

    pub fn reorder_style(&self, from: usize, to: usize) -> Result<(), ControllerError> {
        self.session.lock().workspace.reorder_style(from, to)
    }

    pub fn settings(&self) -> Settings {
        self.session.lock().workspace.settings()
    }

    pub fn set_settings(&self, settings: Settings) -> Settings {
        let mut s = self.session.lock();
        s.workspace.set_settings(settings);
        s.workspace.settings()
    }

    pub fn set_animate_image(&self, upload: Upload) -> Result<Uuid, ControllerError> {
        self.session.lock().workspace.set_animate_image(upload)
    }

    /// Live settings and style references, as a preset would store them.
    pub fn preset_inputs(&self) -> (Settings, Vec<StyleReference>) {
        let s = self.session.lock();
        (s.workspace.settings(), s.workspace.style_references())
    }

    pub fn apply_preset(&self, preset: &Preset) {
        self.session.lock().workspace.load_preset(preset);
    }

    /// Leaves the workflow: every input, result, queued job and error is dropped.
    pub fn reset_session(&self) {
        let mut s = self.session.lock();
        s.workspace.reset();
        s.discard_render();
        s.queue.discard();
        s.image_results.clear();
        s.video_result = None;
        s.error = None;
        s.set_status("");
        s.set_progress(0);
        info!("🧹 Session reset");
    }

    // --- Views ---

    pub fn current(&self) -> Option<Artifact> {
        self.session.lock().current.clone()
    }

    pub fn artifact(&self, id: Uuid) -> Option<Artifact> {
        let s = self.session.lock();
        s.current
            .iter()
            .chain(s.history.entries())
            .chain(s.queue.jobs().iter().filter_map(|j| j.result.as_ref()))
            .chain(s.image_results.iter())
            .chain(s.video_result.iter())
            .find(|a| a.id == id)
            .cloned()
    }

    pub fn preview(&self, id: Uuid) -> Option<MediaPayload> {
        self.session.lock().workspace.preview(id).cloned()
    }

    pub fn snapshot(&self) -> StateView {
        let s = self.session.lock();
        StateView {
            phase: s.phase(),
            status: s.status.clone(),
            progress: s.progress,
            error: s.error.clone(),
            current: s.current.as_ref().map(Artifact::summary),
            history: HistoryView {
                len: s.history.len(),
                cursor: s.history.cursor(),
                can_undo: s.history.can_undo(),
                can_redo: s.history.can_redo(),
            },
            batch: BatchView {
                running: s.queue.is_running(),
                active_index: s.queue.active_index(),
                settled: s.queue.jobs().iter().filter(|j| j.status.is_settled()).count(),
                jobs: s.queue.jobs().iter().map(JobView::from).collect(),
            },
            workspace: s.workspace.view(),
            image_results: s.image_results.iter().map(Artifact::summary).collect(),
            video: s.video_result.as_ref().map(Artifact::summary),
        }
    }

    /// Moves progress forward unless the session was discarded since `epoch`.
    fn progress_in(&self, epoch: u64, pct: u8) {
        let mut s = self.session.lock();
        if s.epoch == epoch {
            s.set_progress(pct);
        }
    }

    /// Drops progress back to 0 after `delay`, unless it moved again meanwhile.
    fn schedule_progress_reset(self: &Arc<Self>, delay: Duration) {
        let epoch = self.session.lock().progress_epoch;
        if delay.is_zero() {
            let mut s = self.session.lock();
            if s.progress_epoch == epoch {
                s.progress = 0;
            }
            return;
        }
        let deadline = Instant::now() + delay;
        let this = Arc::clone(self);
        tokio::spawn(async move {
            tokio::time::sleep_until(deadline).await;
            let mut s = this.session.lock();
            if s.progress_epoch == epoch {
                s.progress = 0;
            }
        });
    }
}

/// Logs a generation whose session was discarded while it ran.
fn discarded<T: std::fmt::Debug>(action: &str, result: Result<T, GatewayError>) -> ControllerError {
    match result {
        Ok(produced) => info!("🗑️ {} finished after the session was discarded ({:?})", action, produced),
        Err(e) => warn!("🗑️ {} failed after the session was discarded: {}", action, e),
    }
    ControllerError::Discarded
}
