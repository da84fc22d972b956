use chrono::Utc;
use tracing::{info, warn};
use uuid::Uuid;

use crate::models::{Artifact, BatchJob, JobStatus, Settings, StyleReference};

/// Ordered render jobs plus the pointer to the one being processed.
///
/// The queue is passive: the controller drives a run by calling
/// [`BatchQueue::begin_active`] and [`BatchQueue::settle`] alternately.
#[derive(Debug, Default)]
pub struct BatchQueue {
    jobs: Vec<BatchJob>,
    active_index: Option<usize>,
    running: bool,
    run_id: u64,
}

/// What the run loop should do next.
#[derive(Debug)]
pub enum Next {
    /// Job at `index` was flipped to Rendering; call the gateway with this snapshot.
    Render { index: usize, job: BatchJob },
    /// Every job has been visited; the run is now inactive.
    Finished,
    /// The shared plan was missing; every unfinished job was failed.
    Aborted,
    /// The run this loop belongs to is gone (cleared, restarted or aborted).
    Stale,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Settled {
    Applied { index: usize, status: JobStatus },
    /// The job was removed while in flight.
    Discarded,
}

impl BatchQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn enqueue(&mut self, settings: Settings, style_references: Vec<StyleReference>) -> String {
        let id = Uuid::new_v4().to_string();
        self.jobs.push(BatchJob {
            id: id.clone(),
            settings,
            style_references,
            status: JobStatus::Queued,
            result: None,
            created_at: Utc::now(),
        });
        info!("📥 Queued batch job {} ({} in queue)", id, self.jobs.len());
        id
    }

    /// Removes a job at any time. Returns `false` if no job had that id.
    ///
    /// An in-flight removal does not stop the gateway call; its eventual
    /// settlement is discarded.
    pub fn remove(&mut self, job_id: &str) -> bool {
        let Some(pos) = self.position(job_id) else {
            return false;
        };
        let job = self.jobs.remove(pos);
        if let Some(active) = self.active_index {
            if pos < active {
                self.active_index = Some(active - 1);
            }
        }
        if job.status == JobStatus::Rendering {
            warn!("🗑️ Removed batch job {} while rendering; its result will be discarded", job_id);
        }
        true
    }

    pub fn clear(&mut self) {
        debug_assert!(!self.running, "batch queue cleared during an active run");
        self.jobs.clear();
        self.active_index = None;
    }

    /// Drops every job and forgets any active run.
    pub fn discard(&mut self) {
        self.jobs.clear();
        self.active_index = None;
        self.running = false;
    }

    /// Starts a run. Returns the run id, or `None` if empty or already running.
    pub fn start(&mut self) -> Option<u64> {
        if self.jobs.is_empty() || self.running {
            return None;
        }
        self.run_id += 1;
        self.running = true;
        self.active_index = Some(0);
        Some(self.run_id)
    }

    /// Flips the job at the pointer to Rendering, unless the run is over or
    /// the shared plan has gone missing, in which case the run is aborted.
    pub fn begin_active(&mut self, run_id: u64, plan_present: bool) -> Next {
        if !self.is_current(run_id) {
            return Next::Stale;
        }
        let index = self.active_index.unwrap_or(0);
        if index >= self.jobs.len() {
            self.running = false;
            self.active_index = None;
            return Next::Finished;
        }
        if !plan_present {
            self.abort();
            return Next::Aborted;
        }
        let job = &mut self.jobs[index];
        job.status = JobStatus::Rendering;
        Next::Render { index, job: job.clone() }
    }

    /// Records the outcome of the in-flight job and advances the pointer past it.
    pub fn settle(&mut self, run_id: u64, job_id: &str, outcome: Option<Artifact>) -> Settled {
        if !self.is_current(run_id) {
            return Settled::Discarded;
        }
        let Some(pos) = self.position(job_id) else {
            return Settled::Discarded;
        };
        let job = &mut self.jobs[pos];
        if job.status == JobStatus::Rendering {
            job.status = if outcome.is_some() { JobStatus::Completed } else { JobStatus::Failed };
            job.result = outcome;
        }
        let status = job.status;
        self.active_index = Some(pos + 1);
        Settled::Applied { index: pos, status }
    }

    /// Stops the run because a shared input vanished. Unfinished jobs fail.
    pub fn abort(&mut self) {
        for job in &mut self.jobs {
            if matches!(job.status, JobStatus::Queued | JobStatus::Rendering) {
                job.status = JobStatus::Failed;
            }
        }
        self.running = false;
        self.active_index = None;
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    /// `-1` when idle.
    pub fn active_index(&self) -> isize {
        self.active_index.map_or(-1, |i| i as isize)
    }

    pub fn jobs(&self) -> &[BatchJob] {
        &self.jobs
    }

    pub fn get(&self, job_id: &str) -> Option<&BatchJob> {
        self.jobs.iter().find(|j| j.id == job_id)
    }

    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }

    pub fn is_current(&self, run_id: u64) -> bool {
        self.running && self.run_id == run_id
    }

    fn position(&self, job_id: &str) -> Option<usize> {
        self.jobs.iter().position(|j| j.id == job_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{LightingPreset, MediaPayload};
    use pretty_assertions::assert_eq;

    fn result() -> Option<Artifact> {
        Some(Artifact::image(MediaPayload::new("image/png", vec![7])))
    }

    fn statuses(q: &BatchQueue) -> Vec<JobStatus> {
        q.jobs().iter().map(|j| j.status).collect()
    }

    fn render_id(next: Next) -> String {
        match next {
            Next::Render { job, .. } => job.id,
            other => panic!("expected a job, got {other:?}"),
        }
    }

    #[test]
    fn enqueue_does_not_start() {
        let mut q = BatchQueue::new();
        let a = q.enqueue(Settings::default(), vec![]);
        let b = q.enqueue(Settings::default(), vec![]);
        assert_ne!(a, b);
        assert!(!q.is_running());
        assert_eq!(q.active_index(), -1);
        assert_eq!(statuses(&q), vec![JobStatus::Queued, JobStatus::Queued]);
    }

    #[test]
    fn start_requires_jobs_and_idle() {
        let mut q = BatchQueue::new();
        assert_eq!(q.start(), None);
        q.enqueue(Settings::default(), vec![]);
        assert!(q.start().is_some());
        assert_eq!(q.active_index(), 0);
        assert_eq!(q.start(), None);
    }

    #[test]
    fn failure_does_not_stop_the_run() {
        let mut q = BatchQueue::new();
        for _ in 0..3 {
            q.enqueue(Settings::default(), vec![]);
        }
        let run = q.start().unwrap();

        let id = render_id(q.begin_active(run, true));
        assert_eq!(q.settle(run, &id, result()), Settled::Applied { index: 0, status: JobStatus::Completed });
        let id = render_id(q.begin_active(run, true));
        assert_eq!(q.settle(run, &id, None), Settled::Applied { index: 1, status: JobStatus::Failed });
        let id = render_id(q.begin_active(run, true));
        q.settle(run, &id, result());

        assert!(matches!(q.begin_active(run, true), Next::Finished));
        assert_eq!(statuses(&q), vec![JobStatus::Completed, JobStatus::Failed, JobStatus::Completed]);
        assert_eq!(q.active_index(), -1);
        assert!(!q.is_running());
    }

    #[test]
    fn only_the_active_job_renders() {
        let mut q = BatchQueue::new();
        q.enqueue(Settings::default(), vec![]);
        q.enqueue(Settings::default(), vec![]);
        let run = q.start().unwrap();
        q.begin_active(run, true);
        assert_eq!(statuses(&q), vec![JobStatus::Rendering, JobStatus::Queued]);
        assert_eq!(q.jobs()[q.active_index() as usize].status, JobStatus::Rendering);
    }

    #[test]
    fn removing_in_flight_job_discards_its_result() {
        let mut q = BatchQueue::new();
        let first = q.enqueue(Settings::default(), vec![]);
        let second = q.enqueue(Settings::default(), vec![]);
        let run = q.start().unwrap();
        assert_eq!(render_id(q.begin_active(run, true)), first);

        assert!(q.remove(&first));
        assert_eq!(q.settle(run, &first, result()), Settled::Discarded);
        assert_eq!(render_id(q.begin_active(run, true)), second);
    }

    #[test]
    fn removing_settled_job_keeps_pointer_on_pending_work() {
        let mut q = BatchQueue::new();
        let first = q.enqueue(Settings::default(), vec![]);
        let second = q.enqueue(Settings::default(), vec![]);
        let run = q.start().unwrap();
        q.begin_active(run, true);
        q.settle(run, &first, result());
        assert_eq!(q.active_index(), 1);

        q.remove(&first);
        assert_eq!(q.active_index(), 0);
        assert_eq!(render_id(q.begin_active(run, true)), second);
    }

    #[test]
    fn abort_fails_unfinished_jobs_only() {
        let mut q = BatchQueue::new();
        let first = q.enqueue(Settings::default(), vec![]);
        q.enqueue(Settings::default(), vec![]);
        q.enqueue(Settings::default(), vec![]);
        let run = q.start().unwrap();
        q.begin_active(run, true);
        q.settle(run, &first, result());
        q.begin_active(run, true);

        q.abort();
        assert_eq!(statuses(&q), vec![JobStatus::Completed, JobStatus::Failed, JobStatus::Failed]);
        assert!(!q.is_running());
        assert_eq!(q.active_index(), -1);
        assert!(matches!(q.begin_active(run, true), Next::Stale));
    }

    #[test]
    fn missing_plan_aborts_before_rendering() {
        let mut q = BatchQueue::new();
        q.enqueue(Settings::default(), vec![]);
        q.enqueue(Settings::default(), vec![]);
        let run = q.start().unwrap();
        assert!(matches!(q.begin_active(run, false), Next::Aborted));
        assert_eq!(statuses(&q), vec![JobStatus::Failed, JobStatus::Failed]);
        assert!(!q.is_running());
    }

    #[test]
    fn finished_run_ignores_missing_plan() {
        let mut q = BatchQueue::new();
        let id = q.enqueue(Settings::default(), vec![]);
        let run = q.start().unwrap();
        q.begin_active(run, true);
        q.settle(run, &id, result());
        assert!(matches!(q.begin_active(run, false), Next::Finished));
        assert_eq!(statuses(&q), vec![JobStatus::Completed]);
    }

    #[test]
    fn jobs_keep_their_snapshot() {
        let mut q = BatchQueue::new();
        let mut live = Settings { lighting_preset: LightingPreset::Night, ..Settings::default() };
        let mut styles = vec![StyleReference::new(MediaPayload::new("image/png", vec![1])).with_weight(0.3)];
        let id = q.enqueue(live, styles.clone());

        live.lighting_preset = LightingPreset::Sunny;
        styles[0].weight = Some(0.9);
        styles.clear();

        let job = q.get(&id).unwrap();
        assert_eq!(job.settings.lighting_preset, LightingPreset::Night);
        assert_eq!(job.style_references.len(), 1);
        assert_eq!(job.style_references[0].weight(), 0.3);
        let _ = live;
    }

    #[test]
    fn stale_run_cannot_settle() {
        let mut q = BatchQueue::new();
        let id = q.enqueue(Settings::default(), vec![]);
        let old = q.start().unwrap();
        q.begin_active(old, true);
        q.discard();
        let id2 = q.enqueue(Settings::default(), vec![]);
        let new = q.start().unwrap();
        assert_ne!(old, new);
        assert_eq!(q.settle(old, &id, result()), Settled::Discarded);
        assert_eq!(q.get(&id2).unwrap().status, JobStatus::Queued);
    }
}
