pub mod playback;
pub mod synthesis;

pub use playback::{AudioSink, PlaybackEvent, PlaybackScheduler};
pub use synthesis::{
    AudioClip, ClipPayload, SpeechSynthesisQueue, SpeechSynthesizer, SynthesisHandle, SynthesisJob,
    SynthesizedAudio,
};

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

/// Shared pipeline counters backing the input-enable gating poll.
///
/// Producers bump `job_enqueued`/`clip_enqueued` before handing work to the
/// next stage, and consumers clear their side only after the hand-off, so a
/// quiescent observation never races a clip that is still in flight.
#[derive(Clone, Debug, Default)]
pub struct PipelineStatus {
    pending_jobs: Arc<AtomicUsize>,
    queued_clips: Arc<AtomicUsize>,
    playing: Arc<AtomicBool>,
}

impl PipelineStatus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn job_enqueued(&self) {
        self.pending_jobs.fetch_add(1, Ordering::SeqCst);
    }

    pub fn job_finished(&self) {
        self.pending_jobs.fetch_sub(1, Ordering::SeqCst);
    }

    pub fn clip_enqueued(&self) {
        self.queued_clips.fetch_add(1, Ordering::SeqCst);
    }

    pub fn clip_dequeued(&self) {
        self.queued_clips.fetch_sub(1, Ordering::SeqCst);
    }

    pub fn set_playing(&self, playing: bool) {
        self.playing.store(playing, Ordering::SeqCst);
    }

    pub fn pending_jobs(&self) -> usize {
        self.pending_jobs.load(Ordering::SeqCst)
    }

    pub fn queued_clips(&self) -> usize {
        self.queued_clips.load(Ordering::SeqCst)
    }

    pub fn is_playing(&self) -> bool {
        self.playing.load(Ordering::SeqCst)
    }

    /// True when both queues are empty and nothing is playing.
    pub fn is_quiescent(&self) -> bool {
        self.pending_jobs() == 0 && self.queued_clips() == 0 && !self.is_playing()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_quiescence_tracks_all_three_conditions() {
        let status = PipelineStatus::new();
        assert!(status.is_quiescent());

        status.job_enqueued();
        assert!(!status.is_quiescent());

        status.clip_enqueued();
        status.job_finished();
        assert!(!status.is_quiescent());

        status.set_playing(true);
        status.clip_dequeued();
        assert!(!status.is_quiescent());

        status.set_playing(false);
        assert!(status.is_quiescent());
    }
}
