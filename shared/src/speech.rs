//! Continuous speech transcript accumulation.
//!
//! The recognizer itself lives in the host shell. It pushes finalized
//! segments here; the growing transcript is published on a watch channel
//! so the voice extractor can observe it.

use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::watch;
use tracing::{debug, info};

pub struct SpeechCaptureChannel {
    supported: bool,
    listening: AtomicBool,
    transcript: watch::Sender<String>,
}

impl SpeechCaptureChannel {
    #[must_use]
    pub fn new(supported: bool) -> Self {
        let (transcript, _) = watch::channel(String::new());
        Self {
            supported,
            listening: AtomicBool::new(false),
            transcript,
        }
    }

    #[must_use]
    pub fn is_supported(&self) -> bool {
        self.supported
    }

    #[must_use]
    pub fn is_listening(&self) -> bool {
        self.listening.load(Ordering::Acquire)
    }

    /// Starts listening. Returns `false` when speech input is unavailable,
    /// in which case the manual form is the only path.
    pub fn start(&self) -> bool {
        if !self.supported {
            info!("speech recognition unsupported; manual entry only");
            return false;
        }
        self.listening.store(true, Ordering::Release);
        true
    }

    pub fn stop(&self) {
        self.listening.store(false, Ordering::Release);
    }

    /// Appends a finalized segment. Segments arriving while stopped are dropped.
    pub fn push_segment(&self, segment: &str) -> bool {
        let segment = segment.trim();
        if segment.is_empty() || !self.is_listening() {
            return false;
        }
        self.transcript.send_modify(|transcript| {
            if !transcript.is_empty() {
                transcript.push(' ');
            }
            transcript.push_str(segment);
        });
        debug!(segment_len = segment.len(), "transcript segment appended");
        true
    }

    #[must_use]
    pub fn transcript(&self) -> String {
        self.transcript.borrow().clone()
    }

    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<String> {
        self.transcript.subscribe()
    }

    /// Empties the transcript. Listening state is untouched.
    pub fn reset(&self) {
        self.transcript.send_replace(String::new());
    }
}
