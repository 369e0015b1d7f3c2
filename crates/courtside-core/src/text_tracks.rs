//! Deferred text-track registration
//!
//! Tracks submitted before the engine is ready are queued in arrival order
//! and handed back for registration once loading completes. After that,
//! tracks pass straight through.

use crate::types::TextTrack;
use std::collections::VecDeque;
use tracing::debug;

/// Outcome of submitting a track
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Submission {
    /// Engine is ready; register the track now
    Immediate(TextTrack),
    /// Queued until the engine is ready
    Buffered { position: usize },
}

/// Ordered buffer plus readiness flag
#[derive(Debug, Default)]
pub struct TextTrackManager {
    pending: VecDeque<TextTrack>,
    ready: bool,
}

impl TextTrackManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Submit a track for registration
    pub fn submit(&mut self, track: TextTrack) -> Submission {
        if self.ready {
            return Submission::Immediate(track);
        }

        debug!(language = %track.language, uri = %track.uri, "Buffering text track until ready");
        self.pending.push_back(track);
        Submission::Buffered {
            position: self.pending.len() - 1,
        }
    }

    /// Pop the oldest buffered track. When the buffer is empty the manager
    /// switches to pass-through in the same step, so a track submitted while
    /// a flush is in progress is never skipped or reordered.
    pub fn next_or_ready(&mut self) -> Option<TextTrack> {
        let next = self.pending.pop_front();
        if next.is_none() {
            self.ready = true;
        }
        next
    }

    /// Drop everything and go back to buffering
    pub fn reset(&mut self) {
        self.pending.clear();
        self.ready = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::TextTrackKind;

    fn track(language: &str) -> TextTrack {
        TextTrack::new(format!("https://cdn.example.com/{language}.vtt"), language, TextTrackKind::Subtitles)
    }

    #[test]
    fn test_buffers_in_submission_order() {
        let mut manager = TextTrackManager::new();

        assert_eq!(manager.submit(track("en")), Submission::Buffered { position: 0 });
        assert_eq!(manager.submit(track("es")), Submission::Buffered { position: 1 });

        assert_eq!(manager.next_or_ready(), Some(track("en")));
        assert_eq!(manager.next_or_ready(), Some(track("es")));
        assert_eq!(manager.next_or_ready(), None);
    }

    #[test]
    fn test_pass_through_after_flush() {
        let mut manager = TextTrackManager::new();
        assert_eq!(manager.next_or_ready(), None);

        assert_eq!(manager.submit(track("fr")), Submission::Immediate(track("fr")));
        assert_eq!(manager.next_or_ready(), None);
    }

    #[test]
    fn test_flush_picks_up_late_submissions() {
        let mut manager = TextTrackManager::new();
        manager.submit(track("en"));

        assert_eq!(manager.next_or_ready(), Some(track("en")));

        // submitted while "en" is being registered
        assert_eq!(manager.submit(track("pt")), Submission::Buffered { position: 0 });
        assert_eq!(manager.next_or_ready(), Some(track("pt")));

        assert_eq!(manager.next_or_ready(), None);
        assert_eq!(manager.submit(track("it")), Submission::Immediate(track("it")));
    }

    #[test]
    fn test_reset() {
        let mut manager = TextTrackManager::new();
        manager.submit(track("de"));
        manager.reset();
        assert_eq!(manager.next_or_ready(), None);

        manager.reset();
        assert_eq!(manager.submit(track("nl")), Submission::Buffered { position: 0 });
    }
}
