//! Debounced coalescing of incremental transcript fragments.
//!
//! The engine streams partial-speech text a few words at a time. Emitting
//! every fragment would flood consumers, so fragments accumulate per
//! speaker and a coalesced update is released on a short debounce interval
//! or on a terminal event (turn complete / interruption). The agent-side
//! text is retained briefly after turn completion so a UI can keep the last
//! reply on screen, then cleared; user-side handling is independent.
//!
//! The aggregator is pure state; the session pump drives [`tick`] from a
//! timer and passes the current instant in, which keeps it testable.

use std::time::{Duration, Instant};

use crate::config::TranscriptConfig;
use crate::session::events::Speaker;

/// A coalesced transcript update ready for consumers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TranscriptUpdate {
    pub speaker: Speaker,
    /// Full accumulated text for the speaker's current turn.
    pub text: String,
    pub is_final: bool,
}

struct SpeakerBuffer {
    text: String,
    /// New fragments arrived since the last emitted update.
    dirty: bool,
    last_flush: Option<Instant>,
}

impl SpeakerBuffer {
    fn new() -> Self {
        Self {
            text: String::new(),
            dirty: false,
            last_flush: None,
        }
    }

    fn push(&mut self, fragment: &str) {
        self.text.push_str(fragment);
        self.dirty = true;
    }

    fn due(&self, now: Instant, debounce: Duration) -> bool {
        self.dirty
            && match self.last_flush {
                Some(at) => now.duration_since(at) >= debounce,
                None => true,
            }
    }

    fn take_update(&mut self, speaker: Speaker, now: Instant, is_final: bool) -> TranscriptUpdate {
        self.dirty = false;
        self.last_flush = Some(now);
        TranscriptUpdate {
            speaker,
            text: self.text.clone(),
            is_final,
        }
    }

    fn reset(&mut self) {
        self.text.clear();
        self.dirty = false;
        self.last_flush = None;
    }
}

/// Per-speaker coalescing buffers with debounced flushing.
pub struct TranscriptAggregator {
    debounce: Duration,
    agent_retention: Duration,
    user: SpeakerBuffer,
    agent: SpeakerBuffer,
    /// When set, the agent buffer is cleared once this deadline passes.
    agent_clear_at: Option<Instant>,
}

impl TranscriptAggregator {
    pub fn new(config: &TranscriptConfig) -> Self {
        Self {
            debounce: Duration::from_millis(config.debounce_ms),
            agent_retention: Duration::from_millis(config.agent_retention_ms),
            user: SpeakerBuffer::new(),
            agent: SpeakerBuffer::new(),
            agent_clear_at: None,
        }
    }

    /// Append a partial fragment for a speaker.
    ///
    /// An agent fragment arriving while retained text from the previous
    /// turn is still on display starts a fresh turn.
    pub fn push(&mut self, speaker: Speaker, fragment: &str) {
        let buffer = match speaker {
            Speaker::User => &mut self.user,
            Speaker::Agent => {
                if self.agent_clear_at.take().is_some() {
                    self.agent.reset();
                }
                &mut self.agent
            }
        };
        buffer.push(fragment);
    }

    /// Release debounced updates that are due at `now` and apply the
    /// agent-side retention deadline.
    pub fn tick(&mut self, now: Instant) -> Vec<TranscriptUpdate> {
        if let Some(deadline) = self.agent_clear_at
            && now >= deadline
        {
            self.agent.reset();
            self.agent_clear_at = None;
        }

        let mut updates = Vec::new();
        if self.user.due(now, self.debounce) {
            updates.push(self.user.take_update(Speaker::User, now, false));
        }
        if self.agent.due(now, self.debounce) {
            updates.push(self.agent.take_update(Speaker::Agent, now, false));
        }
        updates
    }

    /// Finalize both speakers on a terminal event.
    ///
    /// Emits final updates for any non-empty buffer. The user buffer resets
    /// immediately (that turn is over); the agent buffer is retained until
    /// the configured delay elapses.
    pub fn finalize(&mut self, now: Instant) -> Vec<TranscriptUpdate> {
        let mut updates = Vec::new();

        if !self.user.text.is_empty() {
            updates.push(self.user.take_update(Speaker::User, now, true));
        }
        self.user.reset();

        if !self.agent.text.is_empty() {
            updates.push(self.agent.take_update(Speaker::Agent, now, true));
            self.agent_clear_at = Some(now + self.agent_retention);
        }

        updates
    }

    /// Current accumulated agent-side text (retained text included).
    pub fn agent_text(&self) -> &str {
        &self.agent.text
    }

    /// Current accumulated user-side text.
    pub fn user_text(&self) -> &str {
        &self.user.text
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn aggregator() -> TranscriptAggregator {
        TranscriptAggregator::new(&TranscriptConfig {
            debounce_ms: 150,
            agent_retention_ms: 2_000,
        })
    }

    const MS: Duration = Duration::from_millis(1);

    #[test]
    fn first_fragment_flushes_immediately() {
        let mut agg = aggregator();
        let t0 = Instant::now();
        agg.push(Speaker::User, "do you ");
        let updates = agg.tick(t0);
        assert_eq!(updates.len(), 1);
        assert_eq!(updates[0].text, "do you ");
        assert!(!updates[0].is_final);
    }

    #[test]
    fn fragments_coalesce_within_debounce_window() {
        let mut agg = aggregator();
        let t0 = Instant::now();
        agg.push(Speaker::User, "do you ");
        assert_eq!(agg.tick(t0).len(), 1);

        // More fragments inside the window: nothing due yet.
        agg.push(Speaker::User, "have ");
        agg.push(Speaker::User, "milk");
        assert!(agg.tick(t0 + 50 * MS).is_empty());

        // Past the window the whole accumulation comes out at once.
        let updates = agg.tick(t0 + 200 * MS);
        assert_eq!(updates.len(), 1);
        assert_eq!(updates[0].text, "do you have milk");
    }

    #[test]
    fn clean_tick_emits_nothing() {
        let mut agg = aggregator();
        assert!(agg.tick(Instant::now()).is_empty());
    }

    #[test]
    fn speakers_are_independent() {
        let mut agg = aggregator();
        let t0 = Instant::now();
        agg.push(Speaker::User, "hello");
        agg.push(Speaker::Agent, "hi there");
        let updates = agg.tick(t0);
        assert_eq!(updates.len(), 2);
        assert_eq!(updates[0].speaker, Speaker::User);
        assert_eq!(updates[1].speaker, Speaker::Agent);
    }

    #[test]
    fn finalize_emits_final_updates_and_resets_user() {
        let mut agg = aggregator();
        let t0 = Instant::now();
        agg.push(Speaker::User, "two breads");
        agg.push(Speaker::Agent, "adding two");

        let updates = agg.finalize(t0);
        assert_eq!(updates.len(), 2);
        assert!(updates.iter().all(|u| u.is_final));

        assert_eq!(agg.user_text(), "");
        // Agent text is retained for the configured delay.
        assert_eq!(agg.agent_text(), "adding two");
    }

    #[test]
    fn agent_text_clears_after_retention_delay() {
        let mut agg = aggregator();
        let t0 = Instant::now();
        agg.push(Speaker::Agent, "here you go");
        agg.finalize(t0);

        agg.tick(t0 + 1_000 * MS);
        assert_eq!(agg.agent_text(), "here you go");

        agg.tick(t0 + 2_500 * MS);
        assert_eq!(agg.agent_text(), "");
    }

    #[test]
    fn new_agent_turn_discards_retained_text() {
        let mut agg = aggregator();
        let t0 = Instant::now();
        agg.push(Speaker::Agent, "old reply");
        agg.finalize(t0);

        agg.push(Speaker::Agent, "new reply");
        assert_eq!(agg.agent_text(), "new reply");

        // The old clear deadline must not wipe the new turn.
        let updates = agg.tick(t0 + 3_000 * MS);
        assert_eq!(updates.len(), 1);
        assert_eq!(updates[0].text, "new reply");
    }

    #[test]
    fn finalize_with_empty_buffers_is_silent() {
        let mut agg = aggregator();
        assert!(agg.finalize(Instant::now()).is_empty());
    }
}
