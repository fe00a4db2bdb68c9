use std::time::{Duration, Instant};
use sync_api::ClientFrame;
use uuid::Uuid;

/// Decides when keystrokes in the compose box turn into typing frames.
///
/// A frame goes out whenever the typing state flips, and while typing
/// continues at most once per interval.
#[derive(Debug)]
pub struct TypingDebounce {
    interval: Duration,
    receiver: Option<Uuid>,
    typing: bool,
    last_emit: Option<Instant>,
}

impl TypingDebounce {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            receiver: None,
            typing: false,
            last_emit: None,
        }
    }

    pub fn is_typing(&self) -> bool {
        self.typing
    }

    /// Feed the current draft length. Returns the frame to send, if any.
    pub fn update(&mut self, receiver: Uuid, draft_len: usize, now: Instant) -> Option<ClientFrame> {
        if self.receiver != Some(receiver) {
            self.receiver = Some(receiver);
            self.typing = false;
            self.last_emit = None;
        }
        let active = draft_len > 0;
        let due = match self.last_emit {
            Some(prev) => now.saturating_duration_since(prev) >= self.interval,
            None => true,
        };
        let emit = active != self.typing || (active && due);
        if !emit {
            return None;
        }
        self.typing = active;
        self.last_emit = Some(now);
        Some(ClientFrame::Typing {
            receiver,
            draft_len,
        })
    }

    /// Stop signal for the current receiver, if it was told we are typing.
    /// Used when the draft is sent or the conversation is switched.
    pub fn stop(&mut self) -> Option<ClientFrame> {
        let receiver = self.receiver?;
        if !self.typing {
            return None;
        }
        self.typing = false;
        self.last_emit = None;
        Some(ClientFrame::Typing {
            receiver,
            draft_len: 0,
        })
    }
}
