//! Typing effect: reveals buffered reply text one character per tick,
//! whatever the pace at which the network delivers it.
//!
//! ```text
//!  Idle --push--> Streaming --tick, buffer empty--> Draining
//!                   ^    |                             |
//!                   |    +--tick, empty, finished--+   |
//!                   +-------------push-------------|---+
//!                                                  v
//!                                               Settled
//! ```

use std::collections::VecDeque;
use std::time::Duration;

use tokio::time::{interval, Interval, MissedTickBehavior};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PresenterState {
    #[default]
    Idle,
    /// Ticking: there is, or just was, pending text.
    Streaming,
    /// Caught up with the network, waiting for the next fragment.
    Draining,
    /// Terminal. The visible text is final.
    Settled,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    Revealed(char),
    /// Buffer ran dry before the source finished.
    Parked,
    Settled,
    /// Not in `Streaming`; the tick did nothing.
    Inactive,
}

#[derive(Debug, Clone, Default)]
pub struct TypingPresenter {
    state: PresenterState,
    pending: VecDeque<char>,
    display: String,
    source_finished: bool,
}

impl TypingPresenter {
    pub fn new() -> Self {
        Self::default()
    }

    /// A presenter that starts out settled on `text`, for messages that are
    /// not typed out.
    pub fn settled(text: &str) -> Self {
        Self {
            state: PresenterState::Settled,
            pending: VecDeque::new(),
            display: text.to_string(),
            source_finished: true,
        }
    }

    pub fn state(&self) -> PresenterState {
        self.state
    }

    pub fn display(&self) -> &str {
        &self.display
    }

    pub fn pending(&self) -> String {
        self.pending.iter().collect()
    }

    pub fn wants_tick(&self) -> bool {
        self.state == PresenterState::Streaming
    }

    /// Queue newly received text. Wakes a parked presenter.
    pub fn push(&mut self, fragment: &str) {
        if self.state == PresenterState::Settled || fragment.is_empty() {
            return;
        }
        self.pending.extend(fragment.chars());
        if !self.source_finished {
            self.state = PresenterState::Streaming;
        }
    }

    /// The source will send nothing more. Settles right away if nothing is
    /// left to reveal, otherwise the remaining ticks drain the buffer.
    pub fn finish_source(&mut self) {
        self.source_finished = true;
        match self.state {
            PresenterState::Settled => {}
            _ if self.pending.is_empty() => self.state = PresenterState::Settled,
            _ => self.state = PresenterState::Streaming,
        }
    }

    /// Make `text` the full text this presenter ends on. What is already
    /// shown stays when it is a prefix of `text` and only the rest is queued.
    /// Otherwise the shown text cannot grow into `text`, so it is replaced
    /// and the presenter settles.
    pub fn retarget(&mut self, text: &str) {
        if self.state == PresenterState::Settled {
            return;
        }
        match text.strip_prefix(self.display.as_str()) {
            Some(rest) => {
                self.pending = rest.chars().collect();
                if !self.pending.is_empty() {
                    self.state = PresenterState::Streaming;
                }
            }
            None => {
                self.display = text.to_string();
                self.pending.clear();
                self.source_finished = true;
                self.state = PresenterState::Settled;
            }
        }
    }

    /// Reveal everything still pending and settle.
    pub fn flush(&mut self) {
        self.display.extend(self.pending.drain(..));
        self.source_finished = true;
        self.state = PresenterState::Settled;
    }

    pub fn tick(&mut self) -> TickOutcome {
        if self.state != PresenterState::Streaming {
            return TickOutcome::Inactive;
        }

        if let Some(c) = self.pending.pop_front() {
            self.display.push(c);
            return TickOutcome::Revealed(c);
        }

        if self.source_finished {
            self.state = PresenterState::Settled;
            TickOutcome::Settled
        } else {
            self.state = PresenterState::Draining;
            TickOutcome::Parked
        }
    }
}

/// The recurring timer that drives [`TypingPresenter::tick`].
///
/// Missed ticks are delayed rather than bursted so the typing pace stays even
/// when the UI falls behind.
pub fn typing_ticker(period: Duration) -> Interval {
    let mut ticker = interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    ticker
}
