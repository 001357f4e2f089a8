use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::ai::ChatClient;
use crate::error::ChatError;
use crate::state::{Conversation, StreamUpdate, TurnHandle};
use crate::stream::FragmentSink;

/// Forwards a turn's notifications to the UI task as [`StreamUpdate`]s.
pub struct ChannelSink {
    turn: TurnHandle,
    tx: mpsc::UnboundedSender<StreamUpdate>,
}

impl ChannelSink {
    pub fn new(turn: TurnHandle, tx: mpsc::UnboundedSender<StreamUpdate>) -> Self {
        Self { turn, tx }
    }
}

impl FragmentSink for ChannelSink {
    fn on_fragment(&mut self, fragment: &str) {
        // The receiver only goes away when the session is dropped.
        let _ = self.tx.send(StreamUpdate::fragment(self.turn, fragment));
    }

    fn on_finish(&mut self) {
        let _ = self.tx.send(StreamUpdate::finished(self.turn));
    }
}

/// Owns a conversation and the network tasks feeding it.
///
/// Every method runs on the UI task. Network tasks only talk to it through
/// the update channel, drained with [`ChatSession::next_update`] and applied
/// with [`ChatSession::handle_update`].
pub struct ChatSession {
    client: ChatClient,
    conversation: Conversation,
    updates_tx: mpsc::UnboundedSender<StreamUpdate>,
    updates_rx: mpsc::UnboundedReceiver<StreamUpdate>,
    in_flight: Option<(TurnHandle, JoinHandle<()>)>,
}

impl ChatSession {
    pub fn new(client: ChatClient) -> Self {
        let (updates_tx, updates_rx) = mpsc::unbounded_channel();
        Self {
            client,
            conversation: Conversation::new(),
            updates_tx,
            updates_rx,
            in_flight: None,
        }
    }

    pub fn conversation(&self) -> &Conversation {
        &self.conversation
    }

    pub fn model(&self) -> &str {
        self.client.model()
    }

    /// A request is still running.
    pub fn is_busy(&self) -> bool {
        self.in_flight.is_some()
    }

    /// Whether the UI should keep its typing timer running.
    pub fn is_animating(&self) -> bool {
        self.conversation.wants_tick()
    }

    /// Start a turn for `prompt`. Returns `None` if the prompt is blank or a
    /// previous turn is still in flight.
    pub fn submit(&mut self, prompt: &str) -> Option<TurnHandle> {
        self.reap_finished_task();
        if self.is_busy() {
            debug!("submit ignored, a turn is already in flight");
            return None;
        }
        let turn = self.conversation.begin_turn(prompt)?;

        let client = self.client.clone();
        let tx = self.updates_tx.clone();
        let prompt = prompt.to_string();
        let handle = tokio::spawn(async move {
            let sink = ChannelSink::new(turn, tx.clone());
            let result = client.send(&prompt, sink).await;
            let _ = tx.send(StreamUpdate::completed(turn, result));
        });

        info!(message_id = %turn.message_id, generation = turn.generation, "turn started");
        self.in_flight = Some((turn, handle));
        Some(turn)
    }

    pub async fn next_update(&mut self) -> Option<StreamUpdate> {
        self.updates_rx.recv().await
    }

    pub fn try_next_update(&mut self) -> Option<StreamUpdate> {
        self.updates_rx.try_recv().ok()
    }

    /// Apply one update. Returns `true` if the conversation changed.
    pub fn handle_update(&mut self, update: StreamUpdate) -> bool {
        if update.is_completion()
            && self.in_flight.as_ref().is_some_and(|(turn, _)| *turn == update.turn)
        {
            self.in_flight = None;
        }
        self.conversation.apply(update)
    }

    /// One typing step for every message that is still being revealed.
    pub fn tick(&mut self) -> bool {
        let reaped = self.reap_finished_task();
        self.conversation.tick() || reaped
    }

    /// Settle a turn whose task is gone without reporting a result, as after
    /// a panic. Updates it queued before exiting are applied first.
    fn reap_finished_task(&mut self) -> bool {
        if !self.in_flight.as_ref().is_some_and(|(_, handle)| handle.is_finished()) {
            return false;
        }

        let mut changed = false;
        while let Some(update) = self.try_next_update() {
            changed |= self.handle_update(update);
        }
        if let Some((turn, _)) = self.in_flight.take() {
            warn!(message_id = %turn.message_id, "turn task ended without a result");
            changed |= self
                .conversation
                .apply(StreamUpdate::completed(turn, Err(ChatError::TaskEnded)));
        }
        changed
    }

    /// Stop the running request. Its placeholder keeps whatever text arrived
    /// and is marked failed.
    pub fn cancel(&mut self) -> bool {
        let Some((turn, handle)) = self.in_flight.take() else {
            return false;
        };
        handle.abort();
        info!(message_id = %turn.message_id, "turn cancelled");
        self.conversation.apply(StreamUpdate::completed(turn, Err(ChatError::Cancelled)))
    }

    /// Drop the conversation, cancelling any request still running.
    pub fn clear(&mut self) {
        if let Some((turn, handle)) = self.in_flight.take() {
            handle.abort();
            info!(message_id = %turn.message_id, "turn cancelled by clear");
        }
        self.conversation.clear();
    }
}

impl Drop for ChatSession {
    fn drop(&mut self) {
        if let Some((_, handle)) = self.in_flight.take() {
            handle.abort();
        }
    }
}
