//! UI-agnostic conversation state.
//!
//! All mutation goes through [`Conversation`] on the UI task. Network tasks
//! never touch it directly; they send [`StreamUpdate`]s tagged with the
//! [`TurnHandle`] they were started with, and updates from a cleared
//! conversation are dropped on arrival.

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::error::ChatError;
use crate::presenter::{PresenterState, TickOutcome, TypingPresenter};

/// Who a message is from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChatRole {
    User,
    Assistant,
    System,
}

impl ChatRole {
    pub fn sender(&self) -> &'static str {
        match self {
            ChatRole::User => "You",
            ChatRole::Assistant => "AI",
            ChatRole::System => "System",
        }
    }
}

/// A message in the conversation view.
///
/// `raw_content` is the text received so far; `display_content` is the part
/// already typed out, always a prefix of the final `raw_content`.
#[derive(Debug, Clone)]
pub struct ConversationMessage {
    pub id: Uuid,
    pub role: ChatRole,
    raw_content: String,
    typing: TypingPresenter,
    failed: bool,
}

impl ConversationMessage {
    pub fn user(text: &str) -> Self {
        Self::settled(ChatRole::User, text)
    }

    pub fn system(text: &str) -> Self {
        Self::settled(ChatRole::System, text)
    }

    /// Empty assistant message shown before any data arrives.
    pub fn placeholder() -> Self {
        Self {
            id: Uuid::new_v4(),
            role: ChatRole::Assistant,
            raw_content: String::new(),
            typing: TypingPresenter::new(),
            failed: false,
        }
    }

    fn settled(role: ChatRole, text: &str) -> Self {
        Self {
            id: Uuid::new_v4(),
            role,
            raw_content: text.to_string(),
            typing: TypingPresenter::settled(text),
            failed: false,
        }
    }

    pub fn raw_content(&self) -> &str {
        &self.raw_content
    }

    pub fn display_content(&self) -> &str {
        self.typing.display()
    }

    pub fn pending_buffer(&self) -> String {
        self.typing.pending()
    }

    pub fn is_user(&self) -> bool {
        self.role == ChatRole::User
    }

    pub fn sender(&self) -> &'static str {
        self.role.sender()
    }

    pub fn is_streaming(&self) -> bool {
        matches!(
            self.typing.state(),
            PresenterState::Streaming | PresenterState::Draining
        )
    }

    pub fn is_settled(&self) -> bool {
        self.typing.state() == PresenterState::Settled
    }

    pub fn failed(&self) -> bool {
        self.failed
    }

    pub fn presenter_state(&self) -> PresenterState {
        self.typing.state()
    }

    fn append_fragment(&mut self, fragment: &str) {
        if self.is_settled() {
            warn!(id = %self.id, "fragment for a settled message dropped");
            return;
        }
        self.raw_content.push_str(fragment);
        self.typing.push(fragment);
    }

    fn complete(&mut self, full_text: String) {
        if self.is_settled() {
            warn!(id = %self.id, "completion for a settled message dropped");
            return;
        }
        if self.raw_content != full_text {
            warn!(id = %self.id, "streamed text differs from final reply, using final reply");
            self.typing.retarget(&full_text);
        }
        self.raw_content = full_text;
        self.typing.finish_source();
    }

    /// Returns `false` if the message had already settled.
    fn fail(&mut self) -> bool {
        if self.is_settled() {
            return false;
        }
        self.failed = true;
        self.typing.flush();
        true
    }

    fn tick(&mut self) -> TickOutcome {
        self.typing.tick()
    }
}

/// Identifies the assistant message a network task writes to, and the
/// conversation generation it belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TurnHandle {
    pub generation: u64,
    pub message_id: Uuid,
}

#[derive(Debug)]
pub enum UpdateKind {
    Fragment(String),
    /// The server signalled the end of the stream.
    Finished,
    /// The request is over.
    Completed(Result<String, ChatError>),
}

#[derive(Debug)]
pub struct StreamUpdate {
    pub turn: TurnHandle,
    pub kind: UpdateKind,
}

impl StreamUpdate {
    pub fn fragment(turn: TurnHandle, text: &str) -> Self {
        Self { turn, kind: UpdateKind::Fragment(text.to_string()) }
    }

    pub fn finished(turn: TurnHandle) -> Self {
        Self { turn, kind: UpdateKind::Finished }
    }

    pub fn completed(turn: TurnHandle, result: Result<String, ChatError>) -> Self {
        Self { turn, kind: UpdateKind::Completed(result) }
    }

    pub fn is_completion(&self) -> bool {
        matches!(self.kind, UpdateKind::Completed(_))
    }
}

/// The ordered message list shown in the conversation view.
#[derive(Debug, Default)]
pub struct Conversation {
    messages: Vec<ConversationMessage>,
    generation: u64,
}

impl Conversation {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn messages(&self) -> &[ConversationMessage] {
        &self.messages
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn message(&self, id: Uuid) -> Option<&ConversationMessage> {
        self.messages.iter().find(|m| m.id == id)
    }

    /// Append the user's prompt and an empty assistant placeholder.
    ///
    /// Returns `None` for blank prompts.
    pub fn begin_turn(&mut self, prompt: &str) -> Option<TurnHandle> {
        if prompt.trim().is_empty() {
            return None;
        }
        self.messages.push(ConversationMessage::user(prompt));

        let placeholder = ConversationMessage::placeholder();
        let turn = TurnHandle { generation: self.generation, message_id: placeholder.id };
        self.messages.push(placeholder);
        Some(turn)
    }

    pub fn push_system(&mut self, text: &str) {
        self.messages.push(ConversationMessage::system(text));
    }

    /// Apply an update from a network task. Returns `false` if it was stale
    /// and nothing changed.
    pub fn apply(&mut self, update: StreamUpdate) -> bool {
        let StreamUpdate { turn, kind } = update;
        let current = self.generation;
        let Some(message) = self.live_message_mut(turn) else {
            debug!(
                generation = turn.generation,
                current,
                "dropping update for a cleared message"
            );
            return false;
        };

        match kind {
            UpdateKind::Fragment(text) => message.append_fragment(&text),
            UpdateKind::Finished => debug!(id = %turn.message_id, "server finished stream"),
            UpdateKind::Completed(Ok(text)) => message.complete(text),
            UpdateKind::Completed(Err(e)) => {
                if message.fail() {
                    self.push_system(&format!("Error: {}", e));
                }
            }
        }
        true
    }

    /// Advance every typing message by one character. Returns `true` if
    /// anything visible changed.
    pub fn tick(&mut self) -> bool {
        let mut changed = false;
        for message in self.messages.iter_mut().filter(|m| m.typing.wants_tick()) {
            match message.tick() {
                TickOutcome::Revealed(_) | TickOutcome::Settled => changed = true,
                TickOutcome::Parked | TickOutcome::Inactive => {}
            }
        }
        changed
    }

    pub fn wants_tick(&self) -> bool {
        self.messages.iter().any(|m| m.typing.wants_tick())
    }

    pub fn has_streaming(&self) -> bool {
        self.messages.iter().any(|m| m.is_streaming())
    }

    /// Drop every message. Updates and ticks for them become no-ops.
    pub fn clear(&mut self) {
        self.messages.clear();
        self.generation += 1;
    }

    fn live_message_mut(&mut self, turn: TurnHandle) -> Option<&mut ConversationMessage> {
        if turn.generation != self.generation {
            return None;
        }
        self.messages.iter_mut().find(|m| m.id == turn.message_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run_ticks(conversation: &mut Conversation) -> usize {
        let mut ticks = 0;
        while conversation.wants_tick() {
            conversation.tick();
            ticks += 1;
        }
        ticks
    }

    #[test]
    fn blank_prompts_do_not_start_a_turn() {
        let mut conversation = Conversation::new();
        assert!(conversation.begin_turn("").is_none());
        assert!(conversation.begin_turn("  \n\t").is_none());
        assert!(conversation.is_empty());
    }

    #[test]
    fn begin_turn_adds_user_message_and_placeholder() {
        let mut conversation = Conversation::new();
        let turn = conversation.begin_turn("hi").unwrap();

        let messages = conversation.messages();
        assert_eq!(messages.len(), 2);
        assert!(messages[0].is_user());
        assert_eq!(messages[0].display_content(), "hi");
        assert_eq!(messages[1].id, turn.message_id);
        assert_eq!(messages[1].sender(), "AI");
        assert_eq!(messages[1].presenter_state(), PresenterState::Idle);
        assert!(messages[1].display_content().is_empty());
    }

    #[test]
    fn full_turn_types_out_and_settles() {
        let mut conversation = Conversation::new();
        let turn = conversation.begin_turn("hi").unwrap();

        assert!(conversation.apply(StreamUpdate::fragment(turn, "Hel")));
        assert!(conversation.message(turn.message_id).unwrap().is_streaming());
        conversation.tick();
        assert!(conversation.apply(StreamUpdate::fragment(turn, "lo")));
        assert!(conversation.apply(StreamUpdate::finished(turn)));
        assert!(conversation.apply(StreamUpdate::completed(turn, Ok("Hello".to_string()))));

        let message = conversation.message(turn.message_id).unwrap();
        assert_eq!(message.display_content(), "H");
        assert_eq!(message.pending_buffer(), "ello");

        // Four characters left, then one tick to settle.
        assert_eq!(run_ticks(&mut conversation), 5);
        let message = conversation.message(turn.message_id).unwrap();
        assert!(message.is_settled());
        assert_eq!(message.display_content(), "Hello");
        assert_eq!(message.raw_content(), "Hello");
        assert!(message.pending_buffer().is_empty());
    }

    #[test]
    fn display_is_always_a_prefix_of_the_final_text() {
        let mut conversation = Conversation::new();
        let turn = conversation.begin_turn("tell me").unwrap();
        let fragments = ["Once ", "upon ", "a ", "time…"];
        let final_text: String = fragments.concat();

        for fragment in fragments {
            conversation.apply(StreamUpdate::fragment(turn, fragment));
            for _ in 0..3 {
                conversation.tick();
                let shown = conversation.message(turn.message_id).unwrap().display_content();
                assert!(final_text.starts_with(shown));
            }
        }
        conversation.apply(StreamUpdate::completed(turn, Ok(final_text.clone())));
        while conversation.wants_tick() {
            conversation.tick();
            let shown = conversation.message(turn.message_id).unwrap().display_content();
            assert!(final_text.starts_with(shown));
        }
        let message = conversation.message(turn.message_id).unwrap();
        assert_eq!(message.display_content(), final_text);
        assert_eq!(message.raw_content(), final_text);
    }

    #[test]
    fn waking_a_parked_message_resumes_typing() {
        let mut conversation = Conversation::new();
        let turn = conversation.begin_turn("hi").unwrap();

        conversation.apply(StreamUpdate::fragment(turn, "a"));
        run_ticks(&mut conversation);
        assert_eq!(
            conversation.message(turn.message_id).unwrap().presenter_state(),
            PresenterState::Draining
        );

        conversation.apply(StreamUpdate::fragment(turn, "b"));
        assert!(conversation.wants_tick());
        conversation.tick();
        assert_eq!(conversation.message(turn.message_id).unwrap().display_content(), "ab");
    }

    #[test]
    fn failure_marks_placeholder_and_appends_error() {
        let mut conversation = Conversation::new();
        let turn = conversation.begin_turn("hi").unwrap();
        conversation.apply(StreamUpdate::completed(turn, Err(ChatError::EmptyContent)));

        let messages = conversation.messages();
        assert_eq!(messages.len(), 3);
        assert!(messages[0].is_user());
        assert!(messages[1].failed());
        assert!(messages[1].is_settled());
        assert_eq!(messages[2].role, ChatRole::System);
        assert!(messages[2].display_content().starts_with("Error: "));
    }

    #[test]
    fn failure_mid_stream_keeps_received_text() {
        let mut conversation = Conversation::new();
        let turn = conversation.begin_turn("hi").unwrap();
        conversation.apply(StreamUpdate::fragment(turn, "partial"));
        conversation.apply(StreamUpdate::completed(turn, Err(ChatError::Cancelled)));

        let message = conversation.message(turn.message_id).unwrap();
        assert!(message.failed());
        assert_eq!(message.display_content(), "partial");
        assert!(!conversation.wants_tick());
    }

    #[test]
    fn clear_mid_stream_rejects_late_updates() {
        let mut conversation = Conversation::new();
        let turn = conversation.begin_turn("hi").unwrap();
        conversation.apply(StreamUpdate::fragment(turn, "Hel"));
        conversation.tick();

        conversation.clear();
        assert!(conversation.is_empty());
        assert_eq!(conversation.generation(), turn.generation + 1);

        assert!(!conversation.apply(StreamUpdate::fragment(turn, "lo")));
        assert!(!conversation.apply(StreamUpdate::completed(turn, Ok("Hello".into()))));
        assert!(!conversation.tick());
        assert!(conversation.is_empty());
    }

    #[test]
    fn stale_turn_cannot_write_into_a_new_conversation() {
        let mut conversation = Conversation::new();
        let old = conversation.begin_turn("first").unwrap();
        conversation.clear();
        let new = conversation.begin_turn("second").unwrap();

        // Same message id with an old generation must still be rejected.
        let forged = TurnHandle { generation: old.generation, message_id: new.message_id };
        assert!(!conversation.apply(StreamUpdate::fragment(forged, "leak")));
        assert_eq!(conversation.message(new.message_id).unwrap().raw_content(), "");
    }

    #[test]
    fn updates_after_failure_are_ignored() {
        let mut conversation = Conversation::new();
        let turn = conversation.begin_turn("hi").unwrap();
        conversation.apply(StreamUpdate::fragment(turn, "par"));
        conversation.apply(StreamUpdate::completed(turn, Err(ChatError::Cancelled)));

        conversation.apply(StreamUpdate::fragment(turn, "tial"));
        conversation.apply(StreamUpdate::completed(turn, Ok("partial".into())));
        conversation.apply(StreamUpdate::completed(turn, Err(ChatError::EmptyContent)));

        let messages = conversation.messages();
        assert_eq!(messages.len(), 3, "only one error message is appended");
        assert_eq!(messages[1].raw_content(), "par");
        assert_eq!(messages[1].display_content(), "par");
    }

    #[test]
    fn final_text_wins_over_diverging_fragments() {
        let mut conversation = Conversation::new();
        let turn = conversation.begin_turn("hi").unwrap();
        conversation.apply(StreamUpdate::fragment(turn, "Helo"));
        conversation.apply(StreamUpdate::completed(turn, Ok("Hello".to_string())));
        run_ticks(&mut conversation);

        let message = conversation.message(turn.message_id).unwrap();
        assert_eq!(message.raw_content(), "Hello");
        assert_eq!(message.display_content(), "Hello");
    }

    #[test]
    fn final_text_never_shrinks_what_is_shown() {
        let mut conversation = Conversation::new();
        let turn = conversation.begin_turn("hi").unwrap();
        conversation.apply(StreamUpdate::fragment(turn, "Hel"));
        conversation.tick();
        conversation.tick();
        assert_eq!(conversation.message(turn.message_id).unwrap().display_content(), "He");

        conversation.apply(StreamUpdate::completed(turn, Ok("Hello!".to_string())));
        let message = conversation.message(turn.message_id).unwrap();
        assert_eq!(message.display_content(), "He");
        assert_eq!(message.pending_buffer(), "llo!");

        let mut shown = 2;
        while conversation.wants_tick() {
            conversation.tick();
            let len = conversation.message(turn.message_id).unwrap().display_content().len();
            assert!(len >= shown);
            shown = len;
        }
        let message = conversation.message(turn.message_id).unwrap();
        assert!(message.is_settled());
        assert_eq!(message.display_content(), "Hello!");
    }
}
