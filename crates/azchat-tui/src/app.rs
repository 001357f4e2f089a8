use azchat_core::{ChatSession, Conversation};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputMode {
    Normal,
    Editing,
}

pub struct App {
    pub should_quit: bool,
    pub input_mode: InputMode,

    // Prompt being typed
    pub input: String,
    pub cursor: usize, // cursor position in input, in characters

    // Chat view
    pub session: ChatSession,
    pub chat_scroll: u16,
    pub follow_output: bool, // keep the newest message in view while it types
    pub chat_height: u16,    // Height of chat area for scroll calculations
    pub chat_width: u16,     // Width of chat area for wrap calculations

    // Animation state
    pub animation_frame: u8, // 0-2 for ellipsis animation
}

impl App {
    pub fn new(session: ChatSession) -> Self {
        Self {
            should_quit: false,
            input_mode: InputMode::Editing,
            input: String::new(),
            cursor: 0,
            session,
            chat_scroll: 0,
            follow_output: true,
            chat_height: 0,
            chat_width: 0,
            animation_frame: 0,
        }
    }

    /// Send the current input. Blank input and input typed while a reply is
    /// still streaming stay in the box.
    pub fn submit_input(&mut self) -> bool {
        if self.input.trim().is_empty() || self.session.is_busy() {
            return false;
        }
        if self.session.submit(&self.input).is_none() {
            return false;
        }
        self.input.clear();
        self.cursor = 0;
        self.follow_output = true;
        self.scroll_to_bottom();
        true
    }

    pub fn clear_conversation(&mut self) {
        self.session.clear();
        self.chat_scroll = 0;
        self.follow_output = true;
    }

    pub fn cancel_turn(&mut self) -> bool {
        let cancelled = self.session.cancel();
        if cancelled {
            self.scroll_to_bottom();
        }
        cancelled
    }

    /// Whether the placeholder of the current turn is still waiting for text.
    pub fn is_waiting(&self) -> bool {
        self.session.is_busy()
            && self
                .session
                .conversation()
                .messages()
                .last()
                .is_some_and(|m| !m.is_user() && m.display_content().is_empty())
    }

    pub fn tick_animation(&mut self) -> bool {
        if self.is_waiting() {
            self.animation_frame = (self.animation_frame + 1) % 3;
            return true;
        }
        false
    }

    /// Reveal the next character of any streaming reply.
    pub fn tick_typing(&mut self) -> bool {
        let changed = self.session.tick();
        if changed && self.follow_output {
            self.scroll_to_bottom();
        }
        changed
    }

    pub fn scroll_up(&mut self) {
        self.follow_output = false;
        self.chat_scroll = self.chat_scroll.saturating_sub(1);
    }

    pub fn scroll_down(&mut self) {
        self.chat_scroll = self.chat_scroll.saturating_add(1);
        let bottom = self.bottom_scroll();
        if self.chat_scroll >= bottom {
            self.chat_scroll = bottom;
            self.follow_output = true;
        }
    }

    pub fn scroll_to_bottom(&mut self) {
        self.chat_scroll = self.bottom_scroll();
    }

    fn bottom_scroll(&self) -> u16 {
        bottom_scroll_for(self.session.conversation(), self.chat_width, self.chat_height)
    }
}

/// Scroll offset that puts the last wrapped line of `conversation` at the
/// bottom of a `chat_width` x `chat_height` view.
fn bottom_scroll_for(conversation: &Conversation, chat_width: u16, chat_height: u16) -> u16 {
    // Use actual chat width for wrap calculation, default to 50 if not set
    let wrap_width = if chat_width > 0 { chat_width as usize } else { 50 };

    let mut total_lines: u16 = 0;

    for msg in conversation.messages() {
        total_lines = total_lines.saturating_add(1); // Sender line ("You:", "AI:" or "System:")
        let text = msg.display_content();
        if text.is_empty() {
            total_lines = total_lines.saturating_add(1); // Placeholder or "Thinking..."
        }
        for line in text.lines() {
            // Use character count, not byte length, for proper UTF-8 handling
            let char_count = line.chars().count();
            let wrapped = u16::try_from(char_count / wrap_width + 1).unwrap_or(u16::MAX);
            total_lines = total_lines.saturating_add(wrapped);
        }
        total_lines = total_lines.saturating_add(1); // Blank line after message
    }

    let visible_height = if chat_height > 0 { chat_height } else { 20 };

    total_lines.saturating_sub(visible_height)
}
