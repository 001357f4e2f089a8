pub mod ai;
pub mod config;
pub mod error;
pub mod presenter;
pub mod session;
pub mod state;
pub mod stream;

// Re-export main types for convenience
pub use ai::ChatClient;
pub use config::ChatConfig;
pub use error::ChatError;
pub use presenter::{typing_ticker, PresenterState, TickOutcome, TypingPresenter};
pub use session::{ChannelSink, ChatSession};
pub use state::{ChatRole, Conversation, ConversationMessage, StreamUpdate, TurnHandle, UpdateKind};
pub use stream::{DeltaAggregator, FnSink, FragmentSink, SseRecord, StreamEvent};
