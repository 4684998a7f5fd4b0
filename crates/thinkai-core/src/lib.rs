pub mod ai;
pub mod config;
pub mod controller;
pub mod error;
pub mod provider;
pub mod state;
pub mod stream;

// Re-export main types for convenience
pub use ai::{GeminiClient, OllamaClient, OpenAIClient, ProviderRouter};
pub use config::Config;
pub use controller::{ChatController, ChatStatus, PendingReply};
pub use error::{ChatError, ChatResult};
pub use provider::Provider;
pub use state::{ChatSettings, Message, MessageId, Sender, SettingsPatch};
pub use stream::{event_channel, ChatEventStream, ChatStreamer, StreamEvent, StreamRequest, StreamSender};
