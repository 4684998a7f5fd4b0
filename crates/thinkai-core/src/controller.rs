//! Chat state controller.
//!
//! Owns the conversation, the current settings, the streaming status and the
//! last error. Streaming clients never touch this state directly: the caller
//! receives a [`PendingReply`] from [`ChatController::send_message`] and folds
//! its events back in with [`ChatController::apply_event`].

use tracing::{debug, info, warn};

use crate::error::{ChatError, ChatResult};
use crate::state::{ChatSettings, Message, MessageId, Sender, SettingsPatch};
use crate::stream::{ChatEventStream, ChatStreamer, StreamEvent, StreamRequest};

pub const SUMMARY_NOTE: &str = "Conversation has been summarized by the user.";

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum ChatStatus {
    #[default]
    Idle,
    Streaming { reply_id: MessageId },
}

/// Placeholder id plus the event stream that fills it
#[derive(Debug)]
pub struct PendingReply {
    reply_id: MessageId,
    events: ChatEventStream,
}

impl PendingReply {
    pub fn reply_id(&self) -> &MessageId {
        &self.reply_id
    }

    pub fn into_parts(self) -> (MessageId, ChatEventStream) {
        (self.reply_id, self.events)
    }
}

#[derive(Debug, Default)]
pub struct ChatController {
    messages: Vec<Message>,
    settings: ChatSettings,
    status: ChatStatus,
    last_error: Option<String>,
}

pub fn format_error_text(message: &str) -> String {
    format!("Error: {}", message)
}

impl ChatController {
    pub fn new(settings: ChatSettings) -> Self {
        Self {
            settings,
            ..Default::default()
        }
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn settings(&self) -> &ChatSettings {
        &self.settings
    }

    pub fn status(&self) -> &ChatStatus {
        &self.status
    }

    pub fn is_loading(&self) -> bool {
        matches!(self.status, ChatStatus::Streaming { .. })
    }

    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    /// Most recent user message, scanning from the end
    pub fn last_user_message(&self) -> Option<&Message> {
        self.messages.iter().rev().find(|m| m.sender == Sender::User)
    }

    /// Placeholder currently receiving chunks, if any
    pub fn streaming_message(&self) -> Option<&Message> {
        match &self.status {
            ChatStatus::Streaming { reply_id } => {
                self.messages.iter().find(|m| &m.id == reply_id)
            }
            ChatStatus::Idle => None,
        }
    }

    /// Start a new exchange.
    ///
    /// The streamer sees the history including the new user message but not
    /// the bot placeholder. Stream failures arrive later as
    /// [`StreamEvent::Error`]; the only error returned here is
    /// [`ChatError::Busy`].
    pub fn send_message(
        &mut self,
        text: impl Into<String>,
        streamer: &dyn ChatStreamer,
    ) -> ChatResult<PendingReply> {
        if self.is_loading() {
            return Err(ChatError::Busy);
        }

        self.last_error = None;
        self.messages.push(Message::user(text));
        let history = self.messages.clone();

        let placeholder = Message::bot_placeholder();
        let reply_id = placeholder.id.clone();
        self.status = ChatStatus::Streaming {
            reply_id: reply_id.clone(),
        };
        self.messages.push(placeholder);

        debug!(
            reply_id = %reply_id,
            provider = self.settings.provider.as_str(),
            model = %self.settings.model,
            history = history.len(),
            "starting reply stream"
        );

        let events = streamer.stream(StreamRequest {
            messages: history,
            settings: self.settings.clone(),
        });

        Ok(PendingReply { reply_id, events })
    }

    /// Fold one stream event into the conversation
    pub fn apply_event(&mut self, reply_id: &MessageId, event: StreamEvent) {
        match &self.status {
            ChatStatus::Streaming { reply_id: active } if active == reply_id => {}
            _ => {
                warn!(reply_id = %reply_id, ?event, "ignoring event for inactive reply");
                return;
            }
        }

        match event {
            StreamEvent::Chunk(chunk) => {
                if let Some(msg) = self.find_mut(reply_id) {
                    if !msg.error {
                        msg.text.push_str(&chunk);
                    }
                }
            }
            StreamEvent::Done => {
                debug!(reply_id = %reply_id, "reply complete");
                self.status = ChatStatus::Idle;
            }
            StreamEvent::Error(message) => {
                warn!(reply_id = %reply_id, error = %message, "reply failed");
                if let Some(msg) = self.find_mut(reply_id) {
                    msg.error = true;
                    msg.text = format_error_text(&message);
                }
                self.last_error = Some(message);
                self.status = ChatStatus::Idle;
            }
        }
    }

    /// Receive and apply events until the reply's stream ends
    pub async fn drive(&mut self, pending: PendingReply) {
        let (reply_id, mut events) = pending.into_parts();
        while let Some(event) = events.recv().await {
            self.apply_event(&reply_id, event);
        }
    }

    /// Resend the most recent user message.
    ///
    /// Errored bot messages are dropped first. The user message is appended
    /// again rather than reused. Returns `Ok(None)` when there is nothing to
    /// retry.
    pub fn retry_last_message(
        &mut self,
        streamer: &dyn ChatStreamer,
    ) -> ChatResult<Option<PendingReply>> {
        if self.is_loading() {
            return Err(ChatError::Busy);
        }

        let Some(text) = self.last_user_message().map(|m| m.text.clone()) else {
            return Ok(None);
        };

        let before = self.messages.len();
        self.messages.retain(|m| !(m.sender == Sender::Bot && m.error));
        info!(removed = before - self.messages.len(), "retrying last message");

        self.send_message(text, streamer).map(Some)
    }

    pub fn clear_chat(&mut self) {
        self.messages.clear();
        self.last_error = None;
    }

    /// Annotate the conversation as summarized. Purely local.
    pub fn summarize_chat(&mut self) {
        self.messages.push(Message::system(SUMMARY_NOTE));
    }

    pub fn update_settings(&mut self, patch: SettingsPatch) {
        self.settings.merge(patch);
        debug!(settings = ?self.settings, "settings updated");
    }

    fn find_mut(&mut self, id: &MessageId) -> Option<&mut Message> {
        self.messages.iter_mut().find(|m| &m.id == id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::Provider;
    use crate::stream::{event_channel, StreamSender};
    use std::sync::Mutex;

    /// Replays a fixed script of events and records every request
    struct ScriptedStreamer {
        script: Vec<StreamEvent>,
        requests: Mutex<Vec<StreamRequest>>,
        open: Mutex<Vec<StreamSender>>,
    }

    impl ScriptedStreamer {
        fn new(script: Vec<StreamEvent>) -> Self {
            Self {
                script,
                requests: Mutex::new(Vec::new()),
                open: Mutex::new(Vec::new()),
            }
        }

        fn silent() -> Self {
            Self::new(Vec::new())
        }

        fn requests(&self) -> Vec<StreamRequest> {
            self.requests.lock().unwrap().clone()
        }
    }

    impl ChatStreamer for ScriptedStreamer {
        fn stream(&self, request: StreamRequest) -> ChatEventStream {
            self.requests.lock().unwrap().push(request);
            let (tx, rx) = event_channel();
            for event in &self.script {
                match event {
                    StreamEvent::Chunk(text) => tx.chunk(text.clone()),
                    StreamEvent::Done => tx.done(),
                    StreamEvent::Error(message) => tx.fail(message.clone()),
                };
            }
            // Hold the sender so unscripted replies stay open for apply_event
            self.open.lock().unwrap().push(tx);
            rx
        }
    }

    fn texts(chat: &ChatController) -> Vec<(Sender, String, bool)> {
        chat.messages()
            .iter()
            .map(|m| (m.sender, m.text.clone(), m.error))
            .collect()
    }

    #[test]
    fn test_send_appends_user_and_placeholder() {
        let streamer = ScriptedStreamer::silent();
        let mut chat = ChatController::default();

        let pending = chat.send_message("hi", &streamer).unwrap();

        assert_eq!(chat.messages().len(), 2);
        assert_eq!(chat.messages()[0].sender, Sender::User);
        assert_eq!(chat.messages()[0].text, "hi");
        assert_eq!(chat.messages()[1].sender, Sender::Bot);
        assert!(chat.messages()[1].text.is_empty());
        assert_eq!(&chat.messages()[1].id, pending.reply_id());
        assert!(chat.is_loading());
    }

    #[test]
    fn test_each_send_grows_by_two() {
        let streamer = ScriptedStreamer::silent();
        let mut chat = ChatController::default();

        for round in 1..=3 {
            let pending = chat.send_message(format!("q{}", round), &streamer).unwrap();
            assert_eq!(chat.messages().len(), round * 2);
            chat.apply_event(pending.reply_id(), StreamEvent::Done);
        }
    }

    #[test]
    fn test_streamer_sees_history_without_placeholder() {
        let streamer = ScriptedStreamer::silent();
        let mut chat = ChatController::default();
        chat.update_settings(SettingsPatch::model("gpt-4o"));

        chat.send_message("hello", &streamer).unwrap();

        let requests = streamer.requests();
        assert_eq!(requests.len(), 1);
        let history = &requests[0].messages;
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].sender, Sender::User);
        assert_eq!(history[0].text, "hello");
        assert_eq!(requests[0].settings.model, "gpt-4o");
    }

    #[test]
    fn test_chunks_concatenate_in_order() {
        let streamer = ScriptedStreamer::silent();

        let mut split = ChatController::default();
        let pending = split.send_message("hi", &streamer).unwrap();
        split.apply_event(pending.reply_id(), StreamEvent::Chunk("Hel".into()));
        split.apply_event(pending.reply_id(), StreamEvent::Chunk("lo".into()));

        let mut whole = ChatController::default();
        let pending = whole.send_message("hi", &streamer).unwrap();
        whole.apply_event(pending.reply_id(), StreamEvent::Chunk("Hello".into()));

        assert_eq!(split.messages()[1].text, "Hello");
        assert_eq!(split.messages()[1].text, whole.messages()[1].text);
    }

    #[test]
    fn test_chunk_leaves_other_messages_untouched() {
        let streamer = ScriptedStreamer::silent();
        let mut chat = ChatController::default();
        let first = chat.send_message("one", &streamer).unwrap();
        chat.apply_event(first.reply_id(), StreamEvent::Chunk("first".into()));
        chat.apply_event(first.reply_id(), StreamEvent::Done);

        let second = chat.send_message("two", &streamer).unwrap();
        chat.apply_event(second.reply_id(), StreamEvent::Chunk("second".into()));

        assert_eq!(chat.messages()[1].text, "first");
        assert_eq!(chat.messages()[3].text, "second");
        assert_eq!(chat.messages()[2].text, "two");
    }

    #[test]
    fn test_done_returns_to_idle_without_error() {
        let streamer = ScriptedStreamer::silent();
        let mut chat = ChatController::default();
        let pending = chat.send_message("hi", &streamer).unwrap();
        chat.apply_event(pending.reply_id(), StreamEvent::Chunk("hey".into()));
        chat.apply_event(pending.reply_id(), StreamEvent::Done);

        assert!(!chat.is_loading());
        assert_eq!(chat.status(), &ChatStatus::Idle);
        assert!(!chat.messages()[1].error);
        assert_eq!(chat.messages()[1].text, "hey");
        assert_eq!(chat.last_error(), None);
    }

    #[test]
    fn test_error_marks_placeholder() {
        let streamer = ScriptedStreamer::silent();
        let mut chat = ChatController::default();
        let pending = chat.send_message("hi", &streamer).unwrap();
        chat.apply_event(pending.reply_id(), StreamEvent::Chunk("partial".into()));
        chat.apply_event(pending.reply_id(), StreamEvent::Error("boom".into()));

        let bot = &chat.messages()[1];
        assert!(bot.error);
        assert!(bot.text.contains("boom"));
        assert_eq!(bot.text, "Error: boom");
        assert!(!chat.is_loading());
        assert_eq!(chat.last_error(), Some("boom"));
    }

    #[test]
    fn test_chunk_after_error_is_not_appended() {
        let streamer = ScriptedStreamer::silent();
        let mut chat = ChatController::default();
        let pending = chat.send_message("hi", &streamer).unwrap();
        chat.apply_event(pending.reply_id(), StreamEvent::Error("boom".into()));
        chat.apply_event(pending.reply_id(), StreamEvent::Chunk("late".into()));

        let bot = &chat.messages()[1];
        assert_eq!(bot.text, "Error: boom");
        assert!(bot.error);
        assert_eq!(chat.last_error(), Some("boom"));
        assert!(!chat.is_loading());
    }

    #[test]
    fn test_events_for_inactive_reply_are_ignored() {
        let streamer = ScriptedStreamer::silent();
        let mut chat = ChatController::default();
        let first = chat.send_message("one", &streamer).unwrap();
        let stale = first.reply_id().clone();
        chat.apply_event(&stale, StreamEvent::Done);

        chat.apply_event(&stale, StreamEvent::Chunk("late".into()));
        chat.apply_event(&stale, StreamEvent::Error("late".into()));

        assert_eq!(chat.messages()[1].text, "");
        assert!(!chat.messages()[1].error);
        assert_eq!(chat.last_error(), None);
    }

    #[test]
    fn test_send_while_streaming_is_rejected() {
        let streamer = ScriptedStreamer::silent();
        let mut chat = ChatController::default();
        chat.send_message("first", &streamer).unwrap();

        let err = chat.send_message("second", &streamer).unwrap_err();

        assert!(matches!(err, ChatError::Busy));
        assert_eq!(chat.messages().len(), 2);
        assert_eq!(streamer.requests().len(), 1);
    }

    #[test]
    fn test_send_clears_previous_error() {
        let streamer = ScriptedStreamer::silent();
        let mut chat = ChatController::default();
        let pending = chat.send_message("hi", &streamer).unwrap();
        chat.apply_event(pending.reply_id(), StreamEvent::Error("boom".into()));
        assert!(chat.last_error().is_some());

        chat.send_message("again", &streamer).unwrap();
        assert_eq!(chat.last_error(), None);
    }

    #[test]
    fn test_retry_drops_errored_reply_and_duplicates_user() {
        let streamer = ScriptedStreamer::silent();
        let mut chat = ChatController::default();
        let pending = chat.send_message("hi", &streamer).unwrap();
        chat.apply_event(pending.reply_id(), StreamEvent::Error("boom".into()));

        let retry = chat.retry_last_message(&streamer).unwrap();

        assert!(retry.is_some());
        assert_eq!(
            texts(&chat),
            vec![
                (Sender::User, "hi".to_string(), false),
                (Sender::User, "hi".to_string(), false),
                (Sender::Bot, String::new(), false),
            ]
        );
        assert!(chat.is_loading());
        // Errored reply and placeholder never reach the backend
        let history = &streamer.requests()[1].messages;
        assert_eq!(history.len(), 2);
        assert!(history.iter().all(|m| m.sender == Sender::User));
    }

    #[test]
    fn test_retry_uses_most_recent_user_message() {
        let streamer = ScriptedStreamer::silent();
        let mut chat = ChatController::default();
        let first = chat.send_message("first", &streamer).unwrap();
        chat.apply_event(first.reply_id(), StreamEvent::Done);
        let second = chat.send_message("second", &streamer).unwrap();
        chat.apply_event(second.reply_id(), StreamEvent::Error("boom".into()));
        chat.summarize_chat();

        chat.retry_last_message(&streamer).unwrap();

        let last_user = chat.last_user_message().unwrap();
        assert_eq!(last_user.text, "second");
        assert!(chat.messages().iter().all(|m| !m.error));
        assert_eq!(chat.messages().len(), 6);
    }

    #[test]
    fn test_retry_without_user_message_is_noop() {
        let streamer = ScriptedStreamer::silent();

        let mut empty = ChatController::default();
        assert!(empty.retry_last_message(&streamer).unwrap().is_none());
        assert!(empty.messages().is_empty());

        let mut system_only = ChatController::default();
        system_only.summarize_chat();
        let before = system_only.messages().to_vec();
        assert!(system_only.retry_last_message(&streamer).unwrap().is_none());
        assert_eq!(system_only.messages(), before.as_slice());
        assert!(streamer.requests().is_empty());
        assert!(!system_only.is_loading());
    }

    #[test]
    fn test_retry_while_streaming_is_rejected() {
        let streamer = ScriptedStreamer::silent();
        let mut chat = ChatController::default();
        chat.send_message("hi", &streamer).unwrap();

        assert!(matches!(
            chat.retry_last_message(&streamer),
            Err(ChatError::Busy)
        ));
        assert_eq!(chat.messages().len(), 2);
    }

    #[test]
    fn test_clear_chat_resets_messages_and_error() {
        let streamer = ScriptedStreamer::silent();
        let mut chat = ChatController::default();
        let pending = chat.send_message("hi", &streamer).unwrap();
        chat.apply_event(pending.reply_id(), StreamEvent::Error("boom".into()));
        chat.update_settings(SettingsPatch::provider(Provider::Gemini));

        chat.clear_chat();

        assert!(chat.messages().is_empty());
        assert_eq!(chat.last_error(), None);
        assert_eq!(chat.settings().provider, Provider::Gemini);

        chat.clear_chat();
        assert!(chat.messages().is_empty());
    }

    #[test]
    fn test_clear_during_stream_keeps_status_until_terminal() {
        let streamer = ScriptedStreamer::silent();
        let mut chat = ChatController::default();
        let pending = chat.send_message("hi", &streamer).unwrap();

        chat.clear_chat();
        assert!(chat.is_loading());

        chat.apply_event(pending.reply_id(), StreamEvent::Chunk("orphan".into()));
        assert!(chat.messages().is_empty());

        chat.apply_event(pending.reply_id(), StreamEvent::Done);
        assert!(!chat.is_loading());
    }

    #[test]
    fn test_summarize_appends_one_system_message() {
        let streamer = ScriptedStreamer::silent();
        let mut chat = ChatController::default();
        let pending = chat.send_message("hi", &streamer).unwrap();
        chat.apply_event(pending.reply_id(), StreamEvent::Chunk("hello".into()));
        chat.apply_event(pending.reply_id(), StreamEvent::Done);
        let before = chat.messages().to_vec();

        chat.summarize_chat();

        assert_eq!(chat.messages().len(), before.len() + 1);
        assert_eq!(&chat.messages()[..before.len()], before.as_slice());
        let note = chat.messages().last().unwrap();
        assert_eq!(note.sender, Sender::System);
        assert_eq!(note.text, SUMMARY_NOTE);
    }

    #[test]
    fn test_update_settings_merges() {
        let mut chat = ChatController::new(ChatSettings {
            provider: Provider::Ollama,
            model: "llama3.2".to_string(),
            temperature: 0.2,
            system_prompt: "Be brief.".to_string(),
        });

        chat.update_settings(SettingsPatch::temperature(0.9));

        let settings = chat.settings();
        assert_eq!(settings.temperature, 0.9);
        assert_eq!(settings.provider, Provider::Ollama);
        assert_eq!(settings.model, "llama3.2");
        assert_eq!(settings.system_prompt, "Be brief.");
    }

    #[tokio::test]
    async fn test_drive_applies_scripted_reply() {
        let streamer = ScriptedStreamer::new(vec![
            StreamEvent::Chunk("Hel".into()),
            StreamEvent::Chunk("lo".into()),
            StreamEvent::Done,
        ]);
        let mut chat = ChatController::default();

        let pending = chat.send_message("hi", &streamer).unwrap();
        chat.drive(pending).await;

        assert_eq!(chat.messages()[1].text, "Hello");
        assert!(!chat.is_loading());
    }

    #[tokio::test]
    async fn test_drive_turns_dropped_stream_into_error() {
        struct Vanishing;
        impl ChatStreamer for Vanishing {
            fn stream(&self, _request: StreamRequest) -> ChatEventStream {
                let (tx, rx) = event_channel();
                tx.chunk("part");
                rx
            }
        }

        let mut chat = ChatController::default();
        let pending = chat.send_message("hi", &Vanishing).unwrap();
        chat.drive(pending).await;

        let bot = &chat.messages()[1];
        assert!(bot.error);
        assert_eq!(
            bot.text,
            format_error_text(crate::stream::STREAM_CLOSED_MESSAGE)
        );
        assert!(!chat.is_loading());
    }
}
