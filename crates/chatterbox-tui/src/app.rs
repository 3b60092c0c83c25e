use std::sync::Arc;

use chatterbox_core::{
    build_backend, collect_reply, ChatSession, Config, FileStore, HuggingFaceClient,
    InferenceBackend, InferenceError, OllamaClient, OpenAIClient, Provider, ReplyMode,
    TurnOutcome,
};
use ratatui::layout::Rect;
use ratatui::widgets::ListState;
use tokio::sync::mpsc::UnboundedSender;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::tui::AppEvent;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputMode {
    Normal,
    Editing,
}

pub struct App {
    // Core state
    pub should_quit: bool,
    pub input_mode: InputMode,

    // Conversation
    pub session: ChatSession<FileStore>,
    pub reply_mode: ReplyMode,
    /// Text streamed so far for the turn in flight
    pub live_reply: Option<String>,
    pub reply_task: Option<JoinHandle<()>>,
    /// Transient validation message, cleared on the next attempt
    pub notice: Option<String>,

    // Input state
    pub input: String,
    pub cursor: usize,

    // Chat view state
    pub chat_scroll: u16,
    pub chat_height: u16,
    pub chat_width: u16,
    pub chat_area: Option<Rect>,
    pub animation_frame: u8,

    // Model picker state
    pub show_model_picker: bool,
    pub available_models: Vec<String>,
    pub model_picker_state: ListState,

    // Provider state
    pub config: Config,
    pub current_provider: Provider,
    pub selected_model: String,
    pub backend: Arc<dyn InferenceBackend>,
    pub show_provider_picker: bool,
    pub provider_picker_state: ListState,

    // API key input state
    pub show_api_key_input: bool,
    pub api_key_input: String,
    pub api_key_input_cursor: usize,
    pub api_key_target_provider: Option<Provider>,

    events: UnboundedSender<AppEvent>,
}

impl App {
    pub fn new(
        config: Config,
        store: FileStore,
        provider: Provider,
        model: String,
        events: UnboundedSender<AppEvent>,
    ) -> anyhow::Result<Self> {
        let session = ChatSession::open(store, config.session_options());
        let backend = build_backend(provider, &model, &config)?;
        let reply_mode = config.reply_mode();

        let mut app = Self {
            should_quit: false,
            input_mode: InputMode::Editing,

            session,
            reply_mode,
            live_reply: None,
            reply_task: None,
            notice: None,

            input: String::new(),
            cursor: 0,

            chat_scroll: 0,
            chat_height: 0,
            chat_width: 0,
            chat_area: None,
            animation_frame: 0,

            show_model_picker: false,
            available_models: Vec::new(),
            model_picker_state: ListState::default(),

            config,
            current_provider: provider,
            selected_model: model,
            backend,
            show_provider_picker: false,
            provider_picker_state: ListState::default(),

            show_api_key_input: false,
            api_key_input: String::new(),
            api_key_input_cursor: 0,
            api_key_target_provider: None,

            events,
        };
        app.scroll_chat_to_bottom();
        Ok(app)
    }

    pub fn is_busy(&self) -> bool {
        self.session.is_busy()
    }

    /// Submit the input box as a new user turn.
    pub fn send_message(&mut self) {
        self.notice = None;

        let pending = match self.session.submit(&self.input) {
            Ok(pending) => pending,
            Err(e) => {
                self.notice = Some(e.to_string());
                return;
            }
        };

        self.input.clear();
        self.cursor = 0;
        self.live_reply = Some(String::new());
        self.scroll_chat_to_bottom();

        // Spawn background task to query the AI provider
        let backend = self.backend.clone();
        let mode = self.reply_mode;
        let tx = self.events.clone();
        let turn = pending.turn;
        self.reply_task = Some(tokio::spawn(async move {
            let delta_tx = tx.clone();
            let result = collect_reply(backend.as_ref(), &pending.request, mode, |buffer| {
                let _ = delta_tx.send(AppEvent::Delta {
                    turn,
                    buffer: buffer.to_string(),
                });
            })
            .await;
            let _ = tx.send(AppEvent::Reply { turn, result });
        }));
    }

    pub fn on_delta(&mut self, turn: u64, buffer: String) {
        if self.is_current_turn(turn) {
            self.live_reply = Some(buffer);
            self.scroll_chat_to_bottom();
        }
    }

    pub fn on_reply(&mut self, turn: u64, result: Result<String, InferenceError>) {
        match self.session.finish(turn, result) {
            TurnOutcome::Discarded => {}
            outcome => {
                if let TurnOutcome::Failed(cause) = &outcome {
                    warn!(turn, %cause, "turn failed");
                }
                self.live_reply = None;
                self.reply_task = None;
                self.scroll_chat_to_bottom();
            }
        }
    }

    fn is_current_turn(&self, turn: u64) -> bool {
        self.session.state() == chatterbox_core::RequestState::AwaitingResponse { turn }
    }

    /// Empty the conversation. A reply still in flight is abandoned.
    pub fn clear_chat(&mut self) {
        if let Some(task) = self.reply_task.take() {
            task.abort();
        }
        self.session.clear();
        self.live_reply = None;
        self.notice = None;
        self.chat_scroll = 0;
        info!("chat cleared");
    }

    /// Tick animation frame (called by Tick event)
    pub fn tick_animation(&mut self) {
        if self.is_busy() {
            self.animation_frame = (self.animation_frame + 1) % 3;
        }
    }

    pub fn scroll_down(&mut self, lines: u16) {
        let max = self.total_chat_lines().saturating_sub(self.visible_height());
        self.chat_scroll = self.chat_scroll.saturating_add(lines).min(max);
    }

    pub fn scroll_up(&mut self, lines: u16) {
        self.chat_scroll = self.chat_scroll.saturating_sub(lines);
    }

    /// Scroll chat to bottom so the newest turn (or "Thinking...") is visible
    pub fn scroll_chat_to_bottom(&mut self) {
        let total_lines = self.total_chat_lines();
        let visible_height = self.visible_height();
        self.chat_scroll = total_lines.saturating_sub(visible_height);
    }

    fn visible_height(&self) -> u16 {
        if self.chat_height > 0 {
            self.chat_height
        } else {
            20
        }
    }

    /// Rough count of rendered chat lines, used for scrolling.
    fn total_chat_lines(&self) -> u16 {
        // Use actual chat width for wrap calculation, default to 50 if not set
        let wrap_width = if self.chat_width > 0 {
            self.chat_width as usize
        } else {
            50
        };

        let mut total_lines: usize = 0;
        let mut count = |content: &str| {
            total_lines += 1; // Role line ("You:" or "AI:")
            for line in content.lines() {
                // Use character count, not byte length, for proper UTF-8 handling
                total_lines += line.chars().count() / wrap_width + 1;
            }
            total_lines += 1; // Blank line after message
        };

        for msg in self.session.messages() {
            count(&msg.content);
        }
        if self.is_busy() {
            match self.live_reply.as_deref() {
                Some(text) if !text.is_empty() => count(text),
                _ => count("Thinking..."),
            }
        }

        u16::try_from(total_lines).unwrap_or(u16::MAX)
    }

    // Model picker methods
    pub fn model_picker_nav_down(&mut self) {
        let len = self.available_models.len();
        if len > 0 {
            let i = self.model_picker_state.selected().unwrap_or(0);
            self.model_picker_state.select(Some((i + 1).min(len - 1)));
        }
    }

    pub fn model_picker_nav_up(&mut self) {
        let i = self.model_picker_state.selected().unwrap_or(0);
        self.model_picker_state.select(Some(i.saturating_sub(1)));
    }

    pub async fn open_model_picker(&mut self) {
        let models = match self.current_provider {
            Provider::Ollama => match OllamaClient::new(self.config.ollama_url(), &self.selected_model) {
                Ok(client) => client.list_models().await.unwrap_or_else(|e| {
                    warn!(error = %e, "could not list Ollama models");
                    Vec::new()
                }),
                Err(_) => Vec::new(),
            },
            provider => Self::models_for_provider(provider),
        };
        self.available_models = models;
        if self.available_models.is_empty() {
            self.notice = Some(format!(
                "No models available for {}",
                self.current_provider.display_name()
            ));
            return;
        }
        // Select current model if in list, otherwise first
        let current_idx = self
            .available_models
            .iter()
            .position(|m| m == &self.selected_model)
            .unwrap_or(0);
        self.model_picker_state.select(Some(current_idx));
        self.show_model_picker = true;
    }

    pub fn select_model(&mut self) {
        if let Some(model) = self
            .model_picker_state
            .selected()
            .and_then(|i| self.available_models.get(i))
            .cloned()
        {
            self.show_model_picker = false;
            self.switch_backend(self.current_provider, model);
        }
    }

    // Provider picker methods
    pub fn provider_picker_nav_down(&mut self) {
        let len = Provider::all().len();
        let i = self.provider_picker_state.selected().unwrap_or(0);
        self.provider_picker_state.select(Some((i + 1).min(len - 1)));
    }

    pub fn provider_picker_nav_up(&mut self) {
        let i = self.provider_picker_state.selected().unwrap_or(0);
        self.provider_picker_state.select(Some(i.saturating_sub(1)));
    }

    pub fn open_provider_picker(&mut self) {
        let current_idx = Provider::all()
            .iter()
            .position(|p| *p == self.current_provider)
            .unwrap_or(0);
        self.provider_picker_state.select(Some(current_idx));
        self.show_provider_picker = true;
    }

    pub fn select_provider(&mut self) {
        self.show_provider_picker = false;
        let Some(provider) = self
            .provider_picker_state
            .selected()
            .and_then(|i| Provider::all().get(i).copied())
        else {
            return;
        };

        // Ask for a key first if we have none for this provider
        if self.config.key_source(provider).is_none() {
            self.api_key_target_provider = Some(provider);
            self.show_api_key_input = true;
            self.api_key_input.clear();
            self.api_key_input_cursor = 0;
            return;
        }
        self.switch_backend(provider, provider.default_model().to_string());
    }

    pub fn submit_api_key(&mut self) {
        let key = self.api_key_input.trim().to_string();
        if let Some(provider) = self.api_key_target_provider.take() {
            if !key.is_empty() {
                self.config.set_api_key(provider, &key);
                self.switch_backend(provider, provider.default_model().to_string());
            }
        }
        self.close_api_key_input();
    }

    pub fn close_api_key_input(&mut self) {
        self.show_api_key_input = false;
        self.api_key_input.clear();
        self.api_key_input_cursor = 0;
        self.api_key_target_provider = None;
    }

    pub fn models_for_provider(provider: Provider) -> Vec<String> {
        match provider {
            Provider::HuggingFace => HuggingFaceClient::list_models(),
            Provider::OpenAI => OpenAIClient::list_models(),
            Provider::Ollama => Vec::new(), // Fetched from the server
        }
    }

    /// Rebuild the backend for a new provider/model and remember the choice.
    fn switch_backend(&mut self, provider: Provider, model: String) {
        match build_backend(provider, &model, &self.config) {
            Ok(backend) => {
                info!(provider = provider.as_str(), %model, "switched backend");
                self.backend = backend;
                self.current_provider = provider;
                self.selected_model = model;

                self.config.provider = Some(provider.as_str().to_string());
                self.config.default_model = Some(self.selected_model.clone());
                if let Err(e) = self.config.save() {
                    warn!(error = %e, "failed to save config");
                }
            }
            Err(e) => {
                self.notice = Some(e.to_string());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chatterbox_core::{RequestState, SessionOptions};
    use tempfile::TempDir;
    use tokio::sync::mpsc;

    fn app(dir: &TempDir) -> (App, mpsc::UnboundedReceiver<AppEvent>) {
        let mut config = Config::new();
        // Nothing listens here, so a spawned call fails fast
        config.ollama_url = Some("http://127.0.0.1:9".into());
        let (tx, rx) = mpsc::unbounded_channel();
        let app = App::new(
            config,
            FileStore::new(dir.path()),
            Provider::Ollama,
            "mistral:latest".into(),
            tx,
        )
        .unwrap();
        (app, rx)
    }

    fn current_turn(app: &App) -> u64 {
        match app.session.state() {
            RequestState::AwaitingResponse { turn } => turn,
            RequestState::Idle => panic!("no turn in flight"),
        }
    }

    #[tokio::test]
    async fn test_deltas_for_current_turn_update_live_reply() {
        let dir = TempDir::new().unwrap();
        let (mut app, _rx) = app(&dir);
        let turn = app.session.submit("hi").unwrap().turn;

        app.on_delta(turn, "Hel".into());
        assert_eq!(app.live_reply.as_deref(), Some("Hel"));

        app.on_reply(turn, Ok("Hello".into()));
        assert!(app.live_reply.is_none());
        assert!(!app.is_busy());
        assert_eq!(app.session.messages().len(), 2);
    }

    #[tokio::test]
    async fn test_stale_delta_after_clear_is_ignored() {
        let dir = TempDir::new().unwrap();
        let (mut app, _rx) = app(&dir);
        let turn = app.session.submit("hi").unwrap().turn;

        app.clear_chat();
        app.on_delta(turn, "late".into());
        assert!(app.live_reply.is_none());
    }

    #[tokio::test]
    async fn test_reply_after_clear_leaves_transcript_empty() {
        let dir = TempDir::new().unwrap();
        let (mut app, _rx) = app(&dir);
        app.input = "hi".into();
        app.send_message();
        assert!(app.is_busy());
        assert!(app.reply_task.is_some());
        assert!(app.input.is_empty());
        let turn = current_turn(&app);

        app.clear_chat();
        assert!(app.reply_task.is_none());
        assert!(!app.is_busy());

        app.on_reply(turn, Ok("late".into()));
        assert!(app.session.messages().is_empty());
        assert!(app.live_reply.is_none());

        // Nothing comes back from disk either
        let reopened = ChatSession::open(FileStore::new(dir.path()), SessionOptions::default());
        assert!(reopened.messages().is_empty());
    }

    #[tokio::test]
    async fn test_rejected_input_sets_notice() {
        let dir = TempDir::new().unwrap();
        let (mut app, _rx) = app(&dir);
        app.input = "   ".into();
        app.send_message();
        assert!(app.notice.is_some());
        assert!(!app.is_busy());
        assert!(app.reply_task.is_none());
    }
}
