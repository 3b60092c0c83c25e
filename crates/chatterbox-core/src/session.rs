//! The chat session: the only owner of the live transcript.
//!
//! Every change to the conversation goes through [`ChatSession`], which
//! validates input, tracks the single in-flight request, and mirrors each
//! committed change into the store.

use tracing::{debug, info, warn};

use crate::ai::{collect_reply, GenerationParams, InferenceBackend, InferenceError, InferenceRequest, ReplyMode};
use crate::state::ChatMessage;
use crate::storage::{KeyValueStore, TranscriptStore};
use crate::transcript::{Transcript, DEFAULT_HISTORY_WINDOW};
use crate::validation::{validate, ValidationError, DEFAULT_MAX_MESSAGE_CHARS};

/// Prefix of the synthetic assistant turn appended when a call fails.
pub const APOLOGY_PREFIX: &str = "Sorry, something went wrong while generating a response";

#[derive(Debug, Clone, PartialEq)]
pub struct SessionOptions {
    pub window: Option<usize>,
    pub max_message_chars: usize,
    pub system_prompt: Option<String>,
    pub params: GenerationParams,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            window: Some(DEFAULT_HISTORY_WINDOW),
            max_message_chars: DEFAULT_MAX_MESSAGE_CHARS,
            system_prompt: None,
            params: GenerationParams::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestState {
    Idle,
    AwaitingResponse { turn: u64 },
}

/// A submitted message waiting for its reply.
#[derive(Debug, Clone)]
pub struct PendingTurn {
    pub turn: u64,
    pub request: InferenceRequest,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TurnOutcome {
    /// The reply was appended.
    Replied,
    /// The call failed; an apology turn carrying the cause was appended.
    Failed(String),
    /// The chat was cleared while the call was in flight; nothing was appended.
    Discarded,
}

pub struct ChatSession<S> {
    transcript: Transcript,
    store: TranscriptStore<S>,
    state: RequestState,
    options: SessionOptions,
    next_turn: u64,
}

impl<S: KeyValueStore> ChatSession<S> {
    /// Start a session, restoring whatever valid transcript the store holds.
    pub fn open(store: S, options: SessionOptions) -> Self {
        let mut store = TranscriptStore::new(store);
        let mut transcript = Transcript::new(options.window);
        if let Some(snapshot) = store.load() {
            debug!(turns = snapshot.len(), "restored transcript");
            transcript.restore(snapshot);
        }
        Self {
            transcript,
            store,
            state: RequestState::Idle,
            options,
            next_turn: 1,
        }
    }

    pub fn transcript(&self) -> &Transcript {
        &self.transcript
    }

    pub fn messages(&self) -> &[ChatMessage] {
        self.transcript.messages()
    }

    pub fn state(&self) -> RequestState {
        self.state
    }

    pub fn is_busy(&self) -> bool {
        matches!(self.state, RequestState::AwaitingResponse { .. })
    }

    pub fn options(&self) -> &SessionOptions {
        &self.options
    }

    pub fn store(&self) -> &TranscriptStore<S> {
        &self.store
    }

    /// Accept a user message and prepare the request for it.
    ///
    /// On rejection nothing changes. On success the user turn is committed
    /// and the session is busy until [`ChatSession::finish`] is called with
    /// the returned turn number.
    pub fn submit(&mut self, text: &str) -> Result<PendingTurn, ValidationError> {
        validate(text, self.is_busy(), self.options.max_message_chars)?;

        let message = text.trim().to_string();
        let request = InferenceRequest {
            system_prompt: self.options.system_prompt.clone(),
            history: self.transcript.messages().to_vec(),
            message: message.clone(),
            params: self.options.params,
        };

        self.transcript.append_user(message);
        self.store.save(self.transcript.messages());

        let turn = self.next_turn;
        self.next_turn += 1;
        self.state = RequestState::AwaitingResponse { turn };
        debug!(turn, history = request.history.len(), "turn submitted");

        Ok(PendingTurn { turn, request })
    }

    /// Commit the result of a call started by [`ChatSession::submit`].
    pub fn finish(&mut self, turn: u64, result: Result<String, InferenceError>) -> TurnOutcome {
        if self.state != (RequestState::AwaitingResponse { turn }) {
            debug!(turn, "dropping reply for a turn that is no longer current");
            return TurnOutcome::Discarded;
        }
        self.state = RequestState::Idle;

        let outcome = match result {
            Ok(text) => {
                info!(turn, chars = text.chars().count(), "reply received");
                self.transcript.append_assistant(text);
                TurnOutcome::Replied
            }
            Err(e) => {
                warn!(turn, error = %e, "inference failed");
                let cause = e.to_string();
                self.transcript
                    .append_assistant(format!("{}: {}", APOLOGY_PREFIX, cause));
                TurnOutcome::Failed(cause)
            }
        };
        self.store.save(self.transcript.messages());
        outcome
    }

    /// Empty the conversation and forget the stored copy.
    ///
    /// A call still in flight is orphaned: its reply will be discarded.
    pub fn clear(&mut self) {
        if let RequestState::AwaitingResponse { turn } = self.state {
            debug!(turn, "clearing with a request in flight");
        }
        self.transcript.clear();
        self.store.delete();
        self.state = RequestState::Idle;
    }

    /// Run a whole turn: submit, call the backend, commit the result.
    pub async fn send<F>(
        &mut self,
        backend: &dyn InferenceBackend,
        text: &str,
        mode: ReplyMode,
        on_update: F,
    ) -> Result<TurnOutcome, ValidationError>
    where
        F: FnMut(&str),
    {
        let pending = self.submit(text)?;
        let result = collect_reply(backend, &pending.request, mode, on_update).await;
        Ok(self.finish(pending.turn, result))
    }
}
