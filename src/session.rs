//! Per-chat conversation state.

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

use teloxide::types::ChatId;
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChatState {
    Idle,
    AwaitingInput,
    Processing,
    Replied,
}

/// Explicit `ChatId -> ChatState` map. The lock is only held for transitions.
#[derive(Debug, Clone, Default)]
pub struct SessionStore {
    states: Arc<RwLock<HashMap<ChatId, ChatState>>>,
}

impl SessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self, chat: ChatId) -> ChatState {
        self.states
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&chat)
            .copied()
            .unwrap_or(ChatState::Idle)
    }

    pub fn set(&self, chat: ChatId, state: ChatState) {
        let previous = self
            .states
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(chat, state);
        debug!(chat_id = %chat, from = ?previous.unwrap_or(ChatState::Idle), to = ?state, "chat state changed");
    }

    /// Moves the chat into `Processing`, unless a request is still in flight
    /// (`Processing`, or `Replied` while the answer is being delivered).
    ///
    /// The returned guard puts the chat back into `AwaitingInput` when dropped,
    /// whatever happened in between.
    pub fn begin_processing(&self, chat: ChatId) -> Option<ProcessingGuard> {
        let mut states = self.states.write().unwrap_or_else(PoisonError::into_inner);
        let state = states.entry(chat).or_insert(ChatState::Idle);
        if matches!(*state, ChatState::Processing | ChatState::Replied) {
            return None;
        }
        let from = *state;
        *state = ChatState::Processing;
        drop(states);

        debug!(chat_id = %chat, from = ?from, to = ?ChatState::Processing, "chat state changed");
        Some(ProcessingGuard {
            store: self.clone(),
            chat,
        })
    }
}

#[must_use = "dropping the guard ends processing immediately"]
pub struct ProcessingGuard {
    store: SessionStore,
    chat: ChatId,
}

impl ProcessingGuard {
    pub fn replied(&self) {
        self.store.set(self.chat, ChatState::Replied);
    }
}

impl Drop for ProcessingGuard {
    fn drop(&mut self) {
        self.store.set(self.chat, ChatState::AwaitingInput);
    }
}
