//! Conversion from transcript entries to `rig::completion::Message`, so a
//! rig agent can receive the session transcript as chat history.

use rig::completion::Message;

use crate::session::{ChatMessage, ChatRole};

pub fn to_rig_message(msg: &ChatMessage) -> Message {
    match msg.role {
        ChatRole::User => Message::user(msg.content.clone()),
        ChatRole::Assistant => Message::assistant(msg.content.clone()),
    }
}

pub fn to_rig_messages(messages: &[ChatMessage]) -> Vec<Message> {
    messages.iter().map(to_rig_message).collect()
}
