//! Chat core of the code studio
//!
//! Assistant replies stream in as text deltas and tool events. The
//! [`assembler`] turns them into one message in the [`conversation`] store,
//! extracting [`annotations`] (diagrams, quizzes, math, code files) as their
//! closing delimiters arrive. The [`controller`] runs one turn at a time
//! against an [`collaborator::LlmCollaborator`].

pub mod annotations;
pub mod assembler;
pub mod cli;
pub mod collaborator;
pub mod config;
pub mod controller;
pub mod conversation;
pub mod logging;
pub mod preview;
pub mod tools;
pub mod transcript;
pub mod widgets;

#[cfg(test)]
mod test_utils;

pub use controller::{ChatController, ChatError, StreamHandle};
pub use conversation::{ConversationStore, Message, MessageStatus};
