//! Provider specific [`ClientWrapper`](crate::client_wrapper::ClientWrapper) implementations.
//!
//! Every backend the group chat talks to speaks the OpenAI chat completions
//! dialect; local servers such as Ollama are reached through the same client
//! with a different base URL.

pub mod common;

pub mod openai;
