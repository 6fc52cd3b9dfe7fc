// src/agentcollab/mod.rs

pub mod client_wrapper;
pub mod clients;
pub mod config;
pub mod event;
pub mod execution;
pub mod group_chat;
pub mod http_client_pool;
pub mod participant;
pub mod speaker_selection;
pub mod team;
pub mod termination;
pub mod transcript;

// Export GroupChat at the module root so callers can write agentcollab::GroupChat
pub use group_chat::GroupChat;
