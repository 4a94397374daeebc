//! Talking-head rendering client.

pub mod client;
pub mod webhook;

pub use client::{PollOutcome, ProviderTaskId, TalkingHeadBackend, TalkingHeadClient};
pub use webhook::WebhookRegistry;
