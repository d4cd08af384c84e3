//! Rule-based auto-reply: a greeting gets the welcome message, an exact
//! option key gets that option's answer, everything else is left alone.

pub mod admin;
pub mod autoreply;
pub mod engine;

pub use admin::{ChatbotAdmin, ChatbotView, OptionInput};
pub use autoreply::{execute_action, AutoReply};
pub use engine::{is_greeting, Action, ChatbotEngine};

/// Option keys are stored and matched in this form.
pub fn normalize_key(key: &str) -> String {
    key.trim().to_lowercase()
}
