pub mod webhook;

pub use webhook::{WebhookNotifier, WebhookSubject, USER_AGENT};
