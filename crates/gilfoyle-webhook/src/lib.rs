//! GitLab webhook intake: authenticate and classify deliveries, then admit
//! review runs through the shared run registry.

pub mod server;
pub mod validator;

pub use server::{router, serve, AppState};
pub use validator::{classify, Classification, EventKind, TriggerDecision, WebhookEvent};
