pub mod conversation;
pub mod domain;
pub mod normalizer;
pub mod ports;
pub mod prompts;
pub mod relay;

#[cfg(test)]
mod test_support;

pub use conversation::Conversation;
pub use domain::{
    ActivityLevel, ChatSession, DietaryRestriction, HealthProfile, ModelConfig, Part, Role,
    StoredTurn, Turn, UserRecord,
};
pub use normalizer::normalize_turns;
pub use ports::{
    AuthSessionStore, GenerativeModelService, MessageStore, PortError, PortResult, ProfileStore,
    SessionStore,
};
pub use relay::ResponseRelay;
