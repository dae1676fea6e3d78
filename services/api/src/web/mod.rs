pub mod auth;
pub mod chat_task;
pub mod middleware;
pub mod protocol;
pub mod rest;
pub mod state;
pub mod ws_handler;

// Re-export the main WebSocket handler to make it easily accessible
// to the binary that will build the web server router.
pub use middleware::require_auth;
pub use rest::{
    create_session_handler, get_profile_handler, list_sessions_handler, list_turns_handler,
    reset_turns_handler, update_health_handler,
};
pub use ws_handler::ws_handler;
