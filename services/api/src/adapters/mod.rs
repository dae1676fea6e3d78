pub mod db;
pub mod gemini;
pub mod sse;

pub use db::DbAdapter;
pub use gemini::GeminiAdapter;
