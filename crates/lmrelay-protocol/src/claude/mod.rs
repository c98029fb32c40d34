pub mod create_message;
pub mod error;
