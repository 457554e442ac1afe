pub mod config;
pub mod directory;
pub mod error;
pub mod module;
pub mod types;

pub use config::ServiceConfig;
pub use directory::{DirectoryUser, StaticDirectory, UserDirectory};
pub use error::ServiceError;
pub use module::Module;
pub use types::{ListResult, merge_patch, new_message_id, now_rfc3339};
