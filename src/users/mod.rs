pub mod dto;
pub mod handlers;
pub mod memory;
pub mod repo;
pub mod repo_types;

pub use handlers::routes as router;
