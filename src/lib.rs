pub mod app;
pub mod auth;
pub mod bmi;
pub mod cache;
pub mod config;
pub mod email;
pub mod error;
pub mod logging;
pub mod state;
pub mod users;
