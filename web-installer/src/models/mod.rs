pub mod config;
pub mod responses;
pub mod settings;
pub mod state;
pub mod user;
