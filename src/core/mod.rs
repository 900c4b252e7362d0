pub mod config;
pub mod movie;
pub mod state;
