pub mod resolve;
pub mod show_config;
