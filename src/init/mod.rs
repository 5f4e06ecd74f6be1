pub mod agent;
pub mod args;
pub mod config;
