pub mod config;
pub mod plate;
