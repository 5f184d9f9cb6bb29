pub mod config;
pub mod demo;

pub use config::ShowConfig;
pub use demo::Demo;
