pub mod config;
pub mod export;
pub mod import;
pub mod presets;
pub mod probe;
