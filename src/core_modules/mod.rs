pub mod config_loader;
pub mod errors;
pub mod preprocess_config;
pub mod ttv;
