pub mod app;
pub mod cli;
pub mod collector;
pub mod config;
pub mod data;
pub mod logging;
pub mod platforms;
pub mod utils;
