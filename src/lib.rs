pub mod blob;
pub mod config;
pub mod device;
pub mod display_log;
pub mod error;
pub mod events;
pub mod model;
pub mod processing;
pub mod retry;
pub mod selector;
pub mod sink;
pub mod store;
pub mod tasks {
    pub mod rotation;
}
