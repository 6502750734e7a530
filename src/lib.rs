pub mod cli;
pub mod config;
pub mod fetch;
pub mod lookup;
pub mod merge;
pub mod model;
pub mod notify;
pub mod parser;
pub mod registry;
pub mod scheduler;
pub mod store;
pub mod sync;

pub fn get_version() -> String {
    env!("CARGO_PKG_VERSION").to_string()
}
