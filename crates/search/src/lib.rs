//! Search engine backends and the shared application configuration.

mod command;
mod config;
mod http;

pub use command::CommandSearchEngine;
pub use config::{
    parse_bool, AppConfig, SearchBackend, DEFAULT_BIND_ADDR, DEFAULT_CACHE_DIR,
    DEFAULT_MAX_UPLOAD_MB, DEFAULT_PROJECTS_ROOT, DEFAULT_SCORE_MODEL, DEFAULT_SEARCH_COMMAND,
    DEFAULT_SEARCH_ENDPOINT,
};
pub use http::HttpSearchEngine;
