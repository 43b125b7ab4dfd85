pub mod apply;
pub mod config;
pub mod merge;
pub mod overrides;
pub mod parser;
pub mod session;
pub mod storage;
pub mod types;
