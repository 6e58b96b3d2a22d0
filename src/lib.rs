pub mod config;
pub mod engine;
pub mod limits;
pub mod maintenance;
pub mod model;
pub mod observability;
pub mod sql;
pub mod wal;
pub mod wire;
