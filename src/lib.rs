pub mod auth;
pub mod compactor;
pub mod config;
pub mod engine;
pub mod limits;
pub mod model;
pub mod observability;
pub mod secret;
pub mod slots;
pub mod sql;
pub mod time;
pub mod tls;
pub mod wal;
pub mod wire;
