pub mod chunk;
pub mod cli;
pub mod config;
pub mod error;
pub mod ingest;
pub mod pipeline;
pub mod remote;
pub mod server;
pub mod store;
pub mod stt;
pub mod worker;
