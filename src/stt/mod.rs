pub mod jobs;
pub mod service;
pub mod speech;
