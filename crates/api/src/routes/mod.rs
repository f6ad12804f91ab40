pub mod compat;
pub mod models;
pub mod transcriptions;
