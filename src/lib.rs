pub mod config;
pub mod error;
pub mod importer;
pub mod logging;
pub mod poller;
pub mod record;
pub mod storage;
pub mod version;
