// Library interface for cabwatch
// This allows integration tests to access the modules

pub mod coordinator;
pub mod extractor;
pub mod logging;
pub mod network;
pub mod options;
pub mod report;
pub mod resolver;
pub mod storage;
pub mod utils;
