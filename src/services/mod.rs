pub mod detector;
pub mod encryption;
pub mod memory;
pub mod notifier;
pub mod queue;
pub mod records;
pub mod retry;
pub mod storage;
pub mod submitter;
pub mod worker;
