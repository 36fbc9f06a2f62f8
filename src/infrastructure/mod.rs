pub mod config;
pub mod error;
pub mod lesson_repository;
pub mod logging;
pub mod notification_channel;
pub mod request_repository;
pub mod slot_repository;
pub mod storage;
