#![forbid(unsafe_code)]

pub mod repository;
pub mod sqlite;

pub use repository::{
    ExamContentRepository, ExamListing, ExamResultRepository, ExamResultRow, InMemoryRepository,
    ResultId, Storage, StorageError,
};
