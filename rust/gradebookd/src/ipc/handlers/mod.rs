pub mod aggregation;
pub mod backup;
pub mod categories;
pub mod core;
pub mod directory;
pub mod grades;
pub mod reports;
pub mod setup;
