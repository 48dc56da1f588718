pub mod job;
pub mod prediction;
pub mod submission;
