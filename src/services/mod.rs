pub mod detection;
pub mod queue;
pub mod status;
pub mod submission;
pub mod worker;
