pub mod inference;
pub mod publisher;
pub mod queue;
pub mod tuning;
pub mod worker;
