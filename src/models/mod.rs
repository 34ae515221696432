pub mod feedback;
pub mod image;
pub mod inference;
pub mod job;
