pub mod capabilities;
pub mod job;
pub mod unwrap;
