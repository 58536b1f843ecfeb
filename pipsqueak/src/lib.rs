pub mod dash;
pub mod data;
pub mod pip;

pub use dash::Dashboard;
pub use data::{Sample, SampleStore};
