// Job bookkeeping and the batch execution engine

pub mod job;
pub mod runner;

pub use job::*;
pub use runner::*;
