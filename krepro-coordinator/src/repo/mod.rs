pub mod task;
pub mod worker;

pub use task::{DbTaskRepo, TaskRepo, TaskRepoError};
pub use worker::{DbWorkerRepo, WorkerRepo, WorkerRepoError};
