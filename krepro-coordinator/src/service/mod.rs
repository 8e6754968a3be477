pub mod task;

pub use task::{TaskService, TaskServiceDefault, TaskServiceError};
