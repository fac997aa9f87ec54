mod r#trait;
mod factory;

pub use r#trait::{BoxFuture, RunnableTask};
pub use factory::{TaskFactory, TaskRef};
