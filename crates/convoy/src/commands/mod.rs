pub mod app;
pub mod env;
pub mod logs;
pub mod pipeline;
pub mod svc;
pub mod task;
