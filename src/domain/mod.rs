pub mod forms;
pub mod lifecycle;
pub mod models;
pub mod urgency;
