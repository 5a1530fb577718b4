pub mod attachments;
pub mod email;
pub mod export;
pub mod notifications;
pub mod telegram;
