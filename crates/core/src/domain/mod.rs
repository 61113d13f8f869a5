pub mod approval;
pub mod comment;
pub mod documents;
pub mod notification_task;
pub mod resourcing_request;
pub mod user;
