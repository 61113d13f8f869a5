pub mod connection;
pub mod fixtures;
pub mod migrations;
pub mod repositories;

pub use connection::{connect, connect_with_config, connect_with_settings, ping, DbPool};
pub use fixtures::{RequestSeedInfo, SeedDataset, SeedResult, VerificationResult};
pub use repositories::{
    ApprovalRepository, ChangeLogRepository, CommentRepository, EventRepository,
    NotificationQueueRepository, RepositoryError, ResourcingRequestRepository,
    SqlApprovalRepository, SqlChangeLogRepository, SqlCommentRepository, SqlEventRepository,
    SqlNotificationQueueRepository, SqlResourcingRequestRepository, SqlUserRepository,
    UserRepository,
};
