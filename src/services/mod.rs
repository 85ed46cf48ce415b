pub mod conversion;
pub mod email_service;
pub mod node_query_service;
pub mod node_store;
pub mod otp_service;
pub mod otp_store;
pub mod profile_store;
pub mod rate_limiter_service;

pub use conversion::ConversionInfo;
pub use email_service::{mailer_from_config, LogMailer, MailerError, OtpMailer, ResendMailer, SmtpMailer};
pub use node_query_service::NodeQueryService;
pub use node_store::{InMemoryNodeStore, NetworkNode, NodeRanking, NodeStore, PgNodeStore};
pub use otp_service::{OtpAuthService, OtpError, OtpPolicy, VerifyCodeInput};
pub use otp_store::{InMemoryOtpStore, OtpRecord, OtpStore, PgOtpStore};
pub use profile_store::{InMemoryProfileStore, PgProfileStore, ProfileStore, UserProfile};
pub use rate_limiter_service::{RateLimitConfig, RateLimitDecision, RateLimiter};
