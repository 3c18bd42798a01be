//! Services module for idp-service.

pub mod authorization;
pub mod database;
pub mod directory;
pub mod metrics;
pub mod password;
pub mod purge;
pub mod session_authority;
pub mod transaction;

pub use authorization::AuthorizationEngine;
pub use database::Database;
pub use directory::Directory;
pub use metrics::{get_metrics, init_metrics, record_error, record_grpc_request, record_grpc_request_duration};
pub use password::{hasher_for, Argon2Hasher, HashScheme, PasswordHasher, SaltedSha256Hasher};
pub use purge::PurgeScheduler;
pub use session_authority::{EntityRef, SessionAuthority, SessionRequest};
pub use transaction::run_in_transaction;
