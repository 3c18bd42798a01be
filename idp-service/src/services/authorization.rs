//! Authorization Engine: role and permission assertions over the RBAC graph.

use std::sync::Arc;

use service_core::error::{AppError, ErrorDomain, ErrorKind};
use tracing::{debug, instrument};

use crate::services::metrics::record_assertion;
use crate::store::RbacStore;

pub struct AuthorizationEngine {
    rbac: Arc<dyn RbacStore>,
}

impl AuthorizationEngine {
    pub fn new(rbac: Arc<dyn RbacStore>) -> Self {
        Self { rbac }
    }

    /// Whether the user holds `role`. A missing grant is `Ok(false)`.
    #[instrument(skip(self))]
    pub async fn assert_role(&self, user_id: &str, role: &str) -> Result<bool, AppError> {
        let granted = self
            .rbac
            .assert_role(user_id, role)
            .await
            .map_err(|e| operational(e, "Failed to assert role"))?;
        record_assertion("role", granted);
        debug!(granted, "Role asserted");
        Ok(granted)
    }

    /// Whether the user reaches `permission` through an enabled role.
    #[instrument(skip(self))]
    pub async fn assert_permission(&self, user_id: &str, permission: &str) -> Result<bool, AppError> {
        let granted = self
            .rbac
            .assert_permission(user_id, permission)
            .await
            .map_err(|e| operational(e, "Failed to assert permission"))?;
        record_assertion("permission", granted);
        debug!(granted, "Permission asserted");
        Ok(granted)
    }

    /// Forbidden unless the user holds `role`.
    pub async fn require_role(&self, user_id: &str, role: &str) -> Result<(), AppError> {
        if self.assert_role(user_id, role).await? {
            Ok(())
        } else {
            Err(AppError::forbidden(
                ErrorDomain::UseCase,
                "Insufficient privileges",
            ))
        }
    }
}

fn operational(err: AppError, message: &str) -> AppError {
    AppError::use_case(ErrorKind::Operational, message).with_cause(err)
}
