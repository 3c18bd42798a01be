use serde::{Deserialize, Serialize};

use crate::models::Session;
use crate::services::session_authority::EntityRef;

/// Body of `POST /v1/sessions`.
#[derive(Debug, Deserialize)]
pub struct CreateSessionRequest {
    pub session: SessionCredentials,
}

#[derive(Debug, Deserialize)]
pub struct SessionCredentials {
    pub user: UserCredentials,
    #[serde(default)]
    pub domain: EntityRef,
}

#[derive(Debug, Deserialize)]
pub struct UserCredentials {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    /// Required; a missing password is checked as an empty one.
    #[serde(default)]
    pub password: String,
}

impl UserCredentials {
    pub fn reference(&self) -> EntityRef {
        EntityRef {
            id: self.id.clone(),
            name: self.name.clone(),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct SessionResponse {
    pub session: Session,
}
