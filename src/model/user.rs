use serde::{Deserialize, Serialize};

/// A (user_id, nickname) pair as returned by the nickname-lookup endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserIdentity {
    #[serde(alias = "userNum")]
    pub user_id: i64,
    pub nickname: String,
}
