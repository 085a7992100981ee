//! Client → Server request bodies and query parameters

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::types::{AdminSettings, InputField, Role, UserStatus};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegisterRequest {
    pub name: String,
    pub email: String,
    pub password: String,
}

/// Partial profile update; absent fields are left untouched
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProfileUpdate {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PasswordChange {
    pub current_password: String,
    pub new_password: String,
}

/// Body for creating or replacing a tool
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolDraft {
    pub title: String,
    pub description: String,
    pub category: String,
    pub prompt: String,
    pub input_fields: Vec<InputField>,
    pub is_public: bool,
}

/// Input values keyed by field name
pub type ToolInput = HashMap<String, Value>;

/// Query for `GET /tools`
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolQuery {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub page: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub limit: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub search: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
}

/// Query for paginated admin listings (`/admin/logs`, `/admin/users`)
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PageQuery {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub page: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub limit: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub search: Option<String>,
}

/// Partial user update issued by an administrator
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UserUpdate {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub role: Option<Role>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<UserStatus>,
}

/// Partial settings update
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SettingsUpdate {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub maintenance: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_concurrent_executions: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rate_limits: Option<crate::types::RateLimits>,
}

impl From<AdminSettings> for SettingsUpdate {
    fn from(settings: AdminSettings) -> Self {
        Self {
            maintenance: Some(settings.maintenance),
            max_concurrent_executions: Some(settings.max_concurrent_executions),
            rate_limits: Some(settings.rate_limits),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tool_query_skips_unset_fields() {
        let query = ToolQuery {
            limit: Some(6),
            user_id: Some("u1".to_string()),
            ..Default::default()
        };
        let json = serde_json::to_value(&query).expect("serialize");
        assert_eq!(json, serde_json::json!({"limit": 6, "userId": "u1"}));
    }

    #[test]
    fn password_change_uses_camel_case() {
        let body = PasswordChange {
            current_password: "old".to_string(),
            new_password: "new".to_string(),
        };
        let json = serde_json::to_value(&body).expect("serialize");
        assert_eq!(json["currentPassword"], "old");
        assert_eq!(json["newPassword"], "new");
    }

    #[test]
    fn user_update_serializes_only_changes() {
        let update = UserUpdate {
            status: Some(UserStatus::Blocked),
            ..Default::default()
        };
        let json = serde_json::to_string(&update).expect("serialize");
        assert_eq!(json, r#"{"status":"blocked"}"#);
    }
}
