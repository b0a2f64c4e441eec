use serde::{Deserialize, Serialize};

use crate::core::DbError;

/// Result of a versioned update that reached the store.
///
/// Backend failures are not an outcome; they come back as `Err(DbError)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateOutcome {
    /// The update was applied; `version` is the new version.
    Success { version: i64 },
    /// No live record matched the identifier and extra conditions.
    NotFound,
    /// The record exists but at `current_version`, not the expected one.
    VersionConflict { current_version: i64 },
}

impl UpdateOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, UpdateOutcome::Success { .. })
    }

    pub fn current_version(&self) -> Option<i64> {
        match self {
            UpdateOutcome::Success { version } => Some(*version),
            UpdateOutcome::VersionConflict { current_version } => Some(*current_version),
            UpdateOutcome::NotFound => None,
        }
    }

    /// Status an HTTP handler would answer with.
    pub fn http_status(&self) -> u16 {
        match self {
            UpdateOutcome::Success { .. } => 200,
            UpdateOutcome::NotFound => 404,
            UpdateOutcome::VersionConflict { .. } => 409,
        }
    }

    pub fn to_response(&self) -> UpdateResponse {
        let error = match self {
            UpdateOutcome::Success { .. } => None,
            UpdateOutcome::NotFound => Some("record not found".to_string()),
            UpdateOutcome::VersionConflict { current_version } => Some(format!(
                "version conflict: record is at version {}",
                current_version
            )),
        };
        UpdateResponse {
            success: self.is_success(),
            updated: self.is_success(),
            current_version: self.current_version(),
            error,
        }
    }
}

/// Wire shape of an update result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdateResponse {
    pub success: bool,
    pub updated: bool,
    pub current_version: Option<i64>,
    pub error: Option<String>,
}

impl UpdateResponse {
    /// Shape for a storage error that escaped the update.
    pub fn from_error(err: &DbError) -> Self {
        Self {
            success: false,
            updated: false,
            current_version: None,
            error: Some(err.to_string()),
        }
    }
}

impl From<UpdateOutcome> for UpdateResponse {
    fn from(outcome: UpdateOutcome) -> Self {
        outcome.to_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_success_response() {
        let response = UpdateOutcome::Success { version: 4 }.to_response();
        assert_eq!(
            serde_json::to_value(&response).unwrap(),
            json!({ "success": true, "updated": true, "current_version": 4, "error": null })
        );
    }

    #[test]
    fn test_conflict_response_carries_current_version() {
        let outcome = UpdateOutcome::VersionConflict { current_version: 7 };
        assert_eq!(outcome.http_status(), 409);

        let response = UpdateResponse::from(outcome);
        assert!(!response.success);
        assert!(!response.updated);
        assert_eq!(response.current_version, Some(7));
        assert!(response.error.unwrap().contains('7'));
    }

    #[test]
    fn test_not_found_response() {
        let outcome = UpdateOutcome::NotFound;
        assert_eq!(outcome.http_status(), 404);
        assert_eq!(outcome.to_response().current_version, None);
    }

    #[test]
    fn test_storage_error_response() {
        let response = UpdateResponse::from_error(&DbError::TableNotFound("companies".into()));
        assert_eq!(response.error.as_deref(), Some("Table 'companies' not found"));
        assert!(!response.success);
    }
}
