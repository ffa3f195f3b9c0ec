use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::Validate;

use rentora_shared::types::AuditFields;

use super::enums::LocationType;

/// Physical site holding inventory
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Location {
    pub id: Uuid,
    pub code: String,
    pub name: String,
    pub location_type: LocationType,
    pub address: Option<String>,
    pub contact_number: Option<String>,
    pub contact_email: Option<String>,
    pub deleted_at: Option<DateTime<Utc>>,
    pub deleted_by: Option<Uuid>,
    #[sqlx(flatten)]
    #[serde(flatten)]
    pub audit: AuditFields,
}

#[derive(Debug, Clone, Validate, Deserialize)]
pub struct CreateLocationRequest {
    #[validate(length(min = 1, max = 20))]
    pub code: String,
    #[validate(length(min = 1, max = 100))]
    pub name: String,
    pub location_type: LocationType,
    #[validate(length(max = 500))]
    pub address: Option<String>,
    #[validate(length(max = 30))]
    pub contact_number: Option<String>,
    #[validate(email)]
    pub contact_email: Option<String>,
}

impl Location {
    pub fn new(request: CreateLocationRequest, created_by: Uuid) -> Self {
        Self {
            id: Uuid::new_v4(),
            code: request.code.trim().to_uppercase(),
            name: request.name,
            location_type: request.location_type,
            address: request.address,
            contact_number: request.contact_number,
            contact_email: request.contact_email,
            deleted_at: None,
            deleted_by: None,
            audit: AuditFields::new(created_by),
        }
    }

    pub fn soft_delete(&mut self, deleted_by: Uuid) {
        self.audit.is_active = false;
        self.deleted_at = Some(Utc::now());
        self.deleted_by = Some(deleted_by);
        self.audit.touch(deleted_by);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_location_code_is_normalized() {
        let request = CreateLocationRequest {
            code: " mn-01 ".to_string(),
            name: "Main Store".to_string(),
            location_type: LocationType::Store,
            address: None,
            contact_number: None,
            contact_email: None,
        };
        let location = Location::new(request, Uuid::new_v4());
        assert_eq!(location.code, "MN-01");
    }

    #[test]
    fn test_soft_delete_stamps_actor() {
        let request = CreateLocationRequest {
            code: "WH-01".to_string(),
            name: "Central Warehouse".to_string(),
            location_type: LocationType::Warehouse,
            address: None,
            contact_number: None,
            contact_email: None,
        };
        let mut location = Location::new(request, Uuid::new_v4());
        let admin = Uuid::new_v4();

        location.soft_delete(admin);

        assert!(!location.audit.is_active);
        assert_eq!(location.deleted_by, Some(admin));
        assert!(location.deleted_at.is_some());
    }
}
