use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// Common Types
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PageRequest {
    pub page: i32,
    pub per_page: i32,
    pub sort_by: Option<String>,
    pub sort_order: Option<SortOrder>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SortOrder {
    #[serde(rename = "asc")]
    Asc,
    #[serde(rename = "desc")]
    Desc,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PageResponse<T> {
    pub data: Vec<T>,
    pub total: i64,
    pub page: i32,
    pub per_page: i32,
    pub total_pages: i32,
}

/// Audit columns shared by every persisted entity. Embedded by
/// composition rather than inheritance; `version` supports optimistic
/// locking for callers that want it.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct AuditFields {
    pub created_at: DateTime<Utc>,
    pub created_by: Option<Uuid>,
    pub updated_at: DateTime<Utc>,
    pub updated_by: Option<Uuid>,
    pub is_active: bool,
    pub version: i64,
}

impl AuditFields {
    pub fn new(actor: Uuid) -> Self {
        let now = Utc::now();
        Self {
            created_at: now,
            created_by: Some(actor),
            updated_at: now,
            updated_by: Some(actor),
            is_active: true,
            version: 1,
        }
    }

    pub fn touch(&mut self, actor: Uuid) {
        self.updated_at = Utc::now();
        self.updated_by = Some(actor);
        self.version += 1;
    }
}

impl PageRequest {
    pub fn new(page: i32, per_page: i32) -> Self {
        Self {
            page: page.max(1),
            per_page: per_page.clamp(1, 100),
            sort_by: None,
            sort_order: None,
        }
    }

    pub fn offset(&self) -> i64 {
        ((self.page - 1) * self.per_page) as i64
    }

    pub fn limit(&self) -> i64 {
        self.per_page as i64
    }
}

impl<T> PageResponse<T> {
    pub fn new(data: Vec<T>, total: i64, page: i32, per_page: i32) -> Self {
        let total_pages = ((total as f64) / (per_page as f64)).ceil() as i32;
        Self {
            data,
            total,
            page,
            per_page,
            total_pages,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_page_request() {
        let page_req = PageRequest::new(2, 20);
        assert_eq!(page_req.offset(), 20);
        assert_eq!(page_req.limit(), 20);

        let clamped = PageRequest::new(0, 500);
        assert_eq!(clamped.page, 1);
        assert_eq!(clamped.per_page, 100);
    }

    #[test]
    fn test_audit_touch_bumps_version() {
        let actor = Uuid::new_v4();
        let mut audit = AuditFields::new(actor);
        assert_eq!(audit.version, 1);

        let editor = Uuid::new_v4();
        audit.touch(editor);
        assert_eq!(audit.version, 2);
        assert_eq!(audit.updated_by, Some(editor));
    }
}
