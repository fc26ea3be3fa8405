//! Provisioning entities read by the query path, and the lookup seams used
//! to fetch them.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::errors::DnsError;

/// Activation state of a phone.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PhoneStatus {
    Active,
    Inactive,
}

impl PhoneStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PhoneStatus::Active => "active",
            PhoneStatus::Inactive => "inactive",
        }
    }
}

/// A named set of NAPTR records.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Profile {
    pub profile_id: String,
    pub name: String,
    pub tier: i64,
    pub created: DateTime<Utc>,
}

/// A phone number activated against a profile.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Phone {
    pub phone_id: String,
    /// National significant number, digits only.
    pub number: String,
    pub country_code: String,
    pub profile_id: String,
    /// Stored as provisioned; compared case-insensitively.
    pub status: String,
    pub created: DateTime<Utc>,
}

impl Phone {
    pub fn is_active(&self) -> bool {
        self.status.eq_ignore_ascii_case(PhoneStatus::Active.as_str())
    }
}

/// A NAPTR row of a profile.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    pub record_id: String,
    pub profile_id: String,
    pub order: u16,
    pub preference: u16,
    pub flags: String,
    pub service: String,
    /// Bare match pattern, e.g. `^.*$`.
    pub regexp: String,
    /// Target URI the pattern rewrites to.
    pub uri: String,
    /// `.` means no replacement.
    pub replacement: String,
    pub ttl: u32,
    pub domain_name: String,
    pub partner_id: Option<String>,
    pub created: DateTime<Utc>,
}

/// Phone lookups needed by the resolution engine.
#[async_trait]
pub trait PhoneLookup: Send + Sync {
    /// Find the phone provisioned for a national number and country code.
    async fn get_by_number(
        &self,
        number: &str,
        country_code: &str,
    ) -> Result<Option<Phone>, DnsError>;

    /// All phones of a profile, oldest first.
    async fn get_by_profile_id(&self, profile_id: &str) -> Result<Vec<Phone>, DnsError>;
}

/// Record lookups needed by the resolution engine.
#[async_trait]
pub trait RecordLookup: Send + Sync {
    /// Records of a profile ordered by `(order, preference)` ascending.
    async fn get_records_by_profile_id(&self, profile_id: &str) -> Result<Vec<Record>, DnsError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn phone(status: &str) -> Phone {
        Phone {
            phone_id: "p1".into(),
            number: "2015550123".into(),
            country_code: "1".into(),
            profile_id: "profile".into(),
            status: status.into(),
            created: Utc::now(),
        }
    }

    #[test]
    fn status_is_compared_case_insensitively() {
        assert!(phone("active").is_active());
        assert!(phone("ACTIVE").is_active());
        assert!(phone("Active").is_active());
        assert!(!phone("inactive").is_active());
        assert!(!phone("").is_active());
    }
}
