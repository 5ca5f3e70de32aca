//! Demo accounts used when no backend is configured.
//!
//! One account per role. Any password ending in `123` is accepted, so
//! `admin@hospital.com` / `pass123` signs in as the administrator. The table
//! is rebuilt on every start and never persisted.

use time::OffsetDateTime;

use crate::error::SessionError;
use crate::types::{Identity, ProfileRecord, UserRole};

pub const DEMO_PASSWORD_SUFFIX: &str = "123";

/// A demo account: login email plus the profile it resolves to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DemoAccount {
    pub id: &'static str,
    pub email: &'static str,
    pub full_name: &'static str,
    pub role: UserRole,
    pub department: Option<&'static str>,
    pub phone: Option<&'static str>,
}

pub static DEMO_ACCOUNTS: [DemoAccount; 7] = [
    DemoAccount {
        id: "admin-123",
        email: "admin@hospital.com",
        full_name: "Dr. Sarah Admin",
        role: UserRole::Admin,
        department: Some("Administration"),
        phone: Some("+1-555-0100"),
    },
    DemoAccount {
        id: "doctor-123",
        email: "doctor@hospital.com",
        full_name: "Dr. Michael Chen",
        role: UserRole::Doctor,
        department: Some("Cardiology"),
        phone: Some("+1-555-0101"),
    },
    DemoAccount {
        id: "nurse-123",
        email: "nurse@hospital.com",
        full_name: "Emily Rodriguez",
        role: UserRole::Nurse,
        department: Some("General Ward"),
        phone: Some("+1-555-0102"),
    },
    DemoAccount {
        id: "receptionist-123",
        email: "receptionist@hospital.com",
        full_name: "James Wilson",
        role: UserRole::Receptionist,
        department: Some("Front Office"),
        phone: Some("+1-555-0103"),
    },
    DemoAccount {
        id: "pharmacist-123",
        email: "pharmacist@hospital.com",
        full_name: "Priya Patel",
        role: UserRole::Pharmacist,
        department: Some("Pharmacy"),
        phone: Some("+1-555-0104"),
    },
    DemoAccount {
        id: "lab-123",
        email: "lab@hospital.com",
        full_name: "David Kim",
        role: UserRole::LabTech,
        department: Some("Laboratory"),
        phone: Some("+1-555-0105"),
    },
    DemoAccount {
        id: "finance-123",
        email: "finance@hospital.com",
        full_name: "Linda Thompson",
        role: UserRole::Finance,
        department: Some("Billing"),
        phone: Some("+1-555-0106"),
    },
];

impl DemoAccount {
    #[must_use]
    pub fn identity(&self, now: OffsetDateTime) -> Identity {
        Identity { id: self.id.to_string(), email: self.email.to_string(), created_at: now }
    }

    #[must_use]
    pub fn profile(&self, now: OffsetDateTime) -> ProfileRecord {
        ProfileRecord {
            id: self.id.to_string(),
            email: self.email.to_string(),
            full_name: self.full_name.to_string(),
            role: self.role,
            department: self.department.map(str::to_string),
            phone: self.phone.map(str::to_string),
            created_at: now,
            updated_at: now,
        }
    }
}

#[must_use]
pub fn find_account(email: &str) -> Option<&'static DemoAccount> {
    let email = email.trim();
    DEMO_ACCOUNTS
        .iter()
        .find(|account| account.email.eq_ignore_ascii_case(email))
}

/// Check a demo credential pair.
///
/// # Errors
///
/// [`SessionError::InvalidCredentials`] for an unknown email or a password
/// without the demo suffix.
pub fn authenticate(email: &str, password: &str) -> Result<&'static DemoAccount, SessionError> {
    match find_account(email) {
        Some(account) if password.ends_with(DEMO_PASSWORD_SUFFIX) => Ok(account),
        _ => Err(SessionError::InvalidCredentials),
    }
}

#[cfg(test)]
#[path = "demo_test.rs"]
mod tests;
