use super::*;
use std::collections::HashSet;
use time::macros::datetime;

#[test]
fn admin_with_demo_suffix_authenticates() {
    let account = authenticate("admin@hospital.com", "pass123").unwrap();
    assert_eq!(account.id, "admin-123");
    assert_eq!(account.role, UserRole::Admin);
}

#[test]
fn email_match_ignores_case_and_whitespace() {
    assert_eq!(authenticate(" Doctor@Hospital.com ", "x123").unwrap().id, "doctor-123");
}

#[test]
fn wrong_suffix_is_rejected() {
    assert_eq!(authenticate("admin@hospital.com", "password").unwrap_err(), SessionError::InvalidCredentials);
    assert_eq!(authenticate("admin@hospital.com", "123x").unwrap_err(), SessionError::InvalidCredentials);
}

#[test]
fn unknown_email_is_rejected_even_with_suffix() {
    assert_eq!(authenticate("intruder@hospital.com", "pass123").unwrap_err(), SessionError::InvalidCredentials);
}

#[test]
fn every_role_has_exactly_one_account() {
    let roles: HashSet<UserRole> = DEMO_ACCOUNTS.iter().map(|a| a.role).collect();
    assert_eq!(roles.len(), UserRole::ALL.len());
    let ids: HashSet<&str> = DEMO_ACCOUNTS.iter().map(|a| a.id).collect();
    assert_eq!(ids.len(), DEMO_ACCOUNTS.len());
}

#[test]
fn profile_mirrors_account() {
    let now = datetime!(2024-01-15 10:00 UTC);
    let account = find_account("lab@hospital.com").unwrap();
    let identity = account.identity(now);
    let profile = account.profile(now);
    assert_eq!(identity.id, profile.id);
    assert_eq!(profile.role, UserRole::LabTech);
    assert_eq!(profile.department.as_deref(), Some("Laboratory"));
    assert_eq!(profile.created_at, now);
}
