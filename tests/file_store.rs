use assert_fs::prelude::*;
use predicates::prelude::*;
use std::sync::Arc;
use uuid::Uuid;

use kid_safety::config::{EXAMPLE_CONFIG, load_config, load_or_default};
use kid_safety::safety::SafetyLevel;
use kid_safety::{JsonStore, KidSafetyService, MaturityLevel, SafetyConfig};

fn service_at(path: &std::path::Path) -> KidSafetyService {
    let store = JsonStore::open(path).unwrap();
    KidSafetyService::new(Arc::new(store), SafetyConfig::default())
}

#[tokio::test]
async fn state_survives_restart() {
    let temp = assert_fs::TempDir::new().unwrap();
    let state = temp.child("data").child("state.json");
    let parent = Uuid::new_v4();

    let (kid_id, code) = {
        let service = service_at(state.path());
        let kid = service
            .create_kid_account(parent, Uuid::new_v4(), 14, SafetyLevel::Moderate)
            .await
            .unwrap();
        service.set_kid_password(kid.id, parent, "tiger123").await.unwrap();
        let issued = service.generate_login_code(kid.id, parent, None).await.unwrap();
        (kid.id, issued.code)
    };

    state.assert(predicate::path::exists());
    state.assert(predicate::str::contains("\"version\": \"1.0\""));
    state.assert(predicate::str::contains("$argon2"));
    let content = std::fs::read_to_string(state.path()).unwrap();
    assert!(predicate::str::contains("tiger123").not().eval(content.as_str()));

    let service = service_at(state.path());
    let account = service.get_kid_account(kid_id).await.unwrap().unwrap();
    assert_eq!(account.parent_id, parent);
    assert_eq!(service.get_maturity_score(kid_id).await.unwrap().level, MaturityLevel::Medium);
    assert!(service.validate_login_code(&code).await.unwrap());

    // The redemption itself was persisted
    let service = service_at(state.path());
    assert!(!service.validate_login_code(&code).await.unwrap());

    temp.close().unwrap();
}

#[tokio::test]
async fn services_sharing_a_state_file_see_each_other() {
    let temp = assert_fs::TempDir::new().unwrap();
    let state = temp.child("state.json");
    let parent = Uuid::new_v4();

    let first = service_at(state.path());
    let second = service_at(state.path());

    let older = first
        .create_kid_account(parent, Uuid::new_v4(), 10, SafetyLevel::Moderate)
        .await
        .unwrap();
    let younger = second
        .create_kid_account(parent, Uuid::new_v4(), 7, SafetyLevel::Strict)
        .await
        .unwrap();
    assert_eq!(first.kid_accounts_for_parent(parent).await.unwrap().len(), 2);

    let issued = second.generate_login_code(older.id, parent, None).await.unwrap();
    let (a, b) = tokio::join!(
        first.validate_login_code(&issued.code),
        second.validate_login_code(&issued.code)
    );
    assert_eq!([a.unwrap(), b.unwrap()].iter().filter(|won| **won).count(), 1);

    let reopened = service_at(state.path());
    assert!(reopened.get_kid_account(younger.id).await.unwrap().is_some());
    assert!(!reopened.validate_login_code(&issued.code).await.unwrap());

    temp.close().unwrap();
}

#[tokio::test]
async fn missing_state_file_starts_empty() {
    let temp = assert_fs::TempDir::new().unwrap();
    let state = temp.child("state.json");

    let service = service_at(state.path());
    assert!(service.kid_accounts_for_parent(Uuid::new_v4()).await.unwrap().is_empty());
    state.assert(predicate::path::missing());
}

#[test]
fn foreign_state_version_is_refused() {
    let temp = assert_fs::TempDir::new().unwrap();
    let state = temp.child("state.json");
    state
        .write_str(r#"{"version": "0.1", "accounts": {}}"#)
        .unwrap();

    assert!(JsonStore::open(state.path()).is_err());
}

#[test]
fn example_config_loads_with_defaults() {
    let temp = assert_fs::TempDir::new().unwrap();
    let config_file = temp.child("kid-safety.yaml");
    config_file.write_str(EXAMPLE_CONFIG).unwrap();

    let config = load_config(config_file.path()).unwrap();
    assert_eq!(config.login_codes.expiration_days.days_for(MaturityLevel::Low), 7);
    assert_eq!(config.login_codes.expiration_days.days_for(MaturityLevel::High), 90);
    assert_eq!(config.approvals.expiration_days, 7);
    assert!(config.storage.state_path.is_none());
}

#[test]
fn configured_state_path_wins() {
    let temp = assert_fs::TempDir::new().unwrap();
    let config_file = temp.child("kid-safety.yaml");
    let state = temp.child("custom").child("state.json");
    config_file
        .write_str(&format!("storage:\n  state_path: {}\n", state.path().display()))
        .unwrap();

    let config = load_config(config_file.path()).unwrap();
    assert_eq!(config.state_path().unwrap(), state.path());
}

#[test]
fn absent_config_falls_back_to_defaults() {
    let temp = assert_fs::TempDir::new().unwrap();
    let config = load_or_default(temp.child("nope.yaml").path()).unwrap();
    assert_eq!(config.passwords.min_length, 4);
}

#[test]
fn shrinking_expiration_is_rejected() {
    let temp = assert_fs::TempDir::new().unwrap();
    let config_file = temp.child("kid-safety.yaml");
    config_file
        .write_str("login_codes:\n  expiration_days:\n    low: 30\n    medium: 7\n    high: 90\n")
        .unwrap();

    let err = load_config(config_file.path()).unwrap_err();
    assert!(format!("{:#}", err).contains("must not shrink"));
}
