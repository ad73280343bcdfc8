//! Kid safety policy: maturity, credentials, passwords, approvals and access

pub mod account;
pub mod content;
pub mod credentials;
pub mod facade;
pub mod guard;
pub mod maturity;
pub mod password;
pub mod usage;
pub mod workflow;

pub use account::{KidAccount, KidAccountSettings, KidAccountSummary, SafetyLevel};
pub use facade::{KidSafetyService, KidSafetyServiceBuilder};
pub use credentials::{IssuedLoginCode, LoginCodeSummary};
pub use maturity::{BehavioralMetrics, MaturityLevel, MaturityScore, MaturitySummary};
pub use password::PasswordSettingsSummary;
pub use workflow::{ApprovalSummary, SafetyEventSummary};
