//! Parent-issued login codes and their QR rendering

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use chrono::{DateTime, Duration, Utc};
use image::{ColorType, ImageEncoder, Luma};
use qrcode::{EcLevel, QrCode};
use rand::Rng;
use rand::rngs::OsRng;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::clock::Clock;
use crate::config::LoginCodeConfig;
use crate::error::{LoginCodeRejection, SafetyError, SafetyResult};
use crate::safety::account::KidAccount;
use crate::safety::maturity::MaturityLevel;
use crate::store::{CodeRedemption, RevokeOutcome, SafetyStore, StorageError};

/// Uppercase letters and digits minus the easily confused I, O, 0 and 1
pub const CODE_ALPHABET: &[u8] = b"ABCDEFGHJKLMNPQRSTUVWXYZ23456789";
pub const CODE_LENGTH: usize = 8;
pub const MAX_EXPIRATION_DAYS: u32 = 365;

pub fn generate_code<R: Rng + ?Sized>(rng: &mut R) -> String {
    (0..CODE_LENGTH)
        .map(|_| CODE_ALPHABET[rng.gen_range(0..CODE_ALPHABET.len())] as char)
        .collect()
}

/// Canonical form of user-typed input
pub fn normalize_code(input: &str) -> String {
    input.trim().to_ascii_uppercase()
}

/// Short SHA-256 prefix for logs
pub fn code_fingerprint(code: &str) -> String {
    let digest = Sha256::digest(code.as_bytes());
    hex::encode(&digest[..6])
}

const PNG_DATA_URL_PREFIX: &str = "data:image/png;base64,";

/// Render a code as a `data:image/png;base64,...` QR image
pub fn render_visual_code(code: &str, module_size: u32) -> anyhow::Result<String> {
    let qr = QrCode::with_error_correction_level(code.as_bytes(), EcLevel::Q)?;
    let image = qr
        .render::<Luma<u8>>()
        .module_dimensions(module_size, module_size)
        .build();

    let mut png = Vec::new();
    image::codecs::png::PngEncoder::new(&mut png).write_image(
        image.as_raw(),
        image.width(),
        image.height(),
        ColorType::L8,
    )?;

    Ok(format!("{}{}", PNG_DATA_URL_PREFIX, STANDARD.encode(&png)))
}

/// Raw PNG bytes of a rendered visual code
pub fn decode_visual_code(data_url: &str) -> anyhow::Result<Vec<u8>> {
    let payload = data_url
        .strip_prefix(PNG_DATA_URL_PREFIX)
        .ok_or_else(|| anyhow::anyhow!("Visual code is not a PNG data URL"))?;
    Ok(STANDARD.decode(payload)?)
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct KidLoginCode {
    pub id: Uuid,
    pub code: String,
    pub kid_account_id: Uuid,
    pub parent_id: Uuid,
    pub expiration_days: u32,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    /// QR data URL; absent when rendering failed at issue time
    #[serde(default)]
    pub visual_code: Option<String>,
    pub is_used: bool,
    pub used_at: Option<DateTime<Utc>>,
    pub is_revoked: bool,
    pub revoked_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub failed_attempts: u32,
    #[serde(default)]
    pub last_attempt_at: Option<DateTime<Utc>>,
}

impl KidLoginCode {
    /// Redeemability, checked in order: used, revoked, expired
    pub fn check_redeemable(&self, now: DateTime<Utc>) -> Result<(), LoginCodeRejection> {
        if self.is_used {
            return Err(LoginCodeRejection::AlreadyUsed);
        }
        if self.is_revoked {
            return Err(LoginCodeRejection::Revoked);
        }
        if self.expires_at <= now {
            return Err(LoginCodeRejection::Expired);
        }
        Ok(())
    }

    pub fn is_active(&self, now: DateTime<Utc>) -> bool {
        self.check_redeemable(now).is_ok()
    }
}

/// A login code as shown to parents; attempt bookkeeping stays in the store
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LoginCodeSummary {
    pub id: Uuid,
    pub code: String,
    pub kid_account_id: Uuid,
    pub parent_id: Uuid,
    pub expires_at: DateTime<Utc>,
    pub is_used: bool,
    pub used_at: Option<DateTime<Utc>>,
    pub is_revoked: bool,
    pub revoked_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl From<&KidLoginCode> for LoginCodeSummary {
    fn from(code: &KidLoginCode) -> Self {
        Self {
            id: code.id,
            code: code.code.clone(),
            kid_account_id: code.kid_account_id,
            parent_id: code.parent_id,
            expires_at: code.expires_at,
            is_used: code.is_used,
            used_at: code.used_at,
            is_revoked: code.is_revoked,
            revoked_at: code.revoked_at,
            created_at: code.created_at,
        }
    }
}

/// What the parent gets back when a code is issued
#[derive(Debug, Clone, Serialize)]
pub struct IssuedLoginCode {
    pub code_id: Uuid,
    pub code: String,
    pub visual_code: Option<String>,
    pub expires_at: DateTime<Utc>,
    pub expiration_days: u32,
    pub maturity_level: MaturityLevel,
}

/// Issues, redeems and revokes login codes
pub struct CredentialIssuer {
    store: Arc<dyn SafetyStore>,
    clock: Arc<dyn Clock>,
    config: LoginCodeConfig,
}

impl CredentialIssuer {
    pub fn new(store: Arc<dyn SafetyStore>, clock: Arc<dyn Clock>, config: LoginCodeConfig) -> Self {
        Self { store, clock, config }
    }

    /// `expiration_days` of `None` or zero derives the lifetime from the maturity level
    pub async fn issue(
        &self,
        account: &KidAccount,
        parent_id: Uuid,
        expiration_days: Option<u32>,
        level: MaturityLevel,
    ) -> SafetyResult<IssuedLoginCode> {
        let days = match expiration_days {
            Some(days) if days > 0 => days,
            _ => self.config.expiration_days.days_for(level),
        };
        if days > MAX_EXPIRATION_DAYS {
            return Err(SafetyError::validation(format!(
                "Expiration must be at most {} days, got {}",
                MAX_EXPIRATION_DAYS, days
            )));
        }

        let now = self.clock.now();
        let expires_at = now + Duration::days(i64::from(days));

        for attempt in 1..=self.config.max_generation_attempts {
            let code = generate_code(&mut OsRng);
            let visual_code = match render_visual_code(&code, self.config.qr_module_size) {
                Ok(url) => Some(url),
                Err(e) => {
                    warn!(kid_account_id = %account.id, error = %e, "Failed to render visual login code");
                    None
                }
            };

            let record = KidLoginCode {
                id: Uuid::new_v4(),
                code,
                kid_account_id: account.id,
                parent_id,
                expiration_days: days,
                created_at: now,
                expires_at,
                visual_code,
                is_used: false,
                used_at: None,
                is_revoked: false,
                revoked_at: None,
                failed_attempts: 0,
                last_attempt_at: None,
            };

            match self.store.insert_login_code(&record, now).await {
                Ok(()) => {
                    info!(
                        kid_account_id = %account.id,
                        code_id = %record.id,
                        fingerprint = %code_fingerprint(&record.code),
                        days,
                        level = %level,
                        "Issued login code"
                    );
                    return Ok(IssuedLoginCode {
                        code_id: record.id,
                        code: record.code,
                        visual_code: record.visual_code,
                        expires_at,
                        expiration_days: days,
                        maturity_level: level,
                    });
                }
                Err(StorageError::Conflict(_)) => {
                    debug!(kid_account_id = %account.id, attempt, "Login code collided with an active code");
                }
                Err(e) => return Err(e.into()),
            }
        }

        Err(StorageError::Conflict(format!(
            "No unique login code after {} attempts",
            self.config.max_generation_attempts
        ))
        .into())
    }

    /// Consume a code; the returned record is the redeemed one
    pub async fn redeem(&self, input: &str) -> SafetyResult<KidLoginCode> {
        let code = normalize_code(input);
        let fingerprint = code_fingerprint(&code);

        match self.store.redeem_login_code(&code, self.clock.now()).await? {
            CodeRedemption::Redeemed(record) => {
                info!(kid_account_id = %record.kid_account_id, code_id = %record.id, %fingerprint, "Login code redeemed");
                Ok(record)
            }
            CodeRedemption::Rejected(reason) => {
                info!(%fingerprint, %reason, "Login code rejected");
                Err(SafetyError::LoginCodeRejected(reason))
            }
        }
    }

    /// Returns false when the code was already used or revoked
    pub async fn revoke(&self, code_id: Uuid) -> SafetyResult<bool> {
        match self.store.revoke_login_code(code_id, self.clock.now()).await? {
            None => Err(SafetyError::not_found("Login code", code_id)),
            Some(RevokeOutcome::Revoked(record)) => {
                info!(kid_account_id = %record.kid_account_id, code_id = %code_id, "Login code revoked");
                Ok(true)
            }
            Some(outcome) => {
                debug!(code_id = %code_id, ?outcome, "Login code already inactive");
                Ok(false)
            }
        }
    }

    /// Revoke every active code of a kid, returning how many were revoked
    pub async fn revoke_all(&self, kid_account_id: Uuid) -> SafetyResult<usize> {
        let mut revoked = 0;
        for code in self.active_codes(kid_account_id).await? {
            if self.revoke(code.id).await? {
                revoked += 1;
            }
        }
        Ok(revoked)
    }

    /// Active codes, newest first
    pub async fn active_codes(&self, kid_account_id: Uuid) -> SafetyResult<Vec<KidLoginCode>> {
        let now = self.clock.now();
        let mut codes: Vec<KidLoginCode> = self
            .store
            .login_codes_for_kid(kid_account_id)
            .await?
            .into_iter()
            .filter(|code| code.is_active(now))
            .collect();
        codes.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(codes)
    }
}
