use anyhow::{Context, Result};
use chrono::{NaiveTime, TimeZone, Utc};

use kid_safety::KidSafetyService;
use kid_safety::platform::atomic_write;
use kid_safety::safety::credentials::decode_visual_code;

use super::utils::{format_time, print_json};
use crate::cli::{CodeCommands, PasswordCommands};

pub async fn code(service: &KidSafetyService, command: CodeCommands) -> Result<()> {
    match command {
        CodeCommands::Issue { kid, parent, days, qr_out } => {
            let issued = service.generate_login_code(kid, parent, days).await?;
            println!("✓ Login code: {}", issued.code);
            println!("  ID:       {}", issued.code_id);
            println!("  Level:    {}", issued.maturity_level);
            println!(
                "  Expires:  {} ({} days)",
                format_time(issued.expires_at),
                issued.expiration_days
            );

            if let Some(path) = qr_out {
                let data_url = issued
                    .visual_code
                    .as_deref()
                    .context("No QR image was rendered for this code")?;
                let png = decode_visual_code(data_url)?;
                atomic_write(&path, &png)?;
                println!("  QR image: {}", path.display());
            }
        }
        CodeCommands::Validate { code } => {
            let redeemed = service
                .redeem_login_code(&code)
                .await
                .context("Code rejected")?;
            println!("✓ Code accepted for kid account {}", redeemed.kid_account_id);
        }
        CodeCommands::Revoke { code_id, parent } => {
            if service.revoke_login_code(code_id, parent).await? {
                println!("✓ Revoked login code {}", code_id);
            } else {
                println!("Login code {} was already used or revoked", code_id);
            }
        }
        CodeCommands::List { kid, parent } => {
            let codes = service.active_login_codes(kid, parent).await?;
            if codes.is_empty() {
                println!("No active login codes");
            }
            for code in &codes {
                println!(
                    "{}  {}  expires {}",
                    code.id,
                    code.code,
                    format_time(code.expires_at)
                );
            }
        }
    }
    Ok(())
}

pub async fn password(service: &KidSafetyService, command: PasswordCommands) -> Result<()> {
    match command {
        PasswordCommands::Set { kid, parent, password } => {
            let summary = service.set_kid_password(kid, parent, &password).await?;
            println!("✓ Password set for kid account {}", kid);
            println!("  Kid may change it: {}", summary.can_change_password);
        }
        PasswordCommands::Revoke { kid, parent, reason } => {
            match service.try_revoke_password_access(kid, parent, &reason).await {
                Ok(()) => println!("✓ Password access revoked for kid account {}", kid),
                Err(e) if e.is_soft_denial() => println!("✗ Not revoked: {}", e),
                Err(e) => return Err(e.into()),
            }
        }
        PasswordCommands::Independence { kid, parent, date } => {
            let at = Utc.from_utc_datetime(&date.and_time(NaiveTime::MIN));
            let summary = service.schedule_independence_day(kid, parent, at).await?;
            match summary.independence_day {
                Some(day) => println!("✓ Independence day scheduled for {}", format_time(day)),
                None => println!("✓ Independence day scheduled"),
            }
        }
        PasswordCommands::Status { kid, parent } => {
            match service.password_settings(kid, parent).await? {
                Some(summary) => print_json(&summary)?,
                None => println!("No password set for kid account {}", kid),
            }
        }
    }
    Ok(())
}
