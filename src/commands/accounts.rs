use anyhow::Result;

use kid_safety::KidSafetyService;
use kid_safety::safety::{KidAccountSummary, MaturitySummary};

use super::utils::{format_time, print_json};
use crate::cli::{AccountCommands, MaturityCommands};

pub async fn account(service: &KidSafetyService, command: AccountCommands) -> Result<()> {
    match command {
        AccountCommands::Create { parent, user, age, safety_level } => {
            let account = service.create_kid_account(parent, user, age, safety_level).await?;
            let score = service.get_maturity_score(account.id).await?;
            println!("✓ Created kid account: {}", account.id);
            println!("  Maturity: {} ({}/100)", score.level, score.total);
        }
        AccountCommands::Show { kid } => match service.get_kid_account(kid).await? {
            Some(account) => print_json(&account)?,
            None => anyhow::bail!("Kid account not found: {}", kid),
        },
        AccountCommands::List { parent } => {
            let accounts = service.kid_accounts_for_parent(parent).await?;
            if accounts.is_empty() {
                println!("No kid accounts for parent {}", parent);
            }
            for account in &accounts {
                print_account_line(account);
            }
        }
        AccountCommands::Deactivate { kid, parent } => {
            service.deactivate_kid_account(kid, parent).await?;
            println!("✓ Deactivated kid account {} and revoked its login codes", kid);
        }
    }
    Ok(())
}

pub async fn maturity(service: &KidSafetyService, command: MaturityCommands) -> Result<()> {
    match command {
        MaturityCommands::Show { kid } => {
            let score = service.get_maturity_score(kid).await?;
            print_score(&score);
        }
        MaturityCommands::Rate { kid, parent, rating, notes } => {
            let previous = service.get_maturity_score(kid).await?.level;
            let score = service
                .update_parent_assessment(kid, parent, rating, notes)
                .await?;
            println!("✓ Recorded parent rating {}/5", rating);
            if score.level != previous {
                println!("  Level changed: {} -> {}", previous, score.level);
            }
            print_score(&score);
        }
    }
    Ok(())
}

fn print_account_line(account: &KidAccountSummary) {
    let status = if account.is_active { "active" } else { "inactive" };
    println!(
        "{}  age {:>2}  {:?}  {}  created {}",
        account.id,
        account.age,
        account.safety_level,
        status,
        format_time(account.created_at)
    );
}

fn print_score(score: &MaturitySummary) {
    println!("Maturity for {}", score.kid_account_id);
    println!("  Level:      {}", score.level);
    println!("  Total:      {}/100", score.total);
    println!("  Age:        {}", score.age_component);
    println!("  Parent:     {} (rating {}/5)", score.parent_assessment, score.parent_rating);
    println!("  Behavioral: {}", score.behavioral_component);
    if let Some(changed_at) = score.level_changed_at {
        println!("  Last level change: {}", format_time(changed_at));
    }
}
