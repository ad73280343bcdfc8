use anyhow::Result;
use uuid::Uuid;

use kid_safety::KidSafetyService;
use kid_safety::safety::ApprovalSummary;

use super::utils::format_time;
use crate::cli::{AccessCommands, ApprovalCommands, EventCommands};

pub async fn panic(service: &KidSafetyService, kid: Uuid, message: Option<String>) -> Result<()> {
    if !service.trigger_panic_button(kid, message.as_deref()).await {
        anyhow::bail!("Failed to record panic button event for kid account {}", kid);
    }
    println!("✓ Emergency event recorded for kid account {}", kid);
    Ok(())
}

pub async fn events(service: &KidSafetyService, command: EventCommands) -> Result<()> {
    match command {
        EventCommands::List { kid, parent, days } => {
            let events = service.safety_events(kid, parent, days).await?;
            if events.is_empty() {
                println!("No safety events in the last {} days", days);
            }
            for event in &events {
                let state = if event.is_resolved { "resolved" } else { "open" };
                println!(
                    "{}  {}  {:?}  {}  {}  {}",
                    event.id,
                    format_time(event.created_at),
                    event.severity,
                    event.event_type,
                    state,
                    event.description
                );
            }
        }
        EventCommands::Resolve { event_id, parent, notes } => {
            service.resolve_safety_event(event_id, parent, notes).await?;
            println!("✓ Resolved safety event {}", event_id);
        }
    }
    Ok(())
}

pub async fn approvals(service: &KidSafetyService, command: ApprovalCommands) -> Result<()> {
    match command {
        ApprovalCommands::Request { kid, request_type, target } => {
            let approval = service
                .create_approval_request(kid, request_type, target, None)
                .await?;
            if approval.auto_approved {
                println!("✓ Request {} auto-approved (score {:.2})", approval.id, approval.safety_score);
            } else {
                println!("✓ Request {} awaiting parent review (score {:.2})", approval.id, approval.safety_score);
            }
        }
        ApprovalCommands::Pending { parent } => {
            let pending = service.pending_approval_requests(parent).await?;
            if pending.is_empty() {
                println!("No pending approval requests");
            }
            for approval in &pending {
                print_approval_line(approval);
            }
        }
        ApprovalCommands::Decide { approval_id, parent, deny, notes } => {
            let approval = service
                .decide_approval_request(approval_id, parent, !deny, notes)
                .await?;
            println!("✓ Request {} is now {:?}", approval.id, approval.status);
        }
    }
    Ok(())
}

pub async fn access(service: &KidSafetyService, command: AccessCommands) -> Result<()> {
    match command {
        AccessCommands::Check { kid } => {
            let decision = service.can_kid_access_platform(kid).await?;
            let report = service.usage_today(kid).await?;
            match decision.reason {
                None => println!("✓ Access allowed"),
                Some(reason) => println!("✗ Access denied: {}", reason),
            }
            println!(
                "  Used today: {}/{} minutes ({:.0}%)",
                report.minutes_used, report.max_daily_minutes, report.percentage_used
            );
        }
        AccessCommands::Record { kid, minutes } => {
            let total = service.record_usage(kid, minutes).await?;
            println!("✓ Recorded {} minutes, {} minutes used today", minutes, total);
        }
    }
    Ok(())
}

fn print_approval_line(approval: &ApprovalSummary) {
    println!(
        "{}  kid {}  {:?} -> {}  score {:.2}  expires {}",
        approval.id,
        approval.kid_account_id,
        approval.request_type,
        approval.target_user_id,
        approval.safety_score,
        format_time(approval.expires_at)
    );
}
