use colored::{ColoredString, Colorize};
use heirloom_sync::{
    FailoverDecision, FlushReport, Notification, NotificationLevel, Region, ReplicaHealth,
    ReplicaSnapshot, SyncOutcome,
};

pub fn banner(title: &str) {
    println!();
    println!("{}", format!("== {title} ==").bright_cyan().bold());
}

pub fn step(message: &str) {
    println!("{} {message}", "->".bright_blue());
}

fn health(status: ReplicaHealth) -> ColoredString {
    match status {
        ReplicaHealth::Online => status.as_str().green(),
        ReplicaHealth::Syncing => status.as_str().yellow(),
        ReplicaHealth::Offline => status.as_str().red(),
    }
}

pub fn region_table(snapshot: &ReplicaSnapshot) {
    println!(
        "{:<16} {:<10} {:<8} {:>9}  {}",
        "REGION".bold(),
        "ROLE".bold(),
        "STATUS".bold(),
        "LATENCY".bold(),
        "LAST SYNC".bold()
    );
    for status in &snapshot.regions {
        let role = if status.region == snapshot.primary {
            "primary"
        } else {
            "secondary"
        };
        let last_sync = status
            .last_sync
            .map(|at| at.format("%H:%M:%S").to_string())
            .unwrap_or_else(|| "never".to_string());
        println!(
            "{:<16} {:<10} {:<8} {:>7}ms  {}",
            status.region.as_str(),
            role,
            health(status.status),
            status.latency_ms,
            last_sync
        );
    }
    if !snapshot.primary_online {
        println!("{}", "primary region is offline".red());
    }
}

pub fn outcome(region: Region, outcome: &SyncOutcome) {
    match outcome {
        SyncOutcome::Skipped => println!("   {region}: {}", "skipped (primary)".dimmed()),
        SyncOutcome::Synced { at } => {
            println!("   {region}: {} at {}", "synced".green(), at.format("%H:%M:%S"));
        }
        SyncOutcome::Failed { reason } => println!("   {region}: {} {reason}", "failed".red()),
    }
}

pub fn decision(decision: &FailoverDecision) {
    let text = match decision {
        FailoverDecision::Primary(region) => format!("keep primary {region}").green(),
        FailoverDecision::Failover(region) => format!("fail over to {region}").yellow(),
        FailoverDecision::Unavailable(region) => {
            format!("no region available, staying on {region}").red()
        }
    };
    println!("   failover: {text}");
}

pub fn flush(report: &FlushReport) {
    match (report.skipped, report.region) {
        (Some(reason), _) => println!("   flush skipped: {reason:?}"),
        (None, Some(region)) => println!(
            "   flushed via {region}: {} applied, {} rejected, {} requeued",
            report.applied, report.rejected, report.requeued
        ),
        (None, None) => println!("   nothing to flush"),
    }
}

pub fn notification(notification: &Notification) {
    let tag = match notification.level {
        NotificationLevel::Info => "info".blue(),
        NotificationLevel::Success => "ok".green(),
        NotificationLevel::Warning => "warn".yellow(),
        NotificationLevel::Error => "error".red(),
    };
    println!(
        "   [{tag}] {}: {}",
        notification.title.bold(),
        notification.description
    );
}
