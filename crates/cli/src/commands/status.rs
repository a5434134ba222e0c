//! Scaling status command

use anyhow::Result;
use colored::Colorize;
use tabled::{settings::Style, Table, Tabled};

use crate::client::{ApiClient, ScalingInfo, WorkerStats};
use crate::output::{
    color_action, format_seconds, format_timestamp, format_utilization, print_json, OutputFormat,
};

/// Row for worker stats table
#[derive(Tabled)]
struct QueueRow {
    #[tabled(rename = "Queue")]
    queue: String,
    #[tabled(rename = "Queued")]
    queued: u64,
    #[tabled(rename = "Capacity")]
    capacity: u64,
    #[tabled(rename = "Working")]
    working: u64,
    #[tabled(rename = "Idle")]
    idle: u64,
    #[tabled(rename = "Utilization")]
    utilization: String,
}

impl From<&WorkerStats> for QueueRow {
    fn from(stats: &WorkerStats) -> Self {
        Self {
            queue: stats.queue.clone(),
            queued: stats.queue_size,
            capacity: stats.available_capacity,
            working: stats.working_count,
            idle: stats.idle_count,
            utilization: format_utilization(stats.working_count, stats.available_capacity),
        }
    }
}

/// Show the current pool state and the decision the next check would take
pub async fn show_status(client: &ApiClient, format: OutputFormat) -> Result<()> {
    let status = client.scaling_status().await?;

    match format {
        OutputFormat::Json => print_json(&status)?,
        OutputFormat::Table => {
            println!("{}", "Worker Pool Status".bold());
            println!("{}", "=".repeat(60));
            println!(
                "Bounds:       {} - {} workers",
                status.config.min_workers, status.config.max_workers
            );
            println!(
                "Thresholds:   up at {} queued, down at {} queued",
                status.config.scale_up_threshold, status.config.scale_down_threshold
            );
            println!(
                "Cooldown:     {}",
                format_seconds(status.config.scale_cooldown_minutes * 60)
            );
            println!();

            print_info_section(&status.info);

            println!();
            println!("As of: {}", format_timestamp(&status.timestamp).dimmed());
        }
    }

    Ok(())
}

/// Workers, queues, decision and cooldown, shared with the trigger command
pub fn print_info_section(info: &ScalingInfo) {
    let workers = &info.current_workers;
    println!("{}", "Workers".bold());
    println!("{}", "-".repeat(60));
    println!(
        "Running: {}   Stopped: {}   Total: {}",
        workers.running.to_string().green(),
        workers.stopped,
        workers.total
    );
    println!();

    if !info.worker_stats.is_empty() {
        let rows: Vec<QueueRow> = info.worker_stats.iter().map(QueueRow::from).collect();
        println!("{}", Table::new(rows).with(Style::rounded()));
        println!();
    }

    let decision = &info.scaling_decision;
    println!("{}", "Decision".bold());
    println!("{}", "-".repeat(60));
    println!("Action:  {}", color_action(&decision.action));
    println!("Target:  {}", decision.target_replicas);
    println!("Reason:  {}", decision.reason);
    println!();

    match &info.last_activity_time {
        Some(time) => println!("Last scale-up: {}", format_timestamp(time)),
        None => println!("Last scale-up: {}", "none recorded".dimmed()),
    }
    if info.cooldown_status.in_cooldown {
        println!(
            "Cooldown:      {} ({} remaining)",
            "active".yellow(),
            format_seconds(info.cooldown_status.remaining_cooldown_seconds)
        );
    } else {
        println!("Cooldown:      {}", "inactive".green());
    }
}
