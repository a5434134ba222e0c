//! Manual scaling trigger command

use anyhow::Result;
use colored::Colorize;
use tabled::{settings::Style, Table, Tabled};

use super::status::print_info_section;
use crate::client::{ApiClient, Outcome, Reconcile};
use crate::output::{
    color_action, format_seconds, format_timestamp, print_error, print_info, print_json,
    print_success, print_warning, OutputFormat,
};

/// Row for the operations table
#[derive(Tabled)]
struct OperationRow {
    #[tabled(rename = "Operation")]
    operation: String,
    #[tabled(rename = "Worker")]
    worker: String,
    #[tabled(rename = "Result")]
    result: String,
}

fn operation_rows(reconcile: &Reconcile) -> Vec<OperationRow> {
    let succeeded = |operation: &str, names: &[String]| -> Vec<OperationRow> {
        names
            .iter()
            .map(|name| OperationRow {
                operation: operation.to_string(),
                worker: name.clone(),
                result: "ok".green().to_string(),
            })
            .collect()
    };

    let mut rows = succeeded("start", &reconcile.started);
    rows.extend(succeeded("create", &reconcile.created));
    rows.extend(succeeded("stop", &reconcile.stopped));
    rows.extend(reconcile.failures.iter().map(|failure| OperationRow {
        operation: failure.operation.clone(),
        worker: failure.instance.clone(),
        result: if failure.timed_out {
            "timed out".red().to_string()
        } else {
            failure.message.red().to_string()
        },
    }));
    rows
}

/// Run a scaling check now, optionally bypassing the scale-down cooldown
pub async fn trigger(client: &ApiClient, force: bool, format: OutputFormat) -> Result<()> {
    if force && matches!(format, OutputFormat::Table) {
        print_warning("Forcing scaling check, scale-down cooldown is bypassed");
    }

    let result = client.trigger(force).await?;

    match format {
        OutputFormat::Json => print_json(&result)?,
        OutputFormat::Table => {
            println!("{}", "Scaling Check".bold());
            println!("{}", "=".repeat(60));
            println!("Action:  {}", color_action(&result.action));
            println!("Target:  {}", result.target);
            println!("Reason:  {}", result.reason);
            println!();

            match &result.outcome {
                Outcome::NoAction => print_info(&result.message),
                Outcome::Blocked {
                    remaining_cooldown_seconds,
                } => print_warning(&format!(
                    "Scale down blocked by cooldown, {} remaining (use --force to override)",
                    format_seconds(*remaining_cooldown_seconds)
                )),
                Outcome::Executed { reconcile } => {
                    let rows = operation_rows(reconcile);
                    if !rows.is_empty() {
                        println!("{}", Table::new(rows).with(Style::rounded()));
                    }
                    if reconcile.unmet > 0 {
                        print_warning(&format!(
                            "{} worker(s) could not be provisioned (pool exhausted)",
                            reconcile.unmet
                        ));
                    }
                    if reconcile.failures.is_empty() {
                        print_success(&result.message);
                    } else {
                        print_error(&format!(
                            "{} operation(s) failed",
                            reconcile.failures.len()
                        ));
                    }
                }
            }

            if let Some(info) = &result.updated_info {
                println!();
                print_info_section(info);
            }

            println!();
            println!("At: {}", format_timestamp(&result.timestamp).dimmed());
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::OperationFailure;

    #[test]
    fn test_operation_rows_cover_successes_and_failures() {
        let reconcile = Reconcile {
            direction: "up".to_string(),
            previous_running: 0,
            target: 3,
            started: vec!["judge0-worker-1".to_string()],
            created: vec!["judge0-worker-3".to_string()],
            stopped: vec![],
            failures: vec![OperationFailure {
                operation: "start".to_string(),
                instance: "judge0-worker-2".to_string(),
                message: "conflict".to_string(),
                timed_out: false,
            }],
            unmet: 0,
        };

        let rows = operation_rows(&reconcile);
        assert_eq!(rows.len(), 3);
        assert_eq!(rows[0].worker, "judge0-worker-1");
        assert_eq!(rows[1].operation, "create");
        assert_eq!(rows[2].worker, "judge0-worker-2");
    }
}
