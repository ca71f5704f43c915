//! Liveness, pod health and supervised target commands

use anyhow::Result;
use chrono::Utc;
use colored::Colorize;
use tabled::Tabled;

use crate::client::{ApiClient, PodException, TargetSummary};
use crate::output::{
    color_status, format_age, format_kbps, format_time, print_json, print_success, print_table,
    OutputFormat,
};

#[derive(Tabled)]
struct ExceptionRow {
    #[tabled(rename = "Namespace")]
    namespace: String,
    #[tabled(rename = "Pod")]
    pod: String,
    #[tabled(rename = "Node")]
    node: String,
    #[tabled(rename = "Reason")]
    reason: String,
    #[tabled(rename = "Restarts")]
    restarts: i32,
    #[tabled(rename = "Age")]
    age: String,
}

#[derive(Tabled)]
struct ScaleEventRow {
    #[tabled(rename = "Time")]
    time: String,
    #[tabled(rename = "Action")]
    action: String,
    #[tabled(rename = "Replicas")]
    replicas: String,
    #[tabled(rename = "Per Replica")]
    rate: String,
}

pub async fn ping(client: &ApiClient) -> Result<()> {
    let reply = client.get_text("api/ping").await?;
    print_success(&format!("Autopilot answered {}", reply.trim()));
    Ok(())
}

pub async fn pod_exceptions(client: &ApiClient, format: OutputFormat) -> Result<()> {
    let exceptions: Vec<PodException> = client.get("api/get_pod_exception").await?;

    match format {
        OutputFormat::Json => print_json(&exceptions),
        OutputFormat::Table => {
            let now = Utc::now();
            let rows: Vec<ExceptionRow> = exceptions
                .into_iter()
                .map(|e| ExceptionRow {
                    namespace: e.namespace,
                    pod: e.pod_name,
                    node: e.node_name.unwrap_or_else(|| "-".to_string()),
                    reason: color_status(&e.reason),
                    restarts: e.restart_count,
                    age: format_age(&e.first_seen, now),
                })
                .collect();
            print_table(&rows);
            Ok(())
        }
    }
}

pub async fn targets(client: &ApiClient, format: OutputFormat) -> Result<()> {
    let targets: Vec<TargetSummary> = client.get("api/targets").await?;

    if format == OutputFormat::Json {
        return print_json(&targets);
    }

    if targets.is_empty() {
        println!("{}", "No supervised targets".yellow());
        return Ok(());
    }

    for target in targets {
        println!("{} ({} scale events)", target.key.bold(), target.history.len());
        if target.history.is_empty() {
            continue;
        }
        let rows: Vec<ScaleEventRow> = target
            .history
            .into_iter()
            .map(|event| ScaleEventRow {
                time: format_time(&event.time),
                action: color_status(&event.action),
                replicas: format!("{} -> {}", event.from_replicas, event.to_replicas),
                rate: format_kbps(event.trigger_rate_kbps),
            })
            .collect();
        print_table(&rows);
        println!();
    }
    Ok(())
}
