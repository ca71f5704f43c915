//! Backend fleet commands

use anyhow::Result;
use colored::Colorize;
use tabled::Tabled;

use crate::client::{ApiClient, ChangeResponse, IpRequest, LatencyTable, ScheduleReport};
use crate::output::{
    color_status, format_latency, format_mean, print_info, print_json, print_success, print_table,
    print_warning, OutputFormat,
};

#[derive(Tabled)]
struct BackendRow {
    #[tabled(rename = "Backend")]
    ip: String,
}

#[derive(Tabled)]
struct LatencyRow {
    #[tabled(rename = "Backend")]
    ip: String,
    #[tabled(rename = "Samples")]
    samples: usize,
    #[tabled(rename = "Last")]
    last: String,
    #[tabled(rename = "Mean")]
    mean: String,
}

#[derive(Tabled)]
struct MigrationRow {
    #[tabled(rename = "App")]
    app: String,
    #[tabled(rename = "From")]
    from: String,
    #[tabled(rename = "To")]
    to: String,
    #[tabled(rename = "Status")]
    status: String,
    #[tabled(rename = "Detail")]
    detail: String,
}

fn latency_rows(table: &LatencyTable) -> Vec<LatencyRow> {
    table
        .iter()
        .map(|(ip, samples)| LatencyRow {
            ip: ip.clone(),
            samples: samples.len(),
            last: samples
                .last()
                .map(|ms| format_latency(*ms))
                .unwrap_or_else(|| "-".to_string()),
            mean: format_mean(samples),
        })
        .collect()
}

pub async fn list(client: &ApiClient, format: OutputFormat) -> Result<()> {
    let backends: Vec<String> = client.get("api/get_backends").await?;

    match format {
        OutputFormat::Json => print_json(&backends),
        OutputFormat::Table => {
            let rows: Vec<BackendRow> = backends.into_iter().map(|ip| BackendRow { ip }).collect();
            print_table(&rows);
            Ok(())
        }
    }
}

pub async fn add(client: &ApiClient, ip: &str, format: OutputFormat) -> Result<()> {
    let response: ChangeResponse = client
        .post("api/register_backend", &IpRequest { ip: ip.to_string() })
        .await?;

    match format {
        OutputFormat::Json => print_json(&response),
        OutputFormat::Table => {
            if response.changed {
                print_success(&format!("Registered backend {}", ip));
                print_info("Latency samples were reset; selection resumes once every peer has a full window");
            } else {
                print_warning(&format!("Backend {} was already registered", ip));
            }
            Ok(())
        }
    }
}

pub async fn remove(client: &ApiClient, ip: &str, format: OutputFormat) -> Result<()> {
    let response: ChangeResponse = client
        .post("api/delete_backend", &IpRequest { ip: ip.to_string() })
        .await?;

    match format {
        OutputFormat::Json => print_json(&response),
        OutputFormat::Table => {
            if response.changed {
                print_success(&format!("Removed backend {}", ip));
            } else {
                print_warning(&format!("Backend {} was not registered", ip));
            }
            Ok(())
        }
    }
}

/// Probe every backend once and show the sample table
pub async fn latency(client: &ApiClient, format: OutputFormat) -> Result<()> {
    let table: LatencyTable = client.get("api/test_latency").await?;

    match format {
        OutputFormat::Json => print_json(&table),
        OutputFormat::Table => {
            print_table(&latency_rows(&table));
            Ok(())
        }
    }
}

/// Force one scheduler reconcile
pub async fn check(client: &ApiClient, format: OutputFormat) -> Result<()> {
    let report: ScheduleReport = client.get("api/check_all_apps").await?;

    if format == OutputFormat::Json {
        return print_json(&report);
    }

    if report.skipped {
        print_warning("A scheduler cycle is already running; nothing was done");
        return Ok(());
    }

    println!("{}", "Latency".bold());
    print_table(&latency_rows(&report.latency));
    println!();

    match &report.best_backend {
        Some(best) => println!("{} {}", "Best backend:".bold(), best.green()),
        None => {
            print_info("Still collecting samples; no backend selected yet");
            return Ok(());
        }
    }

    let rows: Vec<MigrationRow> = report
        .migrations
        .into_iter()
        .map(|m| MigrationRow {
            app: m.app_name,
            from: m.from,
            to: m.to,
            status: color_status(&m.status),
            detail: match (m.step, m.reason) {
                (Some(step), Some(reason)) => format!("{}: {}", step, reason),
                _ => String::new(),
            },
        })
        .collect();
    if rows.is_empty() {
        print_success("Every application already runs on the best backend");
    } else {
        print_table(&rows);
    }
    Ok(())
}
