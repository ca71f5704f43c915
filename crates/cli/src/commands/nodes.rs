//! Node lifecycle and backup pool commands

use anyhow::Result;
use tabled::Tabled;

use crate::client::{ApiClient, BackupChange, BackupNodes, IpRequest, NodeResponse};
use crate::output::{print_json, print_success, print_table, print_warning, OutputFormat};

#[derive(Tabled)]
struct BackupRow {
    #[tabled(rename = "Backup Node")]
    ip: String,
}

pub async fn backup_list(client: &ApiClient, format: OutputFormat) -> Result<()> {
    let backup: BackupNodes = client.get("backup-nodes").await?;

    match format {
        OutputFormat::Json => print_json(&backup),
        OutputFormat::Table => {
            let rows: Vec<BackupRow> = backup.nodes.into_iter().map(|ip| BackupRow { ip }).collect();
            print_table(&rows);
            Ok(())
        }
    }
}

pub async fn backup_add(client: &ApiClient, ip: &str, format: OutputFormat) -> Result<()> {
    let change: BackupChange = client
        .post("backup-nodes", &IpRequest { ip: ip.to_string() })
        .await?;
    report_backup_change(change, "Added", "already in", format)
}

pub async fn backup_remove(client: &ApiClient, ip: &str, format: OutputFormat) -> Result<()> {
    let change: BackupChange = client
        .delete("backup-nodes", &IpRequest { ip: ip.to_string() })
        .await?;
    report_backup_change(change, "Removed", "not in", format)
}

fn report_backup_change(
    change: BackupChange,
    verb: &str,
    unchanged: &str,
    format: OutputFormat,
) -> Result<()> {
    match format {
        OutputFormat::Json => print_json(&change),
        OutputFormat::Table => {
            if change.changed {
                print_success(&format!("{} {} ({} backup nodes)", verb, change.ip, change.nodes.len()));
            } else {
                print_warning(&format!("{} was {} the backup pool", change.ip, unchanged));
            }
            Ok(())
        }
    }
}

/// Join a machine to the cluster now
pub async fn add(client: &ApiClient, ip: &str, format: OutputFormat) -> Result<()> {
    let response: NodeResponse = client
        .post("add_node", &IpRequest { ip: ip.to_string() })
        .await?;
    report_node(response, format)
}

/// Force-remove a machine from the cluster now
pub async fn delete(client: &ApiClient, ip: &str, format: OutputFormat) -> Result<()> {
    let response: NodeResponse = client
        .post("delete_node", &IpRequest { ip: ip.to_string() })
        .await?;
    report_node(response, format)
}

fn report_node(response: NodeResponse, format: OutputFormat) -> Result<()> {
    match format {
        OutputFormat::Json => print_json(&response),
        OutputFormat::Table => {
            print_success(&format!("Node {} {}", response.ip, response.status));
            Ok(())
        }
    }
}
