//! Application registration commands

use anyhow::{Context, Result};
use serde_json::{Map, Value};
use tabled::Tabled;

use crate::client::{
    ApiClient, AppRegistration, ChangeEnvRequest, ChangeResponse, DeleteAppRequest,
};
use crate::output::{print_json, print_success, print_table, OutputFormat};

#[derive(Tabled)]
struct AppRow {
    #[tabled(rename = "App")]
    app: String,
    #[tabled(rename = "Namespace")]
    namespace: String,
    #[tabled(rename = "Mirror")]
    mirror: String,
    #[tabled(rename = "Env Key")]
    url_key: String,
    #[tabled(rename = "Backend")]
    backend: String,
    #[tabled(rename = "Ports")]
    ports: String,
}

/// Fields of a new registration as given on the command line
pub struct RegisterArgs {
    pub name: String,
    pub namespace: String,
    pub mirror_app: String,
    pub mirror_namespace: String,
    pub url_key: String,
    pub backend: String,
    pub ports: Vec<String>,
}

/// Parse `name=port` pairs into the JSON port map the service expects
pub fn parse_ports(pairs: &[String]) -> Result<Map<String, Value>> {
    let mut ports = Map::new();
    for pair in pairs {
        let (name, port) = pair
            .split_once('=')
            .with_context(|| format!("port {:?} must look like name=port", pair))?;
        let port: i64 = port
            .trim()
            .parse()
            .with_context(|| format!("port {:?} is not an integer", pair))?;
        ports.insert(name.trim().to_string(), Value::from(port));
    }
    Ok(ports)
}

pub async fn list(client: &ApiClient, format: OutputFormat) -> Result<()> {
    let apps: Vec<AppRegistration> = client.get("api/get_app_list").await?;

    match format {
        OutputFormat::Json => print_json(&apps),
        OutputFormat::Table => {
            let rows: Vec<AppRow> = apps
                .into_iter()
                .map(|app| AppRow {
                    app: app.app_name,
                    namespace: app.namespace,
                    mirror: format!("{}/{}", app.namespace2, app.app2),
                    url_key: app.url_key,
                    backend: app.current_backend,
                    ports: app
                        .ports
                        .iter()
                        .map(|(name, port)| format!("{}={}", name, port))
                        .collect::<Vec<_>>()
                        .join(","),
                })
                .collect();
            print_table(&rows);
            Ok(())
        }
    }
}

pub async fn register(client: &ApiClient, args: RegisterArgs, format: OutputFormat) -> Result<()> {
    let body = serde_json::json!({
        "app_name": args.name,
        "namespace": args.namespace,
        "app2": args.mirror_app,
        "namespace2": args.mirror_namespace,
        "url_key": args.url_key,
        "current_backend": args.backend,
        "ports": parse_ports(&args.ports)?,
    });
    let registration: AppRegistration = client.post("api/register_app", &body).await?;

    match format {
        OutputFormat::Json => print_json(&registration),
        OutputFormat::Table => {
            print_success(&format!(
                "Registered {}/{} on backend {}",
                registration.namespace, registration.app_name, registration.current_backend
            ));
            Ok(())
        }
    }
}

pub async fn remove(client: &ApiClient, name: &str, namespace: &str, format: OutputFormat) -> Result<()> {
    let response: ChangeResponse = client
        .post(
            "api/delete_app",
            &DeleteAppRequest {
                app_name: name.to_string(),
                namespace: namespace.to_string(),
            },
        )
        .await?;

    match format {
        OutputFormat::Json => print_json(&response),
        OutputFormat::Table => {
            print_success(&format!("Removed registration {}/{}", namespace, name));
            Ok(())
        }
    }
}

pub async fn set_env(
    client: &ApiClient,
    request: ChangeEnvRequest,
    format: OutputFormat,
) -> Result<()> {
    let response: ChangeResponse = client.post("api/change_deploy_env", &request).await?;

    match format {
        OutputFormat::Json => print_json(&response),
        OutputFormat::Table => {
            print_success(&format!(
                "{}/{} now routes {} to {}",
                request.namespace, request.app_name, request.url_key, request.backend
            ));
            Ok(())
        }
    }
}
