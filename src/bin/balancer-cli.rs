use clap::{Parser, Subcommand};
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION};
use serde_json::Value;

use cluster_balancer::admin::handlers::ClusterStatus;

#[derive(Parser)]
#[command(name = "balancer-cli")]
#[command(about = "Inspection CLI for the cluster balancer", long_about = None)]
struct Cli {
    #[arg(short, long, default_value = "http://localhost:8081")]
    url: String,

    #[arg(short, long, env = "BALANCER_ADMIN_KEY", default_value = "CHANGE_ME_IN_PRODUCTION")]
    key: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Check balancer status
    Status,
    /// Dump every cluster as JSON
    Clusters,
    /// Show node health and load for one cluster
    Nodes {
        #[arg(default_value = "Default")]
        cluster: String,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    let client = reqwest::Client::new();

    let mut headers = HeaderMap::new();
    headers.insert(
        AUTHORIZATION,
        HeaderValue::from_str(&format!("Bearer {}", cli.key))?,
    );

    match cli.command {
        Commands::Status => {
            let res = client
                .get(format!("{}/admin/status", cli.url))
                .headers(headers)
                .send()
                .await?;
            print_response(res).await?;
        }
        Commands::Clusters => {
            let res = client
                .get(format!("{}/admin/clusters", cli.url))
                .headers(headers)
                .send()
                .await?;
            print_response(res).await?;
        }
        Commands::Nodes { cluster } => {
            let res = client
                .get(format!("{}/admin/clusters", cli.url))
                .headers(headers)
                .send()
                .await?;
            if !check_status(&res) {
                return Ok(());
            }
            let clusters: Vec<ClusterStatus> = res.json().await?;
            match clusters.iter().find(|c| c.name == cluster) {
                Some(status) => print_nodes(status),
                None => eprintln!("Error: cluster '{}' not found", cluster),
            }
        }
    }

    Ok(())
}

fn check_status(res: &reqwest::Response) -> bool {
    let status = res.status();
    if !status.is_success() {
        eprintln!("Error: Admin API returned status {}", status);
    }
    status.is_success()
}

fn print_nodes(cluster: &ClusterStatus) {
    println!("{} ({} sessions)", cluster.name, cluster.sessions);
    println!(
        "{:<28} {:<8} {:>9} {:>10} {:>9} {:>9} {:>8}",
        "NODE", "HEALTH", "IN_FLIGHT", "DISPATCHED", "SESSIONS", "FAILURES", "AVG_MS"
    );
    for node in &cluster.nodes {
        println!(
            "{:<28} {:<8} {:>9} {:>10} {:>9} {:>9} {:>8.1}",
            node.address,
            format!("{:?}", node.health).to_lowercase(),
            node.in_flight,
            node.dispatch_count,
            node.sessions,
            node.stats.failures,
            node.stats.avg_latency_ms,
        );
    }
}

async fn print_response(res: reqwest::Response) -> Result<(), Box<dyn std::error::Error>> {
    if !check_status(&res) {
        if let Ok(text) = res.text().await {
            eprintln!("Response: {}", text);
        }
        return Ok(());
    }

    let json: Value = res.json().await?;
    println!("{}", serde_json::to_string_pretty(&json)?);
    Ok(())
}
