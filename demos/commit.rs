use fabric_client::FabricClient;
use serde_json::json;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let fabric_id = std::env::args()
        .nth(1)
        .ok_or_else(|| anyhow::anyhow!("usage: commit <fabric-id> [candidate]"))?;
    let candidate = std::env::args().nth(2).unwrap_or_else(|| "default".to_owned());

    let client = FabricClient::from_env()?;

    client
        .patch(
            &format!("/api/v1/fabrics/{fabric_id}"),
            json!({ "description": "updated from fabric-client demo" }),
        )
        .await?;
    client.mark_pending(&fabric_id);

    let report = client.commit_pending(&candidate).await;
    for id in &report.committed {
        println!("committed {id}");
    }
    for (id, diagnostic) in &report.failed {
        eprintln!("{id}: {diagnostic}");
    }

    Ok(())
}
