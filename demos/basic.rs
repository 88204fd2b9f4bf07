use fabric_client::{ClientRegistry, Method};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let registry = ClientRegistry::from_env()?;
    let client = registry.shared();

    let (document, diagnostic) = client
        .execute_rest_call("/api/v1/fabrics", Method::GET, None)
        .await;

    match (document, diagnostic) {
        (_, Some(diagnostic)) => eprintln!("{diagnostic}"),
        (Some(document), None) => println!("{}", serde_json::to_string_pretty(&document)?),
        (None, None) => println!("no fabrics"),
    }

    Ok(())
}
