//! Creates, renames and deletes an SSH key against the live API.
//!
//! PACKET_AUTH_TOKEN=... cargo run -p packet --example ssh_key_roundtrip

use packet::api::ssh_keys::{CreateSshKeyRequest, UpdateSshKeyRequest};
use packet::api::{Client, DEFAULT_BASE_URL};
use tfplug::testing::{rand_int, rand_ssh_public_key};
use tracing::info;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("packet=debug,info")),
        )
        .with_target(false)
        .init();

    let token = std::env::var(packet::ENV_AUTH_TOKEN)?;
    let base_url =
        std::env::var(packet::ENV_API_URL).unwrap_or_else(|_| DEFAULT_BASE_URL.to_string());
    let client = Client::new(&base_url, &token)?;
    let keys = client.ssh_keys();

    let n = rand_int();
    let key = keys
        .create(&CreateSshKeyRequest {
            label: format!("example-{}", n),
            key: rand_ssh_public_key(),
        })
        .await?;
    info!(id = %key.id, owner = ?key.owner_id(), fingerprint = %key.fingerprint, "created");

    let renamed = keys
        .update(
            &key.id,
            &UpdateSshKeyRequest {
                label: Some(format!("example-{}", n + 1)),
                key: None,
            },
        )
        .await?;
    info!(id = %renamed.id, label = %renamed.label, "renamed");

    keys.delete(&key.id).await?;
    match keys.get(&key.id).await {
        Err(e) if e.is_not_found() => info!(id = %key.id, "deleted"),
        Ok(_) => return Err("key still exists after delete".into()),
        Err(e) => return Err(e.into()),
    }

    Ok(())
}
