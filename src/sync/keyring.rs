use std::collections::HashMap;

use crate::error::{PlannerError, Result};

pub(crate) const SERVICE_NAME: &str = "dayplanner";

/// Keyring slot for the Anthropic API key.
pub const ANTHROPIC_SLOT: &str = "anthropic-api";

/// Keyring slot for the backend session token of `backend_url`.
pub fn session_slot(backend_url: &str) -> String {
    format!("session:{}", backend_url.trim_end_matches('/'))
}

fn keyring_error(action: &str, e: impl std::fmt::Display) -> PlannerError {
    PlannerError::Config(format!("{}: {}", action, e))
}

async fn connect() -> Result<oo7::Keyring> {
    oo7::Keyring::new()
        .await
        .map_err(|e| keyring_error("Failed to connect to keyring", e))
}

/// Store a secret in the system keyring via Secret Service, replacing any
/// existing value in the same slot.
pub async fn store_secret(slot: &str, label: &str, secret: &str) -> Result<()> {
    let keyring = connect().await?;

    let mut attrs = HashMap::new();
    attrs.insert("service", SERVICE_NAME);
    attrs.insert("slot", slot);

    keyring
        .create_item(label, &attrs, secret.as_bytes(), true)
        .await
        .map_err(|e| keyring_error("Failed to store secret", e))?;

    Ok(())
}

/// Load a secret from the system keyring. Empty secrets count as absent.
pub async fn load_secret(slot: &str) -> Result<Option<String>> {
    let keyring = connect().await?;

    let mut attrs = HashMap::new();
    attrs.insert("service", SERVICE_NAME);
    attrs.insert("slot", slot);

    let items = keyring
        .search_items(&attrs)
        .await
        .map_err(|e| keyring_error("Failed to search keyring", e))?;

    if let Some(item) = items.first() {
        let secret_bytes = item
            .secret()
            .await
            .map_err(|e| keyring_error("Failed to read secret", e))?;
        let secret = String::from_utf8(secret_bytes.to_vec())
            .map_err(|e| keyring_error("Invalid UTF-8 in secret", e))?;
        if !secret.is_empty() {
            return Ok(Some(secret));
        }
    }

    Ok(None)
}

/// Delete every secret stored in a slot.
pub async fn delete_secret(slot: &str) -> Result<()> {
    let keyring = connect().await?;

    let mut attrs = HashMap::new();
    attrs.insert("service", SERVICE_NAME);
    attrs.insert("slot", slot);

    let items = keyring
        .search_items(&attrs)
        .await
        .map_err(|e| keyring_error("Failed to search keyring", e))?;

    for item in items {
        item.delete()
            .await
            .map_err(|e| keyring_error("Failed to delete secret", e))?;
    }

    Ok(())
}
