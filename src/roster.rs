// Dealer roster sources. The roster is owned by another system; we only read it.

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use std::collections::HashSet;
use std::path::PathBuf;
use tracing::{info, warn};

use crate::models::Dealer;

#[async_trait]
pub trait DealerRoster: Send + Sync {
    async fn load(&self) -> Result<Vec<Dealer>>;
}

/// A JSON array of dealers on disk.
pub struct JsonFileRoster {
    path: PathBuf,
}

impl JsonFileRoster {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl DealerRoster for JsonFileRoster {
    async fn load(&self) -> Result<Vec<Dealer>> {
        let raw = tokio::fs::read_to_string(&self.path)
            .await
            .with_context(|| format!("failed to read roster {}", self.path.display()))?;
        let dealers: Vec<Dealer> = serde_json::from_str(&raw)
            .with_context(|| format!("roster {} is not a JSON array of dealers", self.path.display()))?;
        let dealers = dedupe(dealers)?;
        info!(path = %self.path.display(), dealers = dealers.len(), "Roster loaded");
        Ok(dealers)
    }
}

/// A fixed roster handed in by the caller.
pub struct StaticRoster(pub Vec<Dealer>);

#[async_trait]
impl DealerRoster for StaticRoster {
    async fn load(&self) -> Result<Vec<Dealer>> {
        dedupe(self.0.clone())
    }
}

/// Drop repeated ids (first one wins). A dealer without an id or name can't
/// be scored or reported on, so that fails the load.
fn dedupe(dealers: Vec<Dealer>) -> Result<Vec<Dealer>> {
    let mut seen = HashSet::new();
    let mut unique = Vec::with_capacity(dealers.len());
    for dealer in dealers {
        if dealer.id.trim().is_empty() || dealer.name.trim().is_empty() {
            bail!("roster entry without id or name: {dealer:?}");
        }
        if seen.insert(dealer.id.clone()) {
            unique.push(dealer);
        } else {
            warn!(dealer_id = %dealer.id, "Duplicate dealer id in roster, keeping the first");
        }
    }
    Ok(unique)
}
