/*!
ROSTER - Liste des équipements gérés, persistée en JSON

RÔLE : Source des cibles de chaque lot et destination des attributs relevés
(poll, découverte, ping). Format disque : `{"targets": [...]}`.
Une adresse n'apparaît qu'une fois; l'ordre de saisie est conservé.
*/

use crate::operations::poll::DeviceIdentity;
use fleet_dispatch::{Target, TargetState};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use time::OffsetDateTime;
use tokio::sync::RwLock;
use tracing::{info, warn};

#[derive(Debug, thiserror::Error)]
pub enum RosterError {
    #[error("roster file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("roster file is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("unknown target {0}")]
    UnknownTarget(String),
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct RosterFile {
    targets: Vec<Target>,
}

pub struct RosterStore {
    targets: RwLock<Vec<Target>>,
    data_file: PathBuf,
}

impl RosterStore {
    pub fn new(data_file: impl Into<PathBuf>) -> Self {
        Self { targets: RwLock::new(Vec::new()), data_file: data_file.into() }
    }

    pub fn data_file(&self) -> &Path {
        &self.data_file
    }

    /// Charge le roster depuis le fichier JSON de persistance
    pub async fn load(&self) -> Result<usize, RosterError> {
        if !self.data_file.exists() {
            info!("[roster] no roster file, starting empty");
            return Ok(0);
        }
        let content = tokio::fs::read_to_string(&self.data_file).await.map_err(|e| self.io(e))?;
        let file: RosterFile = serde_json::from_str(&content)?;
        let targets = dedupe(file.targets);
        let count = targets.len();
        *self.targets.write().await = targets;
        info!("[roster] loaded {} targets from {}", count, self.data_file.display());
        Ok(count)
    }

    pub async fn save(&self) -> Result<(), RosterError> {
        let content = {
            let targets = self.targets.read().await;
            serde_json::to_string_pretty(&RosterFile { targets: targets.clone() })?
        };
        if let Some(dir) = self.data_file.parent() {
            tokio::fs::create_dir_all(dir).await.map_err(|e| self.io(e))?;
        }
        tokio::fs::write(&self.data_file, content).await.map_err(|e| self.io(e))
    }

    pub async fn list(&self) -> Vec<Target> {
        self.targets.read().await.clone()
    }

    pub async fn len(&self) -> usize {
        self.targets.read().await.len()
    }

    /// Remplace tout le roster (éditeur externe) puis persiste
    pub async fn replace(&self, targets: Vec<Target>) -> Result<usize, RosterError> {
        let now = OffsetDateTime::now_utc();
        let mut targets = dedupe(targets);
        for t in &mut targets {
            t.created_at.get_or_insert(now);
        }
        let count = targets.len();
        *self.targets.write().await = targets;
        self.save().await?;
        Ok(count)
    }

    /// Cibles d'un lot : tout le roster, ou les adresses demandées dans leur ordre
    pub async fn select(&self, addresses: Option<&[String]>) -> Result<Vec<Target>, RosterError> {
        let targets = self.targets.read().await;
        let Some(addresses) = addresses else { return Ok(targets.clone()) };
        addresses
            .iter()
            .map(|addr| {
                targets
                    .iter()
                    .find(|t| t.address == addr.trim())
                    .cloned()
                    .ok_or_else(|| RosterError::UnknownTarget(addr.clone()))
            })
            .collect()
    }

    pub async fn hostname_of(&self, address: &str) -> Option<String> {
        self.targets.read().await.iter().find(|t| t.address == address).map(|t| t.hostname.clone())
    }

    pub async fn set_state(&self, address: &str, state: TargetState) {
        if let Some(t) = self.targets.write().await.iter_mut().find(|t| t.address == address) {
            t.state = state;
        }
    }

    /// Fusionne un poll réussi; renvoie `false` si l'adresse est inconnue
    pub async fn merge_identity(&self, address: &str, identity: &DeviceIdentity) -> bool {
        let mut targets = self.targets.write().await;
        let Some(t) = targets.iter_mut().find(|t| t.address == address) else { return false };
        identity.apply_to(t);
        t.state = TargetState::Online;
        true
    }

    /// Ajoute ou met à jour un équipement découvert (clé : adresse)
    pub async fn upsert_discovered(&self, mut discovered: Target, identity: &DeviceIdentity) {
        let mut targets = self.targets.write().await;
        match targets.iter_mut().find(|t| t.host() == discovered.host()) {
            Some(existing) => {
                existing.credentials = discovered.credentials;
                existing.port = discovered.port;
                identity.apply_to(existing);
                existing.state = TargetState::Online;
            }
            None => {
                identity.apply_to(&mut discovered);
                discovered.state = TargetState::Online;
                discovered.created_at = Some(OffsetDateTime::now_utc());
                targets.push(discovered);
            }
        }
    }

    /// Persiste en journalisant l'échec (appelé après chaque lot)
    pub async fn persist(&self) {
        if let Err(e) = self.save().await {
            warn!("[roster] failed to save roster: {}", e);
        }
    }

    fn io(&self, source: std::io::Error) -> RosterError {
        RosterError::Io { path: self.data_file.clone(), source }
    }
}

fn dedupe(targets: Vec<Target>) -> Vec<Target> {
    let mut seen = HashSet::new();
    targets
        .into_iter()
        .filter(|t| !t.address.is_empty() && seen.insert(t.address.clone()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use fleet_dispatch::Credentials;

    fn target(addr: &str) -> Target {
        Target::new(addr, 8080, Credentials::new("admin", "pw"))
    }

    #[tokio::test]
    async fn test_replace_save_and_reload() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("data/roster.json");
        let store = RosterStore::new(&path);
        let n = store.replace(vec![target("10.0.0.1"), target("10.0.0.2"), target("10.0.0.1")]).await.unwrap();
        assert_eq!(n, 2);

        let reloaded = RosterStore::new(&path);
        assert_eq!(reloaded.load().await.unwrap(), 2);
        let list = reloaded.list().await;
        assert_eq!(list[1].address, "10.0.0.2");
        assert!(list[0].created_at.is_some());
        assert_eq!(list[0].credentials.password, "pw");
    }

    #[tokio::test]
    async fn test_select_keeps_requested_order() {
        let dir = tempfile::tempdir().unwrap();
        let store = RosterStore::new(dir.path().join("r.json"));
        store.replace(vec![target("a"), target("b"), target("c")]).await.unwrap();

        let picked = store.select(Some(&["c".to_string(), "a".to_string()])).await.unwrap();
        assert_eq!(picked.iter().map(|t| t.address.as_str()).collect::<Vec<_>>(), ["c", "a"]);
        assert_eq!(store.select(None).await.unwrap().len(), 3);
        assert!(matches!(store.select(Some(&["z".to_string()])).await, Err(RosterError::UnknownTarget(_))));
    }

    #[tokio::test]
    async fn test_merge_and_discover() {
        let dir = tempfile::tempdir().unwrap();
        let store = RosterStore::new(dir.path().join("r.json"));
        store.replace(vec![target("10.0.0.1")]).await.unwrap();

        let id = DeviceIdentity { hostname: "edge-1".into(), mac: "0030441A2B3C".into(), ..Default::default() };
        assert!(store.merge_identity("10.0.0.1", &id).await);
        assert!(!store.merge_identity("10.0.0.9", &id).await);

        store.upsert_discovered(target("10.0.0.5"), &id).await;
        store.upsert_discovered(Target::new("10.0.0.1", 8443, Credentials::new("ops", "new")), &id).await;
        let list = store.list().await;
        assert_eq!(list.len(), 2);
        assert_eq!(list[0].port, 8443);
        assert_eq!(list[0].credentials.username, "ops");
        assert_eq!(list[1].state, TargetState::Online);
        assert_eq!(store.hostname_of("10.0.0.5").await.as_deref(), Some("edge-1"));
    }
}
