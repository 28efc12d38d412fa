/*!
DEPLOY - Envoi d'un artefact du magasin vers chaque équipement

Type -> (dossier du magasin, endpoint équipement) :
- licenses      -> licenses/, `feature`
- firmware      -> firmware/, `fw_upgrade`
- configuration -> configs/,  `config_save`

Le fichier est lu une fois à la construction; chaque cible vérifie d'abord
sa connexion (`status/product_info`) puis reçoit un POST multipart.
*/

use super::device_api::DeviceClient;
use crate::api_path;
use async_trait::async_trait;
use fleet_dispatch::{AttemptError, Target, TargetOperation};
use serde::Deserialize;
use serde_json::{json, Value};
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeployType {
    Licenses,
    Firmware,
    Configuration,
    /// Paquets applicatifs: livrés par SSH/SCP, hors de ce service
    SdkApps,
}

impl DeployType {
    pub fn folder(self) -> &'static str {
        match self {
            DeployType::Licenses => "licenses",
            DeployType::Firmware => "firmware",
            DeployType::Configuration => "configs",
            DeployType::SdkApps => "sdk_apps",
        }
    }

    pub fn endpoint(self) -> Option<&'static str> {
        match self {
            DeployType::Licenses => Some("feature"),
            DeployType::Firmware => Some("fw_upgrade"),
            DeployType::Configuration => Some("config_save"),
            DeployType::SdkApps => None,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum DeployError {
    #[error("application packages are delivered over SSH, not supported here")]
    Unsupported,
    #[error("invalid artifact name {0:?}")]
    BadName(String),
    #[error("artifact not found: {}", .0.display())]
    NotFound(PathBuf),
    #[error("cannot read artifact {}: {source}", .path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

#[derive(Debug, Clone)]
pub struct DeployOperation {
    endpoint: &'static str,
    file_name: String,
    bytes: Arc<Vec<u8>>,
}

impl DeployOperation {
    /// Charge `<artifacts_dir>/<dossier du type>/<file>`
    pub async fn load(artifacts_dir: &Path, deploy_type: DeployType, file: &str) -> Result<Self, DeployError> {
        let endpoint = deploy_type.endpoint().ok_or(DeployError::Unsupported)?;
        let relative = Path::new(file);
        let plain = relative.components().all(|c| matches!(c, Component::Normal(_)));
        if file.trim().is_empty() || !plain {
            return Err(DeployError::BadName(file.to_string()));
        }
        let path = artifacts_dir.join(deploy_type.folder()).join(relative);
        let bytes = match tokio::fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Err(DeployError::NotFound(path)),
            Err(source) => return Err(DeployError::Read { path, source }),
        };
        let file_name = relative.file_name().map(|n| n.to_string_lossy().into_owned()).unwrap_or_default();
        Ok(Self { endpoint, file_name, bytes: Arc::new(bytes) })
    }
}

#[async_trait]
impl TargetOperation for DeployOperation {
    fn kind(&self) -> &str {
        "deploy"
    }

    async fn execute(&self, target: &Target, budget: Duration) -> Result<Value, AttemptError> {
        let client = DeviceClient::for_target(target, budget)?;
        let info = client.get("status/product_info").await?;
        let system_id = client
            .get("config/system/system_id")
            .await
            .ok()
            .map(|v| api_path::render(&v))
            .filter(|s| !s.is_empty())
            .unwrap_or_else(|| "unknown".to_string());

        client.upload(self.endpoint, &self.file_name, self.bytes.as_ref().clone()).await?;
        Ok(json!({
            "system_id": system_id,
            "product_name": info.get("product_name").map(api_path::render).unwrap_or_default(),
            "endpoint": self.endpoint,
            "file": self.file_name,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_load_from_store() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("licenses")).unwrap();
        std::fs::write(dir.path().join("licenses/site.lic"), b"LIC").unwrap();

        let op = DeployOperation::load(dir.path(), DeployType::Licenses, "site.lic").await.unwrap();
        assert_eq!(op.endpoint, "feature");
        assert_eq!(op.bytes.as_slice(), b"LIC");

        let missing = DeployOperation::load(dir.path(), DeployType::Firmware, "fw.bin").await;
        assert!(matches!(missing, Err(DeployError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_rejects_escaping_names_and_sdk() {
        let dir = tempfile::tempdir().unwrap();
        for bad in ["../kernel.yaml", "/etc/passwd", ""] {
            let r = DeployOperation::load(dir.path(), DeployType::Configuration, bad).await;
            assert!(matches!(r, Err(DeployError::BadName(_))), "{bad}");
        }
        let r = DeployOperation::load(dir.path(), DeployType::SdkApps, "app.tar.gz").await;
        assert!(matches!(r, Err(DeployError::Unsupported)));
    }
}
