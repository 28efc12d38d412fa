/*!
OPÉRATIONS - Unités de travail par cible, toutes derrière `TargetOperation`

Une requête de lot porte une `OperationSpec` (JSON étiqueté par `kind`);
`build` la transforme en opération prête pour le moteur de dispatch.
*/

pub mod backup;
pub mod deploy;
pub mod device_api;
pub mod ping;
pub mod poll;
pub mod remote_api;

use fleet_dispatch::TargetOperation;
use serde::Deserialize;
use serde_json::Value;
use std::path::Path;
use std::sync::Arc;
use time::OffsetDateTime;

use self::backup::BackupOperation;
use self::deploy::{DeployError, DeployOperation, DeployType};
use self::ping::PingOperation;
use self::poll::PollOperation;
use self::remote_api::{ApiMethod, RemoteApiError, RemoteApiOperation};

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum OperationSpec {
    Ping {
        #[serde(default = "default_ping_count")]
        count: u32,
    },
    Poll,
    Discover {
        range: String,
        #[serde(default)]
        username: String,
        password: String,
        #[serde(default)]
        port: Option<u16>,
    },
    RemoteApi {
        #[serde(default = "default_method")]
        method: ApiMethod,
        paths: Vec<String>,
        #[serde(default)]
        payload: Option<Value>,
        /// Nom du CSV écrit dans le dossier des journaux en fin de lot
        #[serde(default)]
        save_csv: Option<String>,
    },
    Deploy {
        deploy_type: DeployType,
        file: String,
    },
    Backup,
}

fn default_ping_count() -> u32 {
    ping::DEFAULT_PING_COUNT
}

fn default_method() -> ApiMethod {
    ApiMethod::Get
}

#[derive(Debug, thiserror::Error)]
pub enum BuildError {
    #[error(transparent)]
    RemoteApi(#[from] RemoteApiError),
    #[error(transparent)]
    Deploy(#[from] DeployError),
}

impl OperationSpec {
    pub fn name(&self) -> &'static str {
        match self {
            OperationSpec::Ping { .. } => "ping",
            OperationSpec::Poll => "poll",
            OperationSpec::Discover { .. } => "discover",
            OperationSpec::RemoteApi { .. } => "remote_api",
            OperationSpec::Deploy { .. } => "deploy",
            OperationSpec::Backup => "backup",
        }
    }

    /// Toutes les opérations sauf le ping passent par l'API authentifiée
    pub fn needs_credentials(&self) -> bool {
        !matches!(self, OperationSpec::Ping { .. })
    }

    pub async fn build(&self, artifacts_dir: &Path, configs_dir: &Path) -> Result<Arc<dyn TargetOperation>, BuildError> {
        Ok(match self {
            OperationSpec::Ping { count } => Arc::new(PingOperation::new(*count)),
            OperationSpec::Poll | OperationSpec::Discover { .. } => Arc::new(PollOperation),
            OperationSpec::RemoteApi { method, paths, payload, .. } => {
                Arc::new(RemoteApiOperation::new(*method, paths, payload.clone())?)
            }
            OperationSpec::Deploy { deploy_type, file } => {
                Arc::new(DeployOperation::load(artifacts_dir, *deploy_type, file).await?)
            }
            OperationSpec::Backup => {
                let today = OffsetDateTime::now_local().unwrap_or_else(|_| OffsetDateTime::now_utc()).date();
                Arc::new(BackupOperation::new(configs_dir, today))
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_spec_wire_forms() {
        let spec: OperationSpec = serde_json::from_value(json!({"kind": "ping"})).unwrap();
        assert!(matches!(spec, OperationSpec::Ping { count: 3 }));
        let spec: OperationSpec = serde_json::from_value(json!({"kind": "poll"})).unwrap();
        assert_eq!(spec.name(), "poll");
        let spec: OperationSpec =
            serde_json::from_value(json!({"kind": "remote_api", "paths": ["status/wan"]})).unwrap();
        assert!(matches!(spec, OperationSpec::RemoteApi { method: ApiMethod::Get, .. }));
        let spec: OperationSpec =
            serde_json::from_value(json!({"kind": "deploy", "deploy_type": "firmware", "file": "fw.bin"})).unwrap();
        assert!(matches!(spec, OperationSpec::Deploy { deploy_type: DeployType::Firmware, .. }));
        assert!(serde_json::from_value::<OperationSpec>(json!({"kind": "reboot"})).is_err());
        assert!(!OperationSpec::Ping { count: 1 }.needs_credentials());
        assert!(OperationSpec::Backup.needs_credentials());
    }

    #[tokio::test]
    async fn test_build_reports_bad_requests() {
        let dir = tempfile::tempdir().unwrap();
        let spec = OperationSpec::RemoteApi { method: ApiMethod::Get, paths: vec![], payload: None, save_csv: None };
        assert!(matches!(spec.build(dir.path(), dir.path()).await, Err(BuildError::RemoteApi(_))));
        let spec = OperationSpec::Backup;
        assert_eq!(spec.build(dir.path(), dir.path()).await.unwrap().kind(), "backup");
    }
}
