/*!
CONFIGURATION KERNEL - Fichier YAML unique du point de contrôle

RÔLE : Politique de dispatch, adresse HTTP et dossiers de travail.
FONCTIONNEMENT : Chemin lu dans FLEET_KERNEL_CONFIG (défaut kernel.yaml).
Fichier absent ou invalide => valeurs par défaut. La section `dispatch` est
modifiable à chaud via l'API puis réécrite sur disque.
*/

use fleet_dispatch::{DispatchPolicy, PolicyError};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::{info, warn};

/// Délai minimal accepté depuis la surface de configuration (secondes)
pub const MIN_CONNECTION_TIMEOUT_SECS: f64 = 1.0;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct KernelConfig {
    pub dispatch: DispatchPolicy,
    pub http: HttpConf,
    pub roster_path: PathBuf,
    pub logs_dir: PathBuf,
    pub configs_dir: PathBuf,
    pub artifacts_dir: PathBuf,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HttpConf {
    pub bind: String, // ex: "0.0.0.0:8080"
}

impl Default for HttpConf {
    fn default() -> Self {
        Self { bind: "0.0.0.0:8080".into() }
    }
}

impl Default for KernelConfig {
    fn default() -> Self {
        Self {
            dispatch: DispatchPolicy::default(),
            http: HttpConf::default(),
            roster_path: "./data/roster.json".into(),
            logs_dir: "./logs".into(),
            configs_dir: "./configs".into(),
            artifacts_dir: "./artifacts".into(),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("cannot access {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid YAML: {0}")]
    Yaml(#[from] serde_yaml::Error),
    #[error(transparent)]
    Policy(#[from] PolicyError),
    #[error("connection_timeout must be at least 1 second, got {0}")]
    TimeoutTooShort(f64),
}

/// Validation de la politique telle qu'exposée aux opérateurs
pub fn validate_dispatch(policy: &DispatchPolicy) -> Result<(), ConfigError> {
    policy.validate()?;
    if policy.connection_timeout < MIN_CONNECTION_TIMEOUT_SECS {
        return Err(ConfigError::TimeoutTooShort(policy.connection_timeout));
    }
    Ok(())
}

pub fn config_path() -> PathBuf {
    std::env::var("FLEET_KERNEL_CONFIG").unwrap_or_else(|_| "kernel.yaml".into()).into()
}

pub fn parse_config(txt: &str) -> Result<KernelConfig, ConfigError> {
    if txt.trim().is_empty() {
        return Ok(KernelConfig::default());
    }
    let cfg: KernelConfig = serde_yaml::from_str(txt)?;
    validate_dispatch(&cfg.dispatch)?;
    Ok(cfg)
}

pub async fn load_config(path: &Path) -> KernelConfig {
    if !path.exists() {
        warn!("[kernel] pas de {}, usage config par défaut", path.display());
        return KernelConfig::default();
    }
    let txt = match fs::read_to_string(path).await {
        Ok(txt) => txt,
        Err(e) => {
            warn!("[kernel] lecture config impossible: {e}");
            return KernelConfig::default();
        }
    };
    match parse_config(&txt) {
        Ok(cfg) => {
            info!("[kernel] config chargée depuis {}", path.display());
            cfg
        }
        Err(e) => {
            warn!("[kernel] config invalide: {e}");
            KernelConfig::default()
        }
    }
}

pub async fn save_config(path: &Path, cfg: &KernelConfig) -> Result<(), ConfigError> {
    let txt = serde_yaml::to_string(cfg)?;
    fs::write(path, txt)
        .await
        .map_err(|source| ConfigError::Io { path: path.to_path_buf(), source })
}
