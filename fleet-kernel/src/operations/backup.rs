/*!
BACKUP - Sauvegarde de la configuration de chaque équipement

GET `/config_save` puis écriture dans
`<configs_dir>/<hostname>_config_<produit>_<M-D-YYYY>.bin`, suffixé ` (n)`
en cas de collision. La création est exclusive (`create_new`) : deux cibles
de même nom ne s'écrasent jamais.
*/

use super::device_api::DeviceClient;
use crate::api_path;
use async_trait::async_trait;
use fleet_dispatch::{AttemptError, Target, TargetOperation};
use serde_json::{json, Value};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::Duration;
use time::Date;
use tokio::io::AsyncWriteExt;

#[derive(Debug, Clone)]
pub struct BackupOperation {
    configs_dir: PathBuf,
    date: String,
}

impl BackupOperation {
    pub fn new(configs_dir: impl Into<PathBuf>, today: Date) -> Self {
        let date = format!("{}-{}-{}", u8::from(today.month()), today.day(), today.year());
        Self { configs_dir: configs_dir.into(), date }
    }

    pub fn base_name(&self, hostname: &str, product: &str) -> String {
        format!("{}_config_{}_{}", sanitize(hostname), sanitize(product), self.date)
    }
}

#[async_trait]
impl TargetOperation for BackupOperation {
    fn kind(&self) -> &str {
        "backup"
    }

    async fn execute(&self, target: &Target, budget: Duration) -> Result<Value, AttemptError> {
        let client = DeviceClient::for_target(target, budget)?;
        let product = match client.get("status/product_info").await {
            Ok(info) => info
                .get("product_name")
                .map(api_path::render)
                .and_then(|p| p.split('-').next().map(str::to_string))
                .unwrap_or_else(|| "unknown".into()),
            Err(_) => "unknown".into(),
        };
        let content = client.download("config_save").await?;
        if content.is_empty() {
            return Err(AttemptError::protocol("Empty response"));
        }

        let hostname = if target.hostname.trim().is_empty() { target.host() } else { &target.hostname };
        let base = self.base_name(hostname, &product);
        let path = write_unique(&self.configs_dir, &base, &content)
            .await
            .map_err(|e| AttemptError::protocol(format!("cannot write backup: {e}")))?;
        let file_name = path.file_name().map(|n| n.to_string_lossy().into_owned()).unwrap_or_default();
        Ok(json!({ "filename": file_name, "bytes": content.len() }))
    }
}

/// `[^\w\-.]` -> `_`, 50 caractères max, `unknown` si vide
fn sanitize(s: &str) -> String {
    let cleaned: String = s
        .trim()
        .chars()
        .map(|c| if c.is_alphanumeric() || c == '_' || c == '-' || c == '.' { c } else { '_' })
        .take(50)
        .collect();
    if cleaned.is_empty() { "unknown".into() } else { cleaned }
}

async fn write_unique(dir: &Path, base: &str, content: &[u8]) -> std::io::Result<PathBuf> {
    tokio::fs::create_dir_all(dir).await?;
    let mut n = 0u32;
    loop {
        let name = if n == 0 { format!("{base}.bin") } else { format!("{base} ({n}).bin") };
        let path = dir.join(name);
        match tokio::fs::OpenOptions::new().write(true).create_new(true).open(&path).await {
            Ok(mut file) => {
                file.write_all(content).await?;
                file.flush().await?;
                return Ok(path);
            }
            Err(e) if e.kind() == ErrorKind::AlreadyExists => n += 1,
            Err(e) => return Err(e),
        }
    }
}
