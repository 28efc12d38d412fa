/*!
POLL - Identité d'un équipement via son API

`status/product_info` est obligatoire (son échec fait échouer la tentative);
`config/system/system_id` et `status/fw_info` sont facultatifs. Les colonnes
de chemins d'API mémorisées sur la cible sont relues au passage.
*/

use super::device_api::DeviceClient;
use crate::api_path;
use async_trait::async_trait;
use fleet_dispatch::{AttemptError, FailureKind, Target, TargetOperation};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::time::Duration;

/// Attributs relevés par un poll, fusionnés ensuite dans le roster
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct DeviceIdentity {
    pub hostname: String,
    pub mac: String,
    pub serial_number: String,
    pub product_name: String,
    pub firmware_version: String,
    #[serde(default)]
    pub api_paths: BTreeMap<String, String>,
}

impl DeviceIdentity {
    pub fn from_payload(payload: &Value) -> Option<Self> {
        serde_json::from_value(payload.clone()).ok()
    }

    pub fn apply_to(&self, target: &mut Target) {
        target.hostname = self.hostname.clone();
        target.mac = self.mac.clone();
        target.serial_number = self.serial_number.clone();
        target.product_name = self.product_name.clone();
        target.firmware_version = self.firmware_version.clone();
        target.api_paths.extend(self.api_paths.clone());
    }
}

#[derive(Debug, Clone, Default)]
pub struct PollOperation;

#[async_trait]
impl TargetOperation for PollOperation {
    fn kind(&self) -> &str {
        "poll"
    }

    async fn execute(&self, target: &Target, budget: Duration) -> Result<Value, AttemptError> {
        let client = DeviceClient::for_target(target, budget)?;
        let identity = fetch_identity(&client, target).await?;
        serde_json::to_value(&identity).map_err(|e| AttemptError::protocol(e.to_string()))
    }
}

pub async fn fetch_identity(client: &DeviceClient, target: &Target) -> Result<DeviceIdentity, AttemptError> {
    let info = client.get("status/product_info").await?;
    if !info.is_object() {
        return Err(AttemptError::protocol("product_info is not an object"));
    }
    let mut identity = identity_from_product_info(&info);

    // champs facultatifs: une erreur de connexion reste fatale, le reste est ignoré
    let system_id = optional(client.get("config/system/system_id").await)?;
    let fw_info = optional(client.get("status/fw_info").await)?;
    identity.firmware_version = fw_info.as_ref().map(firmware_version).unwrap_or_default();
    identity.hostname = match system_id.as_ref().map(api_path::render) {
        Some(id) if !id.trim().is_empty() => id.trim().to_string(),
        _ => fallback_hostname(&identity.product_name, &identity.mac),
    };

    for path in target.api_paths.keys() {
        let value = match client.get(path).await {
            Ok(Value::Null) => String::new(),
            Ok(v) => api_path::render(&v),
            Err(e) if is_connectivity(&e) => return Err(e),
            Err(e) => format!("Failed: {}", e.detail),
        };
        identity.api_paths.insert(path.clone(), value);
    }
    Ok(identity)
}

fn is_connectivity(err: &AttemptError) -> bool {
    matches!(err.kind, FailureKind::Connect | FailureKind::Timeout)
}

fn optional(result: Result<Value, AttemptError>) -> Result<Option<Value>, AttemptError> {
    match result {
        Ok(v) => Ok(Some(v)),
        Err(e) if is_connectivity(&e) => Err(e),
        Err(_) => Ok(None),
    }
}

fn text(v: Option<&Value>) -> String {
    match v {
        None | Some(Value::Null) => String::new(),
        Some(v) => api_path::render(v).trim().to_string(),
    }
}

pub fn identity_from_product_info(info: &Value) -> DeviceIdentity {
    let product_name = text(info.get("product_name"));
    let mac_raw = {
        let m = text(info.get("mac0"));
        if m.is_empty() { text(info.get("mac")) } else { m }
    };
    let mac = mac_raw.replace([':', '-'], "").to_uppercase();

    let manufacturing = info.get("manufacturing");
    let mut serial = text(manufacturing.and_then(|m| m.get("serial_num")));
    if serial.is_empty() {
        serial = text(manufacturing.and_then(|m| m.get("serial_number")));
    }
    if serial.is_empty() {
        serial = text(info.get("serial_num"));
    }
    if serial.is_empty() {
        serial = text(info.get("serial_number"));
    }

    DeviceIdentity { product_name, mac, serial_number: serial, ..Default::default() }
}

/// `major.minor.patch tag build_date`
pub fn firmware_version(fw: &Value) -> String {
    format!(
        "{}.{}.{} {} {}",
        text(fw.get("major_version")),
        text(fw.get("minor_version")),
        text(fw.get("patch_version")),
        text(fw.get("fw_release_tag")),
        text(fw.get("build_date")),
    )
    .trim()
    .to_string()
}

/// `<préfixe produit>-<3 derniers caractères MAC>`
pub fn fallback_hostname(product_name: &str, mac: &str) -> String {
    let prefix = product_name.split('-').next().unwrap_or("").trim();
    let skip = mac.chars().count().saturating_sub(3);
    let suffix: String = mac.chars().skip(skip).collect::<String>().to_uppercase();
    if prefix.is_empty() && suffix.is_empty() {
        String::new()
    } else {
        format!("{prefix}-{suffix}")
    }
}
