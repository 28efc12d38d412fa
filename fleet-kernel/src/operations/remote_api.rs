/*!
REMOTE API - Appels arbitraires à l'API des équipements

GET : un ou plusieurs chemins, éventuellement à jokers (le préfixe avant le
premier joker est requêté, le reste développé sur la réponse). Le résultat
est une ligne `{chemin -> valeur}`; un chemin en échec applicatif y figure
en `Failed: <détail>`. La tentative échoue sur erreur de connexion, ou si
tous les chemins échouent.

PUT/POST/DELETE : un seul chemin, charge JSON facultative.
*/

use super::device_api::DeviceClient;
use crate::api_path::{self, PathError, PathExpr};
use async_trait::async_trait;
use fleet_dispatch::{AttemptError, BatchResult, FailureKind, Outcome, Target, TargetOperation};
use reqwest::Method;
use serde::Deserialize;
use serde_json::{json, Map, Value};
use std::collections::BTreeSet;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ApiMethod {
    Get,
    Put,
    Post,
    Delete,
}

impl ApiMethod {
    fn as_method(self) -> Method {
        match self {
            ApiMethod::Get => Method::GET,
            ApiMethod::Put => Method::PUT,
            ApiMethod::Post => Method::POST,
            ApiMethod::Delete => Method::DELETE,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum RemoteApiError {
    #[error("at least one path is required")]
    NoPath,
    #[error("{0} takes exactly one path")]
    SinglePath(&'static str),
    #[error("invalid path: {0}")]
    Path(#[from] PathError),
}

#[derive(Debug, Clone)]
enum Request {
    Read(Vec<PathExpr>),
    Write { method: ApiMethod, path: PathExpr, payload: Option<Value> },
}

#[derive(Debug, Clone)]
pub struct RemoteApiOperation {
    request: Request,
}

impl RemoteApiOperation {
    pub fn new(method: ApiMethod, paths: &[String], payload: Option<Value>) -> Result<Self, RemoteApiError> {
        let parsed = parse_paths(paths)?;
        if parsed.is_empty() {
            return Err(RemoteApiError::NoPath);
        }
        for p in &parsed {
            // rejeté tôt plutôt que sur chaque cible
            p.split_at_wildcard()?;
        }
        let request = match method {
            ApiMethod::Get => Request::Read(parsed),
            _ if parsed.len() > 1 => {
                return Err(RemoteApiError::SinglePath(match method {
                    ApiMethod::Put => "PUT",
                    ApiMethod::Post => "POST",
                    _ => "DELETE",
                }))
            }
            _ => {
                let mut parsed = parsed;
                Request::Write { method, path: parsed.remove(0), payload }
            }
        };
        Ok(Self { request })
    }
}

/// Chemins saisis séparés par `,`, saut de ligne ou espace
pub fn parse_paths(paths: &[String]) -> Result<Vec<PathExpr>, PathError> {
    paths
        .iter()
        .flat_map(|p| p.split([',', '\n', ' ']))
        .filter(|p| !p.trim().is_empty())
        .map(PathExpr::parse)
        .collect()
}

/// Colonnes du tableau de résultats.
///
/// GET : `ip`, `hostname`, les chemins simples dans l'ordre saisi, puis les
/// chemins développés depuis les jokers, triés. Écriture : `ip`, `hostname`, `result`.
pub fn columns(method: ApiMethod, paths: &[String], batch: &BatchResult) -> Vec<String> {
    let mut cols = vec!["ip".to_string(), "hostname".to_string()];
    if method != ApiMethod::Get {
        cols.push("result".into());
        return cols;
    }
    let plain: Vec<String> = parse_paths(paths)
        .unwrap_or_default()
        .iter()
        .filter(|p| !p.is_wildcard())
        .map(|p| p.to_string())
        .collect();
    let extra: BTreeSet<&String> = batch
        .results
        .iter()
        .filter_map(|r| r.payload().and_then(Value::as_object))
        .flat_map(|row| row.keys())
        .filter(|k| !plain.contains(k))
        .collect();
    let extra: Vec<String> = extra.into_iter().cloned().collect();
    cols.extend(plain);
    cols.extend(extra);
    cols
}

/// Une ligne par cible, alignée sur `columns`
pub fn table(columns: &[String], batch: &BatchResult, targets: &[Target]) -> Vec<Vec<String>> {
    batch
        .results
        .iter()
        .map(|r| {
            let hostname = targets
                .get(r.index)
                .map(|t| t.hostname.trim())
                .filter(|h| !h.is_empty())
                .unwrap_or("-");
            columns
                .iter()
                .map(|col| match (col.as_str(), &r.outcome) {
                    ("ip", _) => r.address.clone(),
                    ("hostname", _) => hostname.to_string(),
                    (_, Outcome::Success { payload }) => match payload.get(col) {
                        None | Some(Value::Null) => String::new(),
                        Some(v) => api_path::render(v),
                    },
                    (_, Outcome::Failure { detail, .. }) => format!("Failed: {detail}"),
                })
                .collect()
        })
        .collect()
}

#[async_trait]
impl TargetOperation for RemoteApiOperation {
    fn kind(&self) -> &str {
        "remote_api"
    }

    async fn execute(&self, target: &Target, budget: Duration) -> Result<Value, AttemptError> {
        let client = DeviceClient::for_target(target, budget)?;
        match &self.request {
            Request::Read(paths) => read_paths(&client, paths).await,
            Request::Write { method, path, payload } => {
                let resp = client.call(method.as_method(), &path.to_string(), payload.as_ref()).await?;
                Ok(json!({ "result": "Success", "response": resp }))
            }
        }
    }
}

async fn read_paths(client: &DeviceClient, paths: &[PathExpr]) -> Result<Value, AttemptError> {
    let mut row = Map::new();
    let mut failures = Vec::new();

    for expr in paths {
        let (request_path, rest) = expr.split_at_wildcard().map_err(|e| AttemptError::protocol(e.to_string()))?;
        match client.get(&request_path).await {
            Ok(data) if !rest.is_empty() => {
                if data.is_object() || data.is_array() {
                    for (path, value) in api_path::expand_under(&data, &request_path, rest) {
                        row.insert(path, cell(value));
                    }
                }
            }
            Ok(data) => {
                row.insert(expr.to_string(), cell(data));
            }
            Err(e) if matches!(e.kind, FailureKind::Connect | FailureKind::Timeout) => return Err(e),
            Err(e) => {
                row.insert(expr.to_string(), Value::String(format!("Failed: {}", e.detail)));
                failures.push(e);
            }
        }
    }

    if failures.len() == paths.len() {
        if let Some(first) = failures.into_iter().next() {
            return Err(first);
        }
    }
    Ok(Value::Object(row))
}

/// Scalaires tels quels, structures sérialisées en texte
fn cell(value: Value) -> Value {
    match value {
        Value::Object(_) | Value::Array(_) => Value::String(value.to_string()),
        scalar => scalar,
    }
}
