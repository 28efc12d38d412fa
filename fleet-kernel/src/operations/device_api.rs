/*!
CLIENT API ÉQUIPEMENT - Transport HTTP commun à toutes les opérations

Conventions des équipements :
- Base `http://<ip>:<port>` (ou `http://<ip>` si l'adresse porte déjà un port)
- Authentification basique, certificats non vérifiés
- Réponses GET enveloppées dans `{"data": ...}`
- Écritures en formulaire `data=<json>`
- Un 2xx portant `success: false` ou `error` est un échec applicatif

Un client est construit par tentative : il vit sur le runtime de l'exécuteur
qui l'utilise.
*/

use fleet_dispatch::{AttemptError, Target};
use reqwest::{multipart, Client, Method, Response, StatusCode};
use serde_json::Value;
use std::error::Error as _;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct DeviceClient {
    http: Client,
    base: String,
    username: String,
    password: String,
}

impl DeviceClient {
    pub fn for_target(target: &Target, budget: Duration) -> Result<Self, AttemptError> {
        let http = Client::builder()
            .timeout(budget)
            .connect_timeout(budget)
            .danger_accept_invalid_certs(true)
            .build()
            .map_err(|e| AttemptError::protocol(format!("http client: {e}")))?;
        Ok(Self {
            http,
            base: base_url(target),
            username: target.credentials.username.clone(),
            password: target.credentials.password.clone(),
        })
    }

    pub fn base(&self) -> &str {
        &self.base
    }

    /// GET `/api/<path>`, enveloppe `data` retirée
    pub async fn get(&self, path: &str) -> Result<Value, AttemptError> {
        self.call(Method::GET, path, None).await
    }

    /// Appel `/api/<path>`; corps JSON si possible, texte brut sinon
    pub async fn call(&self, method: Method, path: &str, payload: Option<&Value>) -> Result<Value, AttemptError> {
        let url = format!("{}/api/{}", self.base, path.trim_start_matches('/'));
        let mut req = self.http.request(method.clone(), &url).basic_auth(&self.username, Some(&self.password));
        if method == Method::PUT || method == Method::POST {
            let body = payload.cloned().unwrap_or_else(|| Value::Object(Default::default()));
            req = req.form(&[("data", body.to_string())]);
        }
        let resp = req.send().await.map_err(|e| classify(&e))?;
        let text = ensure_success(resp).await?.text().await.map_err(|e| classify(&e))?;

        let Ok(json) = serde_json::from_str::<Value>(&text) else {
            return Ok(Value::String(if text.is_empty() { "(empty)".into() } else { text }));
        };
        if let Some(err) = application_error(&json) {
            return Err(AttemptError::application(err));
        }
        match json {
            Value::Object(mut map) if method == Method::GET && map.contains_key("data") => {
                Ok(map.remove("data").unwrap_or(Value::Null))
            }
            other => Ok(other),
        }
    }

    /// GET hors `/api` renvoyant des octets (sauvegarde de configuration)
    pub async fn download(&self, endpoint: &str) -> Result<Vec<u8>, AttemptError> {
        let url = format!("{}/{}", self.base, endpoint.trim_start_matches('/'));
        let resp = self
            .http
            .get(&url)
            .basic_auth(&self.username, Some(&self.password))
            .send()
            .await
            .map_err(|e| classify(&e))?;
        let bytes = ensure_success(resp).await?.bytes().await.map_err(|e| classify(&e))?;
        Ok(bytes.to_vec())
    }

    /// POST multipart d'un fichier vers `/<endpoint>`
    pub async fn upload(&self, endpoint: &str, file_name: &str, bytes: Vec<u8>) -> Result<(), AttemptError> {
        let url = format!("{}/{}", self.base, endpoint.trim_start_matches('/'));
        let part = multipart::Part::bytes(bytes)
            .file_name(file_name.to_string())
            .mime_str("application/octet-stream")
            .map_err(|e| AttemptError::protocol(e.to_string()))?;
        let resp = self
            .http
            .post(&url)
            .basic_auth(&self.username, Some(&self.password))
            .multipart(multipart::Form::new().part("file", part))
            .send()
            .await
            .map_err(|e| classify(&e))?;
        ensure_success(resp).await?;
        Ok(())
    }
}

pub fn base_url(target: &Target) -> String {
    format!("http://{}", target.authority())
}

async fn ensure_success(resp: Response) -> Result<Response, AttemptError> {
    let status = resp.status();
    if status.as_u16() < 300 {
        return Ok(resp);
    }
    let body = resp.text().await.unwrap_or_default();
    Err(status_error(status, &body))
}

/// Statut >= 300 : échec applicatif `"<code>: <corps[..200]>"`
pub fn status_error(status: StatusCode, body: &str) -> AttemptError {
    let body: String = body.chars().take(200).collect();
    let body = if body.is_empty() { "No response".to_string() } else { body };
    AttemptError::application(format!("{}: {}", status.as_u16(), body))
}

/// Erreur portée par un corps 2xx
pub fn application_error(json: &Value) -> Option<String> {
    let map = json.as_object()?;
    if map.get("success") == Some(&Value::Bool(false)) {
        let msg = map
            .get("error")
            .or_else(|| map.get("message"))
            .map(crate::api_path::render)
            .unwrap_or_else(|| json.to_string());
        return Some(msg.chars().take(200).collect());
    }
    match map.get("error") {
        Some(Value::Null) | Some(Value::Bool(false)) | None => None,
        Some(Value::String(s)) if s.is_empty() => None,
        Some(err) => Some(crate::api_path::render(err).chars().take(200).collect()),
    }
}

/// Classement d'une erreur de transport avec message court
pub fn classify(err: &reqwest::Error) -> AttemptError {
    let chain = error_chain(err).to_lowercase();
    if err.is_timeout() || chain.contains("timed out") {
        return AttemptError::timeout("Connection timed out");
    }
    if err.is_connect() {
        let detail = if chain.contains("refused") {
            "Connection refused"
        } else if chain.contains("dns") || chain.contains("lookup") || chain.contains("name or service not known") {
            "Host not found"
        } else if chain.contains("unreachable") || chain.contains("no route") {
            "Host unreachable"
        } else {
            "Connection failed"
        };
        return AttemptError::connect(detail);
    }
    let msg = err.to_string();
    let short = if msg.chars().count() > 80 { format!("{}...", msg.chars().take(80).collect::<String>()) } else { msg };
    AttemptError::protocol(short)
}

fn error_chain(err: &reqwest::Error) -> String {
    let mut out = err.to_string();
    let mut source = err.source();
    while let Some(e) = source {
        out.push_str(": ");
        out.push_str(&e.to_string());
        source = e.source();
    }
    out
}
