/*!
LOTS - Point d'entrée unique des opérations de masse

RÔLE : Résout les cibles (roster ou plage de découverte), fige la politique,
construit l'opération, lance le moteur de dispatch puis reporte les résultats
(roster, joignabilité, journal hors-ligne).
FONCTIONNEMENT : Chaque lot reçoit un identifiant et un jeton d'annulation
enregistrés tant qu'il tourne. En mode flux, l'événement `complete` n'est
relayé qu'une fois les résultats reportés.
*/

use crate::csv_export::{self, CsvError};
use crate::ip_range::{self, RangeError};
use crate::operations::poll::DeviceIdentity;
use crate::operations::{remote_api, BuildError, OperationSpec};
use crate::roster::RosterError;
use crate::state::{AppState, Shared};
use fleet_dispatch::progress::{self, ProgressReceiver, ProgressSender};
use fleet_dispatch::target::DEFAULT_PORT;
use fleet_dispatch::{
    BatchResult, CancellationToken, Credentials, DeliveryMode, DispatchError, Dispatcher, FailureKind, OperationResult,
    Outcome, PolicyError, ProgressEvent, Target, TargetOperation, TargetState, Transition,
};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use time::OffsetDateTime;
use tracing::{error, info, warn};
use uuid::Uuid;

#[derive(Debug, Deserialize)]
pub struct BatchRequest {
    /// Adresses du roster; absent = tout le roster
    #[serde(default)]
    pub targets: Option<Vec<String>>,
    pub operation: OperationSpec,
    #[serde(default)]
    pub stream: Option<bool>,
}

#[derive(Debug, thiserror::Error)]
pub enum BatchError {
    #[error(transparent)]
    Roster(#[from] RosterError),
    #[error(transparent)]
    Range(#[from] RangeError),
    #[error(transparent)]
    Build(#[from] BuildError),
    #[error("invalid dispatch policy: {0}")]
    Policy(#[from] PolicyError),
    #[error("discovery requires a password")]
    MissingPassword,
    #[error(transparent)]
    Dispatch(#[from] DispatchError),
    #[error(transparent)]
    Csv(#[from] CsvError),
}

impl BatchError {
    /// Erreur de la requête (400) plutôt que du serveur
    pub fn is_client_error(&self) -> bool {
        match self {
            BatchError::Roster(RosterError::UnknownTarget(_)) => true,
            BatchError::Roster(_) | BatchError::Dispatch(_) => false,
            BatchError::Csv(e) => e.is_client_error(),
            _ => true,
        }
    }
}

/// Lots en cours et leurs jetons d'annulation
#[derive(Clone, Default)]
pub struct BatchRegistry {
    running: Shared<HashMap<Uuid, CancellationToken>>,
}

impl BatchRegistry {
    pub fn register(&self) -> BatchTicket {
        let id = Uuid::new_v4();
        let cancel = CancellationToken::new();
        self.running.lock().insert(id, cancel.clone());
        BatchTicket { id, cancel, registry: self.clone() }
    }

    pub fn cancel(&self, id: &Uuid) -> bool {
        match self.running.lock().get(id) {
            Some(token) => {
                token.cancel();
                true
            }
            None => false,
        }
    }

    pub fn active(&self) -> usize {
        self.running.lock().len()
    }
}

/// Inscription d'un lot, retirée du registre à sa destruction
pub struct BatchTicket {
    pub id: Uuid,
    pub cancel: CancellationToken,
    registry: BatchRegistry,
}

impl Drop for BatchTicket {
    fn drop(&mut self) {
        self.registry.running.lock().remove(&self.id);
    }
}

/// Réponse d'un lot agrégé; `columns` et `saved` pour les appels d'API
#[derive(Debug, Serialize)]
pub struct BatchResponse {
    #[serde(flatten)]
    pub batch: BatchResult,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub columns: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub saved: Option<String>,
}

/// Détail des cibles écartées faute de mot de passe
pub const MISSING_CREDENTIALS: &str = "Missing credentials";

pub struct PreparedBatch {
    pub ticket: BatchTicket,
    pub spec: OperationSpec,
    pub targets: Vec<Target>,
    pub mode: DeliveryMode,
    /// Positions de `targets` confiées au moteur, dans l'ordre
    runnable: Vec<usize>,
    operation: Arc<dyn TargetOperation>,
    dispatcher: Dispatcher,
}

pub async fn prepare(app: &AppState, req: BatchRequest) -> Result<PreparedBatch, BatchError> {
    let (artifacts_dir, configs_dir) = {
        let cfg = app.cfg.lock();
        (cfg.artifacts_dir.clone(), cfg.configs_dir.clone())
    };
    let dispatcher = Dispatcher::new(app.dispatch_policy())?;

    let targets: Vec<Target> = match &req.operation {
        OperationSpec::Discover { range, username, password, port } => {
            if password.trim().is_empty() {
                return Err(BatchError::MissingPassword);
            }
            let port = port.unwrap_or(DEFAULT_PORT);
            ip_range::expand(range)?
                .into_iter()
                .map(|ip| Target::new(ip.to_string(), port, Credentials::new(username.as_str(), password.as_str())))
                .collect()
        }
        _ => app.roster.select(req.targets.as_deref()).await?,
    };
    if let OperationSpec::RemoteApi { save_csv: Some(name), .. } = &req.operation {
        csv_export::file_name(Some(name.as_str()))?;
    }

    let needs_credentials = req.operation.needs_credentials();
    let runnable: Vec<usize> = targets
        .iter()
        .enumerate()
        .filter(|(_, t)| !needs_credentials || t.credentials.is_complete())
        .map(|(i, _)| i)
        .collect();
    if runnable.len() < targets.len() {
        warn!(skipped = targets.len() - runnable.len(), "targets without password are not contacted");
    }

    let operation = app.stats.instrument(req.operation.build(&artifacts_dir, &configs_dir).await?);
    let mode = DeliveryMode::resolve(req.stream, targets.len(), dispatcher.policy().streaming_threshold);
    let ticket = app.batches.register();
    app.stats.batch_started();
    info!(batch_id = %ticket.id, operation = req.operation.name(), targets = targets.len(), ?mode, "batch accepted");

    Ok(PreparedBatch { ticket, spec: req.operation, targets, mode, runnable, operation, dispatcher })
}

impl PreparedBatch {
    /// Exécute le lot puis reporte ses résultats
    pub async fn run(self, app: &AppState) -> Result<BatchResponse, BatchError> {
        let mut results = self.skipped();
        results.extend(self.dispatch(None).await?);
        let batch = BatchResult::from_results(results);
        apply_results(app, &self.spec, &self.targets, &batch).await;
        let (columns, saved) = export_table(app, &self.spec, &self.targets, &batch).await;
        Ok(BatchResponse { batch, columns, saved })
    }

    /// Lance le lot en tâche de fond et renvoie le flux d'événements.
    /// Le flux se termine toujours par un unique `complete`, même si le moteur échoue.
    pub fn spawn_streaming(self, app: AppState) -> ProgressReceiver {
        let (out_tx, out_rx) = progress::channel();
        tokio::spawn(async move {
            let id = self.ticket.id;
            let mut results = self.skipped();
            for result in &results {
                let _ = out_tx.send(ProgressEvent::target(result));
            }

            let (tx, mut rx) = progress::channel();
            let relay = {
                let out_tx = out_tx.clone();
                let runnable = self.runnable.clone();
                tokio::spawn(async move {
                    let mut seen = Vec::new();
                    while let Some(event) = rx.recv().await {
                        // le `complete` du moteur ne couvre que les cibles envoyées
                        if let ProgressEvent::Target { result, .. } = event {
                            let result = reindex(result, &runnable);
                            let _ = out_tx.send(ProgressEvent::target(&result));
                            seen.push(result);
                        }
                    }
                    seen
                })
            };

            let dispatched = self.dispatch(Some(tx)).await;
            let seen = relay.await.unwrap_or_else(|e| {
                error!(batch_id = %id, "progress relay failed: {e}");
                Vec::new()
            });
            match dispatched {
                Ok(done) => results.extend(done),
                Err(e) => {
                    error!(batch_id = %id, "streaming batch failed: {e}");
                    results.extend(self.aborted(seen, &format!("batch aborted: {e}")));
                }
            }

            let batch = BatchResult::from_results(results);
            apply_results(&app, &self.spec, &self.targets, &batch).await;
            export_table(&app, &self.spec, &self.targets, &batch).await;
            let _ = out_tx.send(ProgressEvent::complete(&batch));
        });
        out_rx
    }

    async fn dispatch(&self, progress: Option<ProgressSender>) -> Result<Vec<OperationResult>, DispatchError> {
        let subset = self.runnable.iter().filter_map(|&i| self.targets.get(i).cloned()).collect();
        let batch = self
            .dispatcher
            .run(subset, self.operation.clone(), self.ticket.cancel.clone(), progress)
            .await?;
        Ok(batch.results.into_iter().map(|r| reindex(r, &self.runnable)).collect())
    }

    /// Cibles écartées avant envoi : échec applicatif, aucune tentative
    fn skipped(&self) -> Vec<OperationResult> {
        self.targets
            .iter()
            .enumerate()
            .filter(|(i, _)| self.runnable.binary_search(i).is_err())
            .map(|(index, t)| OperationResult {
                index,
                address: t.address.clone(),
                outcome: Outcome::failure(FailureKind::Application, MISSING_CREDENTIALS),
                attempts: 0,
                elapsed_ms: 0,
            })
            .collect()
    }

    /// Résultats déjà reçus, complétés par un échec pour chaque cible restante
    fn aborted(&self, mut seen: Vec<OperationResult>, detail: &str) -> Vec<OperationResult> {
        let done: HashSet<usize> = seen.iter().map(|r| r.index).collect();
        for &index in &self.runnable {
            if done.contains(&index) {
                continue;
            }
            if let Some(t) = self.targets.get(index) {
                seen.push(OperationResult {
                    index,
                    address: t.address.clone(),
                    outcome: Outcome::failure(FailureKind::Protocol, detail),
                    attempts: 0,
                    elapsed_ms: 0,
                });
            }
        }
        seen
    }
}

/// Index du moteur (sous-liste) -> position dans la liste du lot
fn reindex(mut result: OperationResult, runnable: &[usize]) -> OperationResult {
    if let Some(&index) = runnable.get(result.index) {
        result.index = index;
    }
    result
}

/// Report des résultats selon le type d'opération
pub async fn apply_results(app: &AppState, spec: &OperationSpec, targets: &[Target], batch: &BatchResult) {
    // journal hors-ligne en heure locale
    let now = OffsetDateTime::now_local().unwrap_or_else(|_| OffsetDateTime::now_utc());
    match spec {
        OperationSpec::Ping { .. } => {
            for result in &batch.results {
                if result.outcome.failure_kind() == Some(FailureKind::Cancelled) {
                    continue;
                }
                let state = if result.is_success() { TargetState::Online } else { TargetState::Offline };
                app.roster.set_state(&result.address, state).await;
                if let Some(transition) = app.reachability.observe_result(result, now) {
                    report_transition(app, &transition).await;
                }
            }
        }
        OperationSpec::Poll => {
            for result in &batch.results {
                match result.payload().and_then(DeviceIdentity::from_payload) {
                    Some(identity) => {
                        app.roster.merge_identity(&result.address, &identity).await;
                    }
                    None if matches!(result.outcome.failure_kind(), Some(FailureKind::Connect | FailureKind::Timeout)) => {
                        app.roster.set_state(&result.address, TargetState::Offline).await;
                    }
                    None => {}
                }
            }
        }
        OperationSpec::Discover { .. } => {
            let mut found = 0usize;
            for result in &batch.results {
                let identity = result.payload().and_then(DeviceIdentity::from_payload);
                if let (Some(identity), Some(target)) = (identity, targets.get(result.index)) {
                    app.roster.upsert_discovered(target.clone(), &identity).await;
                    found += 1;
                }
            }
            info!(found, scanned = batch.len(), "discovery merged into roster");
        }
        OperationSpec::RemoteApi { .. } | OperationSpec::Deploy { .. } | OperationSpec::Backup => return,
    }
    app.roster.persist().await;
}

/// Tableau des appels d'API (colonnes), écrit en CSV si demandé
pub async fn export_table(
    app: &AppState,
    spec: &OperationSpec,
    targets: &[Target],
    batch: &BatchResult,
) -> (Option<Vec<String>>, Option<String>) {
    let OperationSpec::RemoteApi { method, paths, save_csv, .. } = spec else { return (None, None) };
    let columns = remote_api::columns(*method, paths, batch);
    let Some(name) = save_csv else { return (Some(columns), None) };

    let rows = remote_api::table(&columns, batch, targets);
    let logs_dir = app.cfg.lock().logs_dir.clone();
    let saved = match csv_export::save(&logs_dir, Some(name.as_str()), &columns, &rows).await {
        Ok(file) => {
            info!(file = %file, rows = rows.len(), "remote api results saved");
            Some(file)
        }
        Err(e) => {
            warn!("[batch] cannot save csv: {e}");
            None
        }
    };
    (Some(columns), saved)
}

async fn report_transition(app: &AppState, transition: &Transition) {
    let hostname = app.roster.hostname_of(transition.address()).await.unwrap_or_default();
    match transition {
        Transition::WentOffline { address, .. } => warn!(address = %address, hostname = %hostname, "target went offline"),
        Transition::CameOnline { address, offline_for_secs, .. } => {
            info!(address = %address, hostname = %hostname, offline_for_secs, "target back online")
        }
    }
    if let Err(e) = app.offline_log.record(transition, &hostname).await {
        warn!("[reachability] cannot write offline log: {e}");
    }
}
