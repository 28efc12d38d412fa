/*!
Opération scriptée pour tester le dispatch sans réseau

Chaque adresse reçoit un comportement (succès, échec classé, blocage,
échecs transitoires, panique). L'opération compte les tentatives par
adresse et mesure le nombre maximal de tentatives simultanées.
*/

use async_trait::async_trait;
use fleet_dispatch::{AttemptError, FailureKind, Target, TargetOperation};
use parking_lot::Mutex;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Comportement d'une adresse pour chaque tentative
#[derive(Debug, Clone)]
pub enum Behaviour {
    /// Répond `{"address": ..}` après `delay`
    Succeed { delay: Duration },
    /// Échoue toujours avec ce type
    Fail(FailureKind),
    /// Ne répond jamais dans le budget accordé
    Hang,
    /// Échoue `times` fois (type `kind`), puis réussit
    FailFirst { times: u32, kind: FailureKind },
    Panic,
}

impl Behaviour {
    pub fn succeed() -> Self {
        Behaviour::Succeed { delay: Duration::ZERO }
    }

    pub fn succeed_after(delay: Duration) -> Self {
        Behaviour::Succeed { delay }
    }
}

#[derive(Debug, Default)]
struct Ledger {
    attempts: HashMap<String, u32>,
    started: Vec<String>,
}

/// Opération de test partagée entre les workers (clonage = même état)
#[derive(Debug, Clone)]
pub struct ScriptedOperation {
    kind: String,
    default: Behaviour,
    script: Arc<HashMap<String, Behaviour>>,
    ledger: Arc<Mutex<Ledger>>,
    in_flight: Arc<AtomicUsize>,
    peak: Arc<AtomicUsize>,
}

impl ScriptedOperation {
    /// Toutes les adresses réussissent immédiatement
    pub fn new() -> Self {
        Self {
            kind: "scripted".to_string(),
            default: Behaviour::succeed(),
            script: Arc::new(HashMap::new()),
            ledger: Arc::new(Mutex::new(Ledger::default())),
            in_flight: Arc::new(AtomicUsize::new(0)),
            peak: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn with_kind(mut self, kind: &str) -> Self {
        self.kind = kind.to_string();
        self
    }

    /// Comportement des adresses absentes du script
    pub fn by_default(mut self, behaviour: Behaviour) -> Self {
        self.default = behaviour;
        self
    }

    pub fn on(mut self, address: &str, behaviour: Behaviour) -> Self {
        Arc::make_mut(&mut self.script).insert(address.to_string(), behaviour);
        self
    }

    /// Tentatives effectuées pour `address`
    pub fn attempts(&self, address: &str) -> u32 {
        self.ledger.lock().attempts.get(address).copied().unwrap_or(0)
    }

    pub fn total_attempts(&self) -> u32 {
        self.ledger.lock().attempts.values().sum()
    }

    /// Adresses dans l'ordre du premier démarrage
    pub fn started(&self) -> Vec<String> {
        self.ledger.lock().started.clone()
    }

    /// Nombre maximal de tentatives observées en même temps
    pub fn peak_concurrency(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }

    fn behaviour_for(&self, address: &str) -> &Behaviour {
        self.script.get(address).unwrap_or(&self.default)
    }

    fn enter(&self, address: &str) -> u32 {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);

        let mut ledger = self.ledger.lock();
        let count = ledger.attempts.entry(address.to_string()).or_insert(0);
        *count += 1;
        let attempt = *count;
        if attempt == 1 {
            ledger.started.push(address.to_string());
        }
        attempt
    }
}

impl Default for ScriptedOperation {
    fn default() -> Self {
        Self::new()
    }
}

/// Décrémente le compteur en vol même si la tentative est abandonnée
struct InFlight<'a>(&'a AtomicUsize);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl TargetOperation for ScriptedOperation {
    fn kind(&self) -> &str {
        &self.kind
    }

    async fn execute(&self, target: &Target, budget: Duration) -> Result<Value, AttemptError> {
        let attempt = self.enter(&target.address);
        let _guard = InFlight(&self.in_flight);
        log::debug!("🎭 [SCRIPTED] {} attempt {}", target.address, attempt);

        match self.behaviour_for(&target.address).clone() {
            Behaviour::Succeed { delay } => {
                if !delay.is_zero() {
                    tokio::time::sleep(delay).await;
                } else {
                    // laisse les autres tâches avancer entre deux tentatives
                    tokio::task::yield_now().await;
                }
                Ok(json!({ "address": target.address, "attempt": attempt }))
            }
            Behaviour::Fail(kind) => Err(AttemptError::new(kind, format!("scripted {kind}"))),
            Behaviour::Hang => {
                tokio::time::sleep(budget * 4 + Duration::from_secs(1)).await;
                Ok(json!({ "address": target.address, "late": true }))
            }
            Behaviour::FailFirst { times, kind } if attempt <= times => {
                Err(AttemptError::new(kind, format!("scripted {kind} #{attempt}")))
            }
            Behaviour::FailFirst { .. } => Ok(json!({ "address": target.address, "attempt": attempt })),
            Behaviour::Panic => panic!("scripted panic for {}", target.address),
        }
    }
}
