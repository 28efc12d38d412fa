/*!
Test Harness pour le dispatch de flotte

Facilite l'écriture de tests de lots avec:
- Opération scriptée et cibles générées
- Exécution sur l'un ou l'autre des exécuteurs
- Capture du flux de progression et relecture NDJSON
- Annulation différée d'un lot
*/

use crate::fixtures;
use crate::scripted::ScriptedOperation;
use anyhow::{Context, Result};
use fleet_dispatch::progress::{self, NdjsonDecoder};
use fleet_dispatch::{BatchResult, CancellationToken, DispatchPolicy, Dispatcher, ProgressEvent, Target};
use std::thread;
use std::time::Duration;

/// Harness de test complet pour un lot
pub struct TestHarness {
    pub operation: ScriptedOperation,
    pub targets: Vec<Target>,
    pub policy: DispatchPolicy,
    pub cancel: CancellationToken,
}

/// Événements reçus pendant un lot, dans l'ordre d'émission
#[derive(Debug)]
pub struct StreamCapture {
    pub events: Vec<ProgressEvent>,
    pub batch: BatchResult,
}

impl StreamCapture {
    pub fn target_events(&self) -> usize {
        self.events.iter().filter(|e| !e.is_complete()).count()
    }

    pub fn complete_events(&self) -> usize {
        self.events.iter().filter(|e| e.is_complete()).count()
    }

    /// Le flux tel qu'il part sur le fil
    pub fn ndjson(&self) -> Result<String> {
        let mut out = String::new();
        for event in &self.events {
            out.push_str(&event.to_ndjson()?);
        }
        Ok(out)
    }

    /// Relit le flux découpé en morceaux de `chunk` octets
    pub fn replay(&self, chunk: usize) -> Result<Vec<ProgressEvent>> {
        let wire = self.ndjson()?;
        let mut decoder = NdjsonDecoder::new();
        let mut events = Vec::new();
        for piece in wire.as_bytes().chunks(chunk.max(1)) {
            events.extend(decoder.push(piece)?);
        }
        events.extend(decoder.finish()?);
        Ok(events)
    }
}

impl TestHarness {
    /// Crée un nouveau harness: 0 cible, délai 1s, 1 relance
    pub fn new() -> Self {
        env_logger::try_init().ok(); // Init logging pour tests

        Self {
            operation: ScriptedOperation::new(),
            targets: Vec::new(),
            policy: fixtures::fast_policy(1.0, 1),
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_targets(mut self, count: usize) -> Self {
        self.targets = fixtures::targets(count);
        self
    }

    pub fn with_operation(mut self, operation: ScriptedOperation) -> Self {
        self.operation = operation;
        self
    }

    pub fn with_policy(mut self, policy: DispatchPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Choisit l'exécuteur (boucle d'événements si `true`)
    pub fn use_async_client(mut self, enabled: bool) -> Self {
        self.policy.use_async_client = enabled;
        self
    }

    pub fn dispatcher(&self) -> Result<Dispatcher> {
        Dispatcher::new(self.policy.clone()).context("policy rejected")
    }

    /// Lance le lot en mode agrégé
    pub fn run(&self) -> Result<BatchResult> {
        let batch = self.dispatcher()?.run_blocking(&self.targets, &self.operation, &self.cancel, None)?;
        log::info!("✅ batch done: {} ok / {} failed", batch.succeeded_count, batch.failed_count);
        Ok(batch)
    }

    /// Lance le lot en capturant chaque événement de progression
    pub fn run_streaming(&self) -> Result<StreamCapture> {
        let (tx, mut rx) = progress::channel();
        let batch = self.dispatcher()?.run_blocking(&self.targets, &self.operation, &self.cancel, Some(&tx))?;
        drop(tx);

        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        log::info!("📡 captured {} progress events", events.len());
        Ok(StreamCapture { events, batch })
    }

    /// Annule le lot après `delay`, depuis un autre thread
    pub fn cancel_after(&self, delay: Duration) -> thread::JoinHandle<()> {
        let cancel = self.cancel.clone();
        thread::spawn(move || {
            thread::sleep(delay);
            log::info!("🛑 cancelling batch");
            cancel.cancel();
        })
    }
}

impl Default for TestHarness {
    fn default() -> Self {
        Self::new()
    }
}

/// Déclare un test exécuté une fois par exécuteur.
///
/// ```ignore
/// dispatch_test!(all_succeed, |h: TestHarness| {
///     let batch = h.with_targets(3).run().unwrap();
///     assert_eq!(batch.succeeded_count, 3);
/// });
/// ```
#[macro_export]
macro_rules! dispatch_test {
    ($name:ident, $body:expr) => {
        mod $name {
            #[allow(unused_imports)]
            use super::*;

            #[test]
            fn threaded() {
                let body = $body;
                body($crate::test_utils::TestHarness::new().use_async_client(false));
            }

            #[test]
            fn event_loop() {
                let body = $body;
                body($crate::test_utils::TestHarness::new().use_async_client(true));
            }
        }
    };
}
