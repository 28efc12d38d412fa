/*!
Fixtures de test: cibles et politiques prêtes à l'emploi
*/

use fleet_dispatch::{BatchResult, Credentials, DispatchPolicy, FailureKind, Target};
use std::collections::BTreeMap;

/// Adresse de la n-ième cible de test (`10.0.<n/250>.<n%250 + 1>`)
pub fn address(n: usize) -> String {
    format!("10.0.{}.{}", n / 250, n % 250 + 1)
}

pub fn target(address: &str) -> Target {
    Target::new(address, fleet_dispatch::target::DEFAULT_PORT, Credentials::new("admin", "test-password"))
}

/// `count` cibles aux adresses distinctes, dans l'ordre
pub fn targets(count: usize) -> Vec<Target> {
    (0..count).map(|n| target(&address(n))).collect()
}

/// Politique courte pour les tests: délai d'attente `timeout_secs`, `retries` relances
pub fn fast_policy(timeout_secs: f64, retries: u32) -> DispatchPolicy {
    DispatchPolicy {
        connection_timeout: timeout_secs,
        connection_retries: retries,
        ..DispatchPolicy::default()
    }
}

/// Multiset des issues: libellé (`success` ou type d'échec) -> nombre
pub fn outcome_counts(batch: &BatchResult) -> BTreeMap<String, usize> {
    let mut counts = BTreeMap::new();
    for result in &batch.results {
        let label = match result.outcome.failure_kind() {
            None => "success".to_string(),
            Some(kind) => kind.as_str().to_string(),
        };
        *counts.entry(label).or_insert(0) += 1;
    }
    counts
}

/// Issue par adresse, pour comparer deux exécutions indépendamment de l'ordre
pub fn outcome_by_address(batch: &BatchResult) -> BTreeMap<String, Option<FailureKind>> {
    batch
        .results
        .iter()
        .map(|r| (r.address.clone(), r.outcome.failure_kind()))
        .collect()
}
