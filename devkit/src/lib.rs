/*!
# Fleet DevKit - Outils de test pour le dispatch de flotte

Bibliothèque facilitant le test des lots sans équipement réel, avec:
- Opération scriptée par adresse (succès, échecs classés, blocage, panique)
- Fixtures de cibles et de politiques
- Harness exécutant un lot et capturant sa progression
*/

pub mod fixtures;
pub mod scripted;
pub mod test_utils;

pub use scripted::{Behaviour, ScriptedOperation};
pub use test_utils::{StreamCapture, TestHarness};
