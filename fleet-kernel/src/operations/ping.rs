/*!
PING - Sonde ICMP via le binaire système

Une réponse au moins => succès (en ligne). Aucune réponse => Timeout.
Le processus reçoit une échéance globale (`-w`) calée sur le budget de la
tentative et il est tué si la tentative est abandonnée.
*/

use async_trait::async_trait;
use fleet_dispatch::{AttemptError, Target, TargetOperation};
use serde::Serialize;
use serde_json::Value;
use std::time::Duration;
use tokio::process::Command;

pub const DEFAULT_PING_COUNT: u32 = 3;

#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct PingStats {
    pub tx: u32,
    pub rx: u32,
    pub loss_pct: f64,
    pub min_ms: Option<f64>,
    pub avg_ms: Option<f64>,
    pub max_ms: Option<f64>,
}

#[derive(Debug, Clone)]
pub struct PingOperation {
    count: u32,
}

impl PingOperation {
    pub fn new(count: u32) -> Self {
        Self { count: count.clamp(1, 20) }
    }
}

#[async_trait]
impl TargetOperation for PingOperation {
    fn kind(&self) -> &str {
        "ping"
    }

    async fn execute(&self, target: &Target, budget: Duration) -> Result<Value, AttemptError> {
        let deadline = budget.as_secs().max(1).to_string();
        let output = Command::new("ping")
            .args(["-n", "-c", &self.count.to_string(), "-i", "0.2", "-w", &deadline, target.host()])
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| match e.kind() {
                std::io::ErrorKind::NotFound => AttemptError::connect("ping not found"),
                _ => AttemptError::protocol(format!("ping failed to start: {e}")),
            })?;

        let mut text = String::from_utf8_lossy(&output.stdout).into_owned();
        text.push_str(&String::from_utf8_lossy(&output.stderr));
        let stats = parse_ping_output(&text, self.count);
        if stats.rx == 0 {
            return Err(AttemptError::timeout(format!("no reply ({}% loss)", stats.loss_pct)));
        }
        serde_json::to_value(&stats).map_err(|e| AttemptError::protocol(e.to_string()))
    }
}

/// Lecture du résumé de `ping` (formats Linux et BSD/macOS)
pub fn parse_ping_output(out: &str, sent: u32) -> PingStats {
    let mut stats = PingStats { tx: sent, rx: 0, loss_pct: 100.0, ..Default::default() };

    for line in out.lines() {
        let lower = line.to_lowercase();
        if lower.contains("transmitted") {
            for part in lower.split(',') {
                let part = part.trim();
                let number = part.split_whitespace().next().and_then(|n| n.parse::<f64>().ok());
                if part.contains("transmitted") {
                    stats.tx = number.map(|n| n as u32).unwrap_or(stats.tx);
                } else if part.contains("received") {
                    stats.rx = number.map(|n| n as u32).unwrap_or(0);
                } else if part.contains("packet loss") {
                    if let Some(loss) = part.split('%').next().and_then(|n| n.trim().parse().ok()) {
                        stats.loss_pct = loss;
                    }
                }
            }
        } else if lower.starts_with("rtt ") || lower.starts_with("round-trip") {
            let Some((_, values)) = line.split_once('=') else { continue };
            let mut nums = values
                .trim()
                .split('/')
                .map(|v| v.trim().trim_end_matches(" ms").trim().parse::<f64>().ok());
            stats.min_ms = nums.next().flatten();
            stats.avg_ms = nums.next().flatten();
            stats.max_ms = nums.next().flatten();
        }
    }
    stats
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_linux_output() {
        let out = "PING 10.0.0.1 (10.0.0.1) 56(84) bytes of data.\n\
                   64 bytes from 10.0.0.1: icmp_seq=1 ttl=64 time=0.412 ms\n\
                   \n\
                   --- 10.0.0.1 ping statistics ---\n\
                   3 packets transmitted, 2 received, 33.3333% packet loss, time 2003ms\n\
                   rtt min/avg/max/mdev = 0.398/0.405/0.412/0.007 ms\n";
        let s = parse_ping_output(out, 3);
        assert_eq!((s.tx, s.rx), (3, 2));
        assert!((s.loss_pct - 33.3333).abs() < 1e-6);
        assert_eq!(s.min_ms, Some(0.398));
        assert_eq!(s.max_ms, Some(0.412));
    }

    #[test]
    fn test_bsd_output() {
        let out = "--- 10.0.0.1 ping statistics ---\n\
                   5 packets transmitted, 5 packets received, 0.0% packet loss\n\
                   round-trip min/avg/max/stddev = 1.101/2.202/3.303/0.500 ms\n";
        let s = parse_ping_output(out, 5);
        assert_eq!(s.rx, 5);
        assert_eq!(s.loss_pct, 0.0);
        assert_eq!(s.avg_ms, Some(2.202));
    }

    #[test]
    fn test_unreachable_output() {
        let out = "--- 10.9.9.9 ping statistics ---\n\
                   3 packets transmitted, 0 received, +3 errors, 100% packet loss, time 2040ms\n";
        let s = parse_ping_output(out, 3);
        assert_eq!(s.rx, 0);
        assert_eq!(s.loss_pct, 100.0);
        assert_eq!(s.min_ms, None);
        // sortie vide: rien reçu
        assert_eq!(parse_ping_output("", 4).tx, 4);
    }
}
