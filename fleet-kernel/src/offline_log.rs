/*!
JOURNAL HORS-LIGNE - Trace des transitions de joignabilité sur disque

Format (colonnes alignées, séparées par ` | `) :
    # Offline Time      | Online Time         | IP Address      | Hostname
    2026-03-01 08:00:00 | OFFLINE             | 10.0.0.1        | IBR900-a1b

Au retour en ligne, la dernière ligne OFFLINE de l'adresse est réécrite avec
l'heure de retour. Les écritures sont sérialisées par un verrou unique.
*/

use fleet_dispatch::Transition;
use std::path::{Path, PathBuf};
use time::macros::format_description;
use time::OffsetDateTime;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;

pub const OFFLINE_LOG_FILE: &str = "Offline Events.log";

const HEADER: &str = "# Offline Time      | Online Time         | IP Address      | Hostname\n\
                      # ----------------- | ------------------- | --------------- | -----------------\n";

#[derive(Debug, thiserror::Error)]
pub enum OfflineLogError {
    #[error("offline log {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("cannot format timestamp: {0}")]
    Format(#[from] time::error::Format),
}

#[derive(Debug)]
pub struct OfflineLog {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl OfflineLog {
    pub fn new(logs_dir: &Path) -> Self {
        Self { path: logs_dir.join(OFFLINE_LOG_FILE), write_lock: Mutex::new(()) }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub async fn record(&self, transition: &Transition, hostname: &str) -> Result<(), OfflineLogError> {
        match transition {
            Transition::WentOffline { address, at } => self.append_offline(address, hostname, *at).await,
            Transition::CameOnline { address, at, .. } => self.mark_online(address, *at).await,
        }
    }

    pub async fn append_offline(&self, ip: &str, hostname: &str, at: OffsetDateTime) -> Result<(), OfflineLogError> {
        let _guard = self.write_lock.lock().await;
        if let Some(dir) = self.path.parent() {
            fs::create_dir_all(dir).await.map_err(|e| self.io(e))?;
        }
        let mut file = fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await
            .map_err(|e| self.io(e))?;
        if file.metadata().await.map_err(|e| self.io(e))?.len() == 0 {
            file.write_all(HEADER.as_bytes()).await.map_err(|e| self.io(e))?;
        }
        let line = format!("{:19} | {:19} | {:15} | {:20}\n", stamp(at)?, "OFFLINE", ip, clean_hostname(hostname));
        file.write_all(line.as_bytes()).await.map_err(|e| self.io(e))?;
        file.flush().await.map_err(|e| self.io(e))
    }

    /// Complète la dernière ligne OFFLINE de `ip`; sans effet si aucune
    pub async fn mark_online(&self, ip: &str, at: OffsetDateTime) -> Result<(), OfflineLogError> {
        let _guard = self.write_lock.lock().await;
        let content = match fs::read_to_string(&self.path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
            Err(e) => return Err(self.io(e)),
        };
        let mut lines: Vec<String> = content.split('\n').map(str::to_string).collect();
        let found = lines.iter().rposition(|line| {
            if line.starts_with('#') || line.trim().is_empty() {
                return false;
            }
            let cols: Vec<&str> = line.split('|').map(str::trim).collect();
            cols.len() >= 3 && cols[1] == "OFFLINE" && cols[2] == ip
        });
        let Some(idx) = found else { return Ok(()) };

        let cols: Vec<String> = lines[idx].split('|').map(|c| c.trim().to_string()).collect();
        let hostname = cols.get(3).map(String::as_str).unwrap_or("-");
        lines[idx] = format!("{:19} | {:19} | {:15} | {:20}", cols[0], stamp(at)?, cols[2], hostname);
        fs::write(&self.path, lines.join("\n")).await.map_err(|e| self.io(e))
    }

    fn io(&self, source: std::io::Error) -> OfflineLogError {
        OfflineLogError::Io { path: self.path.clone(), source }
    }
}

fn stamp(at: OffsetDateTime) -> Result<String, time::error::Format> {
    at.format(format_description!("[year]-[month]-[day] [hour]:[minute]:[second]"))
}

fn clean_hostname(hostname: &str) -> String {
    let h = hostname.trim().replace('|', "-");
    if h.is_empty() { "-".to_string() } else { h.chars().take(32).collect() }
}
