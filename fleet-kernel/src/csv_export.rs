/*!
EXPORT CSV - Tableaux de résultats écrits dans le dossier des journaux

Une ligne d'en-têtes puis une ligne par cible. Les champs contenant `,`,
`"` ou un saut de ligne sont entourés de guillemets (guillemets doublés).
Un fichier existant du même nom est remplacé.
*/

use std::path::{Component, Path, PathBuf};
use tokio::fs;

pub const DEFAULT_CSV_NAME: &str = "remote_api_results.csv";

#[derive(Debug, thiserror::Error)]
pub enum CsvError {
    #[error("no headers")]
    NoHeaders,
    #[error("invalid file name {0:?}")]
    BadName(String),
    #[error("cannot write {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl CsvError {
    pub fn is_client_error(&self) -> bool {
        !matches!(self, CsvError::Io { .. })
    }
}

/// Nom simple, extension `.csv` ajoutée si absente
pub fn file_name(requested: Option<&str>) -> Result<String, CsvError> {
    let name = requested.map(str::trim).filter(|n| !n.is_empty()).unwrap_or(DEFAULT_CSV_NAME);
    let mut parts = Path::new(name).components();
    if !matches!((parts.next(), parts.next()), (Some(Component::Normal(_)), None)) {
        return Err(CsvError::BadName(name.to_string()));
    }
    if name.to_lowercase().ends_with(".csv") {
        Ok(name.to_string())
    } else {
        Ok(format!("{name}.csv"))
    }
}

fn field(value: &str) -> String {
    if value.contains([',', '"', '\n', '\r']) {
        format!("\"{}\"", value.replace('"', "\"\""))
    } else {
        value.to_string()
    }
}

pub fn render(headers: &[String], rows: &[Vec<String>]) -> String {
    let mut out = String::new();
    for line in std::iter::once(headers).chain(rows.iter().map(Vec::as_slice)) {
        let cells: Vec<String> = line.iter().map(|c| field(c)).collect();
        out.push_str(&cells.join(","));
        out.push_str("\r\n");
    }
    out
}

/// Écrit le tableau dans `dir` et renvoie le nom du fichier
pub async fn save(
    dir: &Path,
    requested: Option<&str>,
    headers: &[String],
    rows: &[Vec<String>],
) -> Result<String, CsvError> {
    if headers.is_empty() {
        return Err(CsvError::NoHeaders);
    }
    let name = file_name(requested)?;
    let path = dir.join(&name);
    fs::create_dir_all(dir)
        .await
        .map_err(|source| CsvError::Io { path: dir.to_path_buf(), source })?;
    fs::write(&path, render(headers, rows))
        .await
        .map_err(|source| CsvError::Io { path, source })?;
    Ok(name)
}
