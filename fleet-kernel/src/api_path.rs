//! CHEMINS D'API - Évaluateur d'expressions de chemin dans les réponses JSON
//!
//! Deux syntaxes acceptées :
//! - `status/wan/devices/*/signal` (segments séparés par `/`)
//! - `status.wan.devices[0].signal` (points et crochets)
//!
//! Segments jokers : `*` (toute clé ou index), `mdm*` (préfixe), `*x` (suffixe),
//! `*x*` (contient). Dans une liste, un joker partiel se compare à l'identifiant
//! de l'élément (`id`, `uid`, `name`, `_id`, `device_id`). Les clés sont
//! comparées exactement, puis sans casse.

use serde_json::Value;
use std::fmt;

const ITEM_ID_KEYS: [&str; 5] = ["id", "uid", "name", "_id", "device_id"];

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Pattern {
    Any,
    Prefix(String),
    Suffix(String),
    Contains(String),
}

impl Pattern {
    fn parse(seg: &str) -> Result<Self, PathError> {
        let inner = seg.trim_matches('*');
        if inner.is_empty() {
            return Ok(Pattern::Any);
        }
        if inner.contains('*') {
            return Err(PathError::InvalidWildcard(seg.to_string()));
        }
        let inner = inner.to_lowercase();
        Ok(match (seg.starts_with('*'), seg.ends_with('*')) {
            (true, true) => Pattern::Contains(inner),
            (true, false) => Pattern::Suffix(inner),
            _ => Pattern::Prefix(inner),
        })
    }

    pub fn matches(&self, key: &str) -> bool {
        let key = key.to_lowercase();
        match self {
            Pattern::Any => true,
            Pattern::Prefix(p) => key.starts_with(p.as_str()),
            Pattern::Suffix(s) => key.ends_with(s.as_str()),
            Pattern::Contains(c) => key.contains(c.as_str()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Segment {
    Key(String),
    Index(usize),
    Wild(Pattern),
}

impl fmt::Display for Segment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Segment::Key(k) => f.write_str(k),
            Segment::Index(i) => write!(f, "{i}"),
            Segment::Wild(Pattern::Any) => f.write_str("*"),
            Segment::Wild(Pattern::Prefix(p)) => write!(f, "{p}*"),
            Segment::Wild(Pattern::Suffix(s)) => write!(f, "*{s}"),
            Segment::Wild(Pattern::Contains(c)) => write!(f, "*{c}*"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PathError {
    #[error("empty path")]
    Empty,
    #[error("unclosed bracket in {0:?}")]
    UnclosedBracket(String),
    #[error("invalid list index in {0:?}")]
    BadIndex(String),
    #[error("wildcard only allowed at segment start or end: {0:?}")]
    InvalidWildcard(String),
    #[error("path must have a segment before the first wildcard: {0:?}")]
    LeadingWildcard(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathExpr {
    segments: Vec<Segment>,
}

impl PathExpr {
    pub fn parse(raw: &str) -> Result<Self, PathError> {
        let raw = raw.trim().trim_matches('/');
        if raw.is_empty() {
            return Err(PathError::Empty);
        }
        let segments = if raw.contains('/') || !(raw.contains('.') || raw.contains('[')) {
            raw.split('/').filter(|s| !s.is_empty()).map(parse_segment).collect::<Result<Vec<_>, _>>()?
        } else {
            parse_dotted(raw)?
        };
        if segments.is_empty() {
            return Err(PathError::Empty);
        }
        Ok(Self { segments })
    }

    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }

    pub fn is_wildcard(&self) -> bool {
        self.segments.iter().any(|s| matches!(s, Segment::Wild(_)))
    }

    /// Découpe au premier joker : (chemin à requêter, reste à développer)
    pub fn split_at_wildcard(&self) -> Result<(String, &[Segment]), PathError> {
        match self.segments.iter().position(|s| matches!(s, Segment::Wild(_))) {
            Some(0) => Err(PathError::LeadingWildcard(self.to_string())),
            Some(at) => Ok((join(&self.segments[..at]), &self.segments[at..])),
            None => Ok((self.to_string(), &[])),
        }
    }

    /// Valeur au bout d'un chemin sans joker, rendue en texte
    pub fn lookup(&self, root: &Value) -> Option<String> {
        let mut node = root;
        for seg in &self.segments {
            node = match seg {
                Segment::Key(k) => child(node, k)?.1,
                Segment::Index(i) => node.as_array()?.get(*i)?,
                Segment::Wild(_) => return None,
            };
        }
        match node {
            Value::Null => None,
            other => Some(render(other)),
        }
    }

    /// Toutes les valeurs atteintes, avec leur chemin concret
    pub fn expand(&self, root: &Value) -> Vec<(String, Value)> {
        let mut out = Vec::new();
        expand_from(root, String::new(), &self.segments, &mut out);
        out
    }
}

impl fmt::Display for PathExpr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&join(&self.segments))
    }
}

/// Développe `rest` sous `base` (chemin déjà requêté)
pub fn expand_under(root: &Value, base: &str, rest: &[Segment]) -> Vec<(String, Value)> {
    let mut out = Vec::new();
    expand_from(root, base.to_string(), rest, &mut out);
    out
}

/// Texte d'une valeur JSON: chaîne telle quelle, le reste sérialisé
pub fn render(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn join(segments: &[Segment]) -> String {
    segments.iter().map(|s| s.to_string()).collect::<Vec<_>>().join("/")
}

fn parse_segment(seg: &str) -> Result<Segment, PathError> {
    if seg.contains('*') {
        Ok(Segment::Wild(Pattern::parse(seg)?))
    } else {
        Ok(Segment::Key(seg.to_string()))
    }
}

fn parse_dotted(raw: &str) -> Result<Vec<Segment>, PathError> {
    let mut segments = Vec::new();
    for part in raw.split('.').filter(|p| !p.is_empty()) {
        let (name, mut rest) = match part.find('[') {
            Some(at) => (&part[..at], &part[at..]),
            None => (part, ""),
        };
        if !name.is_empty() {
            segments.push(parse_segment(name)?);
        }
        while let Some(open) = rest.strip_prefix('[') {
            let close = open.find(']').ok_or_else(|| PathError::UnclosedBracket(raw.to_string()))?;
            let inside = open[..close].trim();
            let seg = if inside == "*" {
                Segment::Wild(Pattern::Any)
            } else {
                Segment::Index(inside.parse().map_err(|_| PathError::BadIndex(raw.to_string()))?)
            };
            segments.push(seg);
            rest = &open[close + 1..];
        }
        if !rest.is_empty() {
            return Err(PathError::UnclosedBracket(raw.to_string()));
        }
    }
    Ok(segments)
}

/// Enfant par clé: exacte d'abord, puis sans casse; index pour une liste
fn child<'a>(node: &'a Value, key: &str) -> Option<(String, &'a Value)> {
    match node {
        Value::Object(map) => map.get(key).map(|v| (key.to_string(), v)).or_else(|| {
            map.iter()
                .find(|(k, _)| k.eq_ignore_ascii_case(key))
                .map(|(k, v)| (k.clone(), v))
        }),
        Value::Array(items) => {
            let i: usize = key.parse().ok()?;
            items.get(i).map(|v| (key.to_string(), v))
        }
        _ => None,
    }
}

fn item_identifier(item: &Value) -> Option<String> {
    let map = item.as_object()?;
    ITEM_ID_KEYS
        .iter()
        .find_map(|k| map.get(*k).filter(|v| !v.is_null()).map(render))
}

fn push_path(base: &str, seg: &str) -> String {
    if base.is_empty() { seg.to_string() } else { format!("{base}/{seg}") }
}

fn expand_from(node: &Value, path: String, rest: &[Segment], out: &mut Vec<(String, Value)>) {
    let Some((seg, rest)) = rest.split_first() else {
        out.push((path, node.clone()));
        return;
    };
    match seg {
        Segment::Key(k) => {
            if let Some((key, v)) = child(node, k) {
                expand_from(v, push_path(&path, &key), rest, out);
            }
        }
        Segment::Index(i) => {
            if let Some(v) = node.as_array().and_then(|items| items.get(*i)) {
                expand_from(v, push_path(&path, &i.to_string()), rest, out);
            }
        }
        Segment::Wild(pattern) => match node {
            Value::Object(map) => {
                for (k, v) in map {
                    if pattern.matches(k) {
                        expand_from(v, push_path(&path, k), rest, out);
                    }
                }
            }
            Value::Array(items) => {
                for (i, v) in items.iter().enumerate() {
                    let name = match pattern {
                        Pattern::Any => i.to_string(),
                        _ => item_identifier(v).unwrap_or_else(|| i.to_string()),
                    };
                    if pattern.matches(&name) {
                        expand_from(v, push_path(&path, &name), rest, out);
                    }
                }
            }
            _ => {}
        },
    }
}
