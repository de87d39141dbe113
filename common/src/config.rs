use std::path::{Path, PathBuf};

use crate::error::{PipelineError, Result};

pub const DEFAULT_MAX_RECORDS: usize = 100_000;
pub const DEFAULT_SNAPSHOT_LIMIT: usize = 1_000;

/// Límites de la simulación.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SimConfig {
    /// Máximo de registros que puede producir un nodo.
    pub max_records: usize,
    /// Máximo de registros copiados en cada snapshot del trace.
    pub snapshot_limit: usize,
    /// Qué archivos puede leer un nodo con `path`.
    pub paths: PathPolicy,
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            max_records: DEFAULT_MAX_RECORDS,
            snapshot_limit: DEFAULT_SNAPSHOT_LIMIT,
            paths: PathPolicy::Any,
        }
    }
}

impl SimConfig {
    /// Lee SIM_MAX_RECORDS y SIM_SNAPSHOT_LIMIT; si no están o no parsean,
    /// usa los valores por defecto.
    pub fn from_env() -> Self {
        Self {
            max_records: env_usize("SIM_MAX_RECORDS", DEFAULT_MAX_RECORDS),
            snapshot_limit: env_usize("SIM_SNAPSHOT_LIMIT", DEFAULT_SNAPSHOT_LIMIT),
            paths: PathPolicy::Any,
        }
    }
}

/// Acceso a archivos desde el `path` de los nodos.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PathPolicy {
    /// Cualquier ruta (CLI local).
    Any,
    /// Sólo archivos dentro de este directorio; las rutas relativas se
    /// resuelven contra él.
    Within(PathBuf),
    /// Ningún nodo puede leer archivos.
    Deny,
}

impl PathPolicy {
    /// Política del server: `SIM_DATA_DIR` si está definido, si no `Deny`.
    pub fn from_env() -> Self {
        match std::env::var("SIM_DATA_DIR") {
            Ok(dir) if !dir.trim().is_empty() => PathPolicy::Within(PathBuf::from(dir.trim())),
            _ => PathPolicy::Deny,
        }
    }

    /// Ruta real a leer para `path` del nodo `node`, o `PathNotAllowed`.
    /// Con `Within` la ruta se canonicaliza, así `..` y los symlinks no
    /// salen del directorio.
    pub fn resolve(&self, node: &str, path: &str) -> Result<PathBuf> {
        let denied = || PipelineError::PathNotAllowed {
            node: node.to_string(),
            path: path.to_string(),
        };

        match self {
            PathPolicy::Any => Ok(PathBuf::from(path)),
            PathPolicy::Deny => Err(denied()),
            PathPolicy::Within(dir) => {
                let root = dir.canonicalize()?;
                let candidate = Path::new(path);
                let joined = if candidate.is_absolute() {
                    candidate.to_path_buf()
                } else {
                    root.join(candidate)
                };
                // un archivo inexistente se reporta igual que uno prohibido
                let real = joined.canonicalize().map_err(|_| denied())?;
                if real.starts_with(&root) {
                    Ok(real)
                } else {
                    Err(denied())
                }
            }
        }
    }
}

fn env_usize(name: &str, default: usize) -> usize {
    std::env::var(name)
        .ok()
        .and_then(|s| s.trim().parse::<usize>().ok())
        .unwrap_or(default)
}
