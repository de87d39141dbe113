use thiserror::Error;

pub type Result<T> = std::result::Result<T, PipelineError>;

/// Errores de construcción y ejecución de un pipeline.
/// Todos se muestran tal cual al usuario (CLI o respuesta HTTP).
#[derive(Debug, Error)]
pub enum PipelineError {
    /* ---- validación del DAG ---- */
    #[error("id de nodo duplicado: '{0}'")]
    DuplicateNode(String),

    #[error("el nodo '{node}' depende de '{missing}', que no existe")]
    MissingDependency { node: String, missing: String },

    #[error("una arista apunta al nodo '{0}', que no existe")]
    UnknownNode(String),

    #[error("el DAG contiene un ciclo entre los nodos: {}", .nodes.join(", "))]
    CycleDetected { nodes: Vec<String> },

    #[error("operación desconocida '{op}' en el nodo '{node}'")]
    UnknownOp { node: String, op: String },

    #[error("función desconocida '{name}' para {op} en el nodo '{node}'")]
    UnknownFunction {
        node: String,
        op: String,
        name: String,
    },

    #[error("argumento inválido en el nodo '{node}': {message}")]
    InvalidArgument { node: String, message: String },

    #[error("el nodo '{node}' no puede leer '{path}': ruta no permitida")]
    PathNotAllowed { node: String, path: String },

    /* ---- ejecución ---- */
    #[error("el nodo '{0}' no tiene entrada (sin dependencias, sin data y sin path)")]
    MissingInput(String),

    #[error("error de transformación en '{node}': {message}")]
    TransformationError { node: String, message: String },

    #[error("el nodo '{node}' produjo {count} registros (límite {limit})")]
    LimitExceeded {
        node: String,
        count: usize,
        limit: usize,
    },

    /* ---- carga de archivos ---- */
    #[error("error de E/S: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON inválido: {0}")]
    Json(#[from] serde_json::Error),

    #[error("CSV inválido: {0}")]
    Csv(#[from] csv::Error),
}

impl PipelineError {
    pub(crate) fn transformation(node: &str, message: impl Into<String>) -> Self {
        PipelineError::TransformationError {
            node: node.to_string(),
            message: message.into(),
        }
    }

    /// true si el error viene de la forma del DAG y no de los datos.
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            PipelineError::DuplicateNode(_)
                | PipelineError::MissingDependency { .. }
                | PipelineError::UnknownNode(_)
                | PipelineError::CycleDetected { .. }
                | PipelineError::UnknownOp { .. }
                | PipelineError::UnknownFunction { .. }
                | PipelineError::InvalidArgument { .. }
                | PipelineError::PathNotAllowed { .. }
        )
    }
}
