//! # Errores
//! src/error.rs
//!
//! Dos familias de errores:
//! - `JobsError`: fallos de coordinación (timeouts, cola llena, uso indebido
//!   de la API). Son los que ve quien embebe el crate.
//! - `JobError`: fallo del cuerpo de un job. Nunca se propaga al `JobsSet`;
//!   queda guardado en el propio job y se emite por su `exception_event`.

use std::time::Duration;
use thiserror::Error;

/// Errores de coordinación del sistema de jobs
#[derive(Debug, Error)]
pub enum JobsError {
    /// Una espera acotada venció con trabajo aún pendiente.
    /// No cancela nada: los workers y los jobs siguen vivos.
    #[error("timed out after {timeout:?} waiting for unfinished jobs")]
    Timeout { timeout: Duration },

    #[error("queue is full (max capacity: {capacity})")]
    QueueFull { capacity: usize },

    /// `unhandle` de un handler que nunca se registró
    #[error("handler is not registered on this event")]
    HandlerNotRegistered,

    /// `task_done` llamado más veces que items encolados
    #[error("task_done() called more times than there were items in the queue")]
    TaskDoneUnderflow,

    #[error("jobs set already started")]
    AlreadyStarted,

    #[error("jobs set already joined and cannot be reused")]
    AlreadyJoined,

    /// `fill_queue` sobre una cola sin límite nunca terminaría
    #[error("cannot fill an unbounded queue")]
    UnboundedQueue,

    #[error("worker thread {name} panicked")]
    WorkerPanicked { name: String },

    #[error("failed to spawn worker thread: {0}")]
    Spawn(#[from] std::io::Error),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

/// Error producido por el cuerpo de un job
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum JobError {
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("{0}")]
    Failed(String),

    /// El cuerpo hizo panic; el mensaje es el payload del panic
    #[error("job panicked: {0}")]
    Panicked(String),
}

impl JobError {
    /// Atajo para `JobError::Failed`
    pub fn failed(message: impl Into<String>) -> Self {
        JobError::Failed(message.into())
    }
}

pub type Result<T> = std::result::Result<T, JobsError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timeout_carries_value() {
        let err = JobsError::Timeout { timeout: Duration::from_millis(500) };
        match err {
            JobsError::Timeout { timeout } => assert_eq!(timeout, Duration::from_millis(500)),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_job_error_display() {
        assert_eq!(JobError::failed("x").to_string(), "x");
        assert_eq!(
            JobError::InvalidArgument("n".to_string()).to_string(),
            "invalid argument: n"
        );
        assert_eq!(JobError::Panicked("boom".to_string()).to_string(), "job panicked: boom");
    }

    #[test]
    fn test_queue_full_display() {
        let err = JobsError::QueueFull { capacity: 5 };
        assert!(err.to_string().contains("max capacity: 5"));
    }
}
