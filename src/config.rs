//! # Configuración
//! src/config.rs
//!
//! Configuración del binario de demo, con soporte para argumentos CLI y
//! variables de entorno.
//!
//! ## Ejemplos de uso
//!
//! ### CLI
//! ```bash
//! ./jobs_set --workers 4 \
//!   --jobs 20 \
//!   --queue-capacity 8 \
//!   --timeout-ms 5000
//! ```
//!
//! ### Variables de entorno
//! ```bash
//! JOBS_WORKERS=4 JOBS_FAIL_EVERY=5 ./jobs_set
//! ```

use crate::error::{JobsError, Result};
use clap::Parser;
use std::time::Duration;

/// Configuración del lote de jobs
#[derive(Debug, Clone, Parser)]
#[command(name = "jobs_set")]
#[command(about = "Ejecuta un lote de jobs sobre un pool de workers con join temporizado")]
#[command(version = "0.1.0")]
pub struct Config {
    /// Número de workers (si no se da, uno por job encolado)
    #[arg(short, long, env = "JOBS_WORKERS")]
    pub workers: Option<usize>,

    /// Cantidad de jobs del lote
    #[arg(short, long, default_value = "8", env = "JOBS_COUNT")]
    pub jobs: usize,

    /// Capacidad máxima de la cola (0 = sin límite)
    #[arg(long = "queue-capacity", default_value = "0", env = "JOBS_QUEUE_CAPACITY")]
    pub queue_capacity: usize,

    // === Tiempos ===

    /// Timeout del join en milisegundos
    #[arg(long = "timeout-ms", default_value = "10000", env = "JOBS_TIMEOUT_MS")]
    pub timeout_ms: u64,

    /// Cada cuánto revisa un worker ocioso si debe parar, en milisegundos
    #[arg(long = "poll-interval-ms", default_value = "200", env = "JOBS_POLL_INTERVAL_MS")]
    pub poll_interval_ms: u64,

    /// Hace fallar uno de cada N jobs (0 = nunca)
    #[arg(long = "fail-every", default_value = "0", env = "JOBS_FAIL_EVERY")]
    pub fail_every: usize,
}

impl Config {
    /// Crea una nueva configuración parseando argumentos CLI
    pub fn new() -> Self {
        Config::parse()
    }

    /// Valida la configuración
    pub fn validate(&self) -> Result<()> {
        if self.workers == Some(0) {
            return Err(JobsError::InvalidConfig("workers must be >= 1".to_string()));
        }
        if self.timeout_ms == 0 {
            return Err(JobsError::InvalidConfig("timeout must be > 0".to_string()));
        }
        if self.poll_interval_ms == 0 {
            return Err(JobsError::InvalidConfig("poll interval must be > 0".to_string()));
        }
        if self.poll_interval_ms > self.timeout_ms {
            return Err(JobsError::InvalidConfig(
                "poll interval must not exceed the join timeout".to_string(),
            ));
        }

        Ok(())
    }

    pub fn join_timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    /// Registra un resumen de la configuración
    pub fn print_summary(&self) {
        let workers = self
            .workers
            .map_or_else(|| "one per queued job".to_string(), |n| n.to_string());
        let capacity = if self.queue_capacity == 0 {
            "unbounded".to_string()
        } else {
            self.queue_capacity.to_string()
        };

        tracing::info!(
            workers = %workers,
            jobs = self.jobs,
            queue_capacity = %capacity,
            timeout_ms = self.timeout_ms,
            poll_interval_ms = self.poll_interval_ms,
            fail_every = self.fail_every,
            "configuration loaded"
        );
    }
}

impl Default for Config {
    /// Configuración por defecto
    fn default() -> Self {
        Self {
            workers: None,
            jobs: 8,
            queue_capacity: 0,
            timeout_ms: 10_000,
            poll_interval_ms: 200,
            fail_every: 0,
        }
    }
}
