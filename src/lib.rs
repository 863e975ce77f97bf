//! # Jobs Set
//! src/lib.rs
//!
//! Pool de workers sobre una cola compartida para ejecutar lotes de trabajo
//! bloqueante (típicamente llamadas lentas a servicios remotos) y esperar su
//! terminación con un timeout acotado.
//!
//! ## Arquitectura
//!
//! - `events`: primitiva de observador (`Event`, `ReturnableEvent`)
//! - `jobs`: cola, jobs, workers y el coordinador `JobsSet`
//! - `config`: configuración CLI / variables de entorno
//! - `commands`: cuerpos de jobs de ejemplo para el binario
//! - `error`: tipos de error
//!
//! ## Ejemplo de uso
//!
//! ```ignore
//! use jobs_set::{Job, JobsSet, JobsSetConfig};
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! let mut set = JobsSet::new(JobsSetConfig::default());
//! set.add_job(Arc::new(Job::new(jobs_set::commands::fibonacci).with_args(vec![30.into()])), true)?;
//! set.start(None)?;
//! set.join(Some(Duration::from_secs(5)))?;
//! ```

pub mod commands;
pub mod config;
pub mod error;
pub mod events;
pub mod jobs;

pub use error::{JobError, JobsError, Result};
pub use events::{Event, Handler, ReturnableEvent, ReturningHandler};
pub use jobs::{Job, JobState, JobsSet, JobsSetConfig, JobsSetStats, Run, TimedJoinQueue};
