//! # Sistema de Jobs
//!
//! Ejecuta un lote de jobs sobre un pool de hilos y espera su fin con un
//! timeout.
//!
//! - `queue`: cola FIFO con contador de trabajo pendiente y `join(timeout)`
//! - `job`: unidad de trabajo con ciclo de vida y eventos
//! - `worker`: loop de consumo con parada cooperativa
//! - `set`: coordinador (cola + workers + bookkeeping)

pub mod job;
pub mod queue;
pub mod set;
pub mod worker;

pub use job::{Job, JobSnapshot, JobState, Run};
pub use queue::{QueueStats, TimedJoinQueue};
pub use set::{JobsSet, JobsSetConfig, JobsSetStats};
pub use worker::{Message, Worker, WorkerState, WorkerThread};
