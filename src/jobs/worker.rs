//! # Workers
//! src/jobs/worker.rs
//!
//! Un `Worker` saca mensajes de la cola compartida y ejecuta los jobs hasta
//! que alguien llama a `stop()` o recibe una poison pill.
//!
//! La espera en la cola está acotada por `poll_interval`: cuando vence sin
//! trabajo, el worker vuelve a mirar su estado. Así un `stop()` externo se
//! respeta en como mucho `poll_interval` sin primitivas extra.

use crate::error::{JobsError, Result};
use crate::jobs::job::{panic_message, Job};
use crate::jobs::queue::TimedJoinQueue;
use serde::Serialize;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::Duration;

/// Intervalo de sondeo por defecto
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(200);

/// Item de la cola: un job real o la señal administrativa de salida
pub enum Message {
    Run(Arc<Job>),
    PoisonPill,
}

impl fmt::Debug for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Message::Run(job) => f.debug_tuple("Run").field(&job.name()).finish(),
            Message::PoisonPill => f.write_str("PoisonPill"),
        }
    }
}

/// Estados posibles de un worker
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum WorkerState {
    Running,

    /// Se pidió `stop()`; el loop lo verá en el próximo sondeo
    Stopping,

    Stopped,
}

/// Estado del worker más el pedido de parada
struct Control {
    state: WorkerState,

    /// `stop()` ya se llamó; sobrevive aunque `run()` aún no haya empezado
    stop_requested: bool,
}

/// Loop de consumo sobre una cola compartida
pub struct Worker {
    /// Cola compartida por todos los workers del set
    queue: Arc<TimedJoinQueue<Message>>,

    control: Mutex<Control>,

    poll_interval: Duration,
}

impl Worker {
    pub fn new(queue: Arc<TimedJoinQueue<Message>>, poll_interval: Duration) -> Self {
        Self {
            queue,
            control: Mutex::new(Control {
                state: WorkerState::Stopped,
                stop_requested: false,
            }),
            poll_interval,
        }
    }

    fn lock_control(&self) -> MutexGuard<'_, Control> {
        self.control.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn state(&self) -> WorkerState {
        self.lock_control().state
    }

    pub fn poll_interval(&self) -> Duration {
        self.poll_interval
    }

    /// Pide al worker que termine. No bloquea.
    ///
    /// Si `run()` aún no empezó, arrancará y saldrá de inmediato. Un worker
    /// que ya terminó sigue en `Stopped`.
    pub fn stop(&self) {
        let mut control = self.lock_control();
        control.stop_requested = true;
        if control.state == WorkerState::Running {
            control.state = WorkerState::Stopping;
        }
    }

    /// Loop principal del worker. Bloquea el hilo actual hasta que termine.
    pub fn run(&self) {
        {
            let mut control = self.lock_control();
            if control.stop_requested {
                return;
            }
            control.state = WorkerState::Running;
        }

        tracing::debug!(poll_interval = ?self.poll_interval, "worker started");

        while self.state() == WorkerState::Running {
            let job = match self.queue.get_timeout(self.poll_interval) {
                // Cola vacía: volver a revisar el estado
                None => continue,
                Some(Message::PoisonPill) => {
                    if let Err(e) = self.queue.task_done() {
                        tracing::warn!(error = %e, "poison pill without matching put");
                    }
                    tracing::debug!("worker received poison pill");
                    break;
                }
                Some(Message::Run(job)) => job,
            };

            tracing::debug!(job = %job.name(), "worker picked up job");

            // start() ya captura los errores del cuerpo; esto cubre panics
            // de los handlers para que un job no mate al worker
            if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(|| job.start())) {
                tracing::error!(
                    job = %job.name(),
                    panic = %panic_message(&*payload),
                    "job escaped with a panic"
                );
            }
        }

        self.lock_control().state = WorkerState::Stopped;
        tracing::debug!("worker stopped");
    }
}

/// Un worker atado a su propio hilo del SO
pub struct WorkerThread {
    name: String,
    worker: Arc<Worker>,
    handle: Option<JoinHandle<()>>,
}

impl WorkerThread {
    /// Lanza `worker.run()` en un hilo nuevo con nombre
    pub fn spawn(name: impl Into<String>, worker: Worker) -> Result<Self> {
        let name = name.into();
        let worker = Arc::new(worker);
        let runner = Arc::clone(&worker);
        let handle = thread::Builder::new()
            .name(name.clone())
            .spawn(move || runner.run())?;

        Ok(Self {
            name,
            worker,
            handle: Some(handle),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn worker(&self) -> &Worker {
        &self.worker
    }

    pub fn stop(&self) {
        self.worker.stop();
    }

    /// Verifica si el hilo ya terminó
    pub fn is_finished(&self) -> bool {
        self.handle.as_ref().map_or(true, JoinHandle::is_finished)
    }

    /// Espera (sin timeout) a que el hilo termine
    pub fn join(mut self) -> Result<()> {
        match self.handle.take() {
            Some(handle) => handle.join().map_err(|_| JobsError::WorkerPanicked {
                name: self.name.clone(),
            }),
            None => Ok(()),
        }
    }

    /// Suelta el hilo sin esperarlo, como un hilo daemon
    pub(crate) fn detach(mut self) {
        self.worker.stop();
        self.handle.take();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::JobError;
    use serde_json::{json, Map, Value};
    use std::time::Instant;

    fn queue() -> Arc<TimedJoinQueue<Message>> {
        Arc::new(TimedJoinQueue::unbounded())
    }

    fn done(_: &[Value], _: &Map<String, Value>) -> std::result::Result<Value, JobError> {
        Ok(json!("done"))
    }

    #[test]
    fn test_poison_pill_stops_worker_after_jobs() {
        let queue = queue();
        let job = Arc::new(Job::new(done));
        queue.put(Message::Run(Arc::clone(&job)));
        queue.put(Message::PoisonPill);

        let worker_thread = WorkerThread::spawn("test-worker", Worker::new(Arc::clone(&queue), DEFAULT_POLL_INTERVAL)).unwrap();
        worker_thread.join().unwrap();

        assert_eq!(job.result(), Some(json!("done")));
        // El job no tiene bookkeeping: solo la pill se marcó como terminada
        assert_eq!(queue.unfinished(), 1);
    }

    #[test]
    fn test_stop_is_honored_within_poll_interval() {
        let queue = queue();
        let poll = Duration::from_millis(50);
        let worker_thread = WorkerThread::spawn("idle-worker", Worker::new(queue, poll)).unwrap();

        thread::sleep(Duration::from_millis(20));
        let start = Instant::now();
        worker_thread.stop();
        let worker = Arc::clone(&worker_thread.worker);
        assert_eq!(worker_thread.worker().poll_interval(), poll);
        worker_thread.join().unwrap();

        assert!(start.elapsed() < Duration::from_secs(2));
        assert_eq!(worker.state(), WorkerState::Stopped);
    }

    #[test]
    fn test_stop_before_run_exits_immediately() {
        let worker = Worker::new(queue(), DEFAULT_POLL_INTERVAL);
        worker.stop();
        worker.run();
        assert_eq!(worker.state(), WorkerState::Stopped);
    }

    #[test]
    fn test_stop_after_exit_keeps_stopped() {
        let queue = queue();
        queue.put(Message::PoisonPill);

        let worker_thread = WorkerThread::spawn("pill-worker", Worker::new(queue, DEFAULT_POLL_INTERVAL)).unwrap();
        assert_eq!(worker_thread.name(), "pill-worker");
        let worker = Arc::clone(&worker_thread.worker);
        while !worker_thread.is_finished() {
            thread::sleep(Duration::from_millis(5));
        }
        assert_eq!(worker.state(), WorkerState::Stopped);

        worker_thread.stop();
        assert_eq!(worker_thread.worker().state(), WorkerState::Stopped);
        worker_thread.join().unwrap();
        assert_eq!(worker.state(), WorkerState::Stopped);
    }

    #[test]
    fn test_worker_survives_handler_panic() {
        let queue = queue();
        let bad = Arc::new(Job::noop());
        bad.finished_event().handle(Arc::new(|_: &Job| panic!("handler failed")));
        let good = Arc::new(Job::noop());

        queue.put(Message::Run(Arc::clone(&bad)));
        queue.put(Message::Run(Arc::clone(&good)));
        queue.put(Message::PoisonPill);

        let worker_thread = WorkerThread::spawn("sturdy-worker", Worker::new(queue, DEFAULT_POLL_INTERVAL)).unwrap();
        worker_thread.join().unwrap();

        assert!(bad.is_finished());
        assert!(good.is_finished());
    }
}
