//! # Coordinador de un lote de jobs
//! src/jobs/set.rs
//!
//! `JobsSet` es dueño de la cola y del pool de workers. Se entera de que los
//! jobs terminan solo por eventos: a cada job le cuelga un handler de
//! bookkeeping en su `finished_event` que hace `task_done()` y, si la cola
//! queda sin trabajo pendiente, marca "all done".
//!
//! Uso típico:
//!
//! ```ignore
//! let mut set = JobsSet::new(JobsSetConfig::default());
//! set.add_jobs(jobs, true)?;
//! set.start(Some(4))?;
//! set.join(Some(Duration::from_secs(5)))?;
//! ```
//!
//! Un set se usa una sola vez: después de `join()` no se puede reutilizar.

use crate::config::Config;
use crate::error::{JobsError, Result};
use crate::events::Handler;
use crate::jobs::job::{Job, JobState};
use crate::jobs::queue::{QueueStats, TimedJoinQueue};
use crate::jobs::worker::{Message, Worker, WorkerThread, DEFAULT_POLL_INTERVAL};
use serde::Serialize;
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

/// Configuración de un `JobsSet`
#[derive(Debug, Clone)]
pub struct JobsSetConfig {
    /// Capacidad máxima de la cola (`None` = sin límite)
    pub max_capacity: Option<usize>,

    /// Número de workers. `None` = tantos como jobs haya encolados al llamar
    /// a `start()` (una sola foto, no se reajusta después).
    pub workers: Option<usize>,

    /// Cada cuánto revisa un worker ocioso si le pidieron parar
    pub poll_interval: Duration,
}

impl Default for JobsSetConfig {
    fn default() -> Self {
        Self {
            max_capacity: None,
            workers: None,
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }
}

impl JobsSetConfig {
    /// Crea una configuración desde el Config principal
    pub fn from_config(config: &Config) -> Self {
        Self {
            max_capacity: (config.queue_capacity > 0).then_some(config.queue_capacity),
            workers: config.workers,
            poll_interval: config.poll_interval(),
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct DoneFlags {
    all_done: bool,
    any_done: bool,
}

/// Banderas de progreso con su condvar
struct Progress {
    flags: Mutex<DoneFlags>,
    changed: Condvar,
}

impl Progress {
    fn new() -> Self {
        Self {
            // Sin jobs no hay nada pendiente
            flags: Mutex::new(DoneFlags {
                all_done: true,
                any_done: false,
            }),
            changed: Condvar::new(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, DoneFlags> {
        self.flags.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn update(&self, f: impl FnOnce(&mut DoneFlags)) {
        let mut flags = self.lock();
        f(&mut flags);
        drop(flags);
        self.changed.notify_all();
    }

    /// Espera a que `done` sea verdadero; `false` si venció el timeout antes
    fn wait_for(&self, timeout: Option<Duration>, done: impl Fn(&DoneFlags) -> bool) -> bool {
        let flags = self.lock();
        match timeout {
            None => {
                let flags = self
                    .changed
                    .wait_while(flags, |f| !done(&*f))
                    .unwrap_or_else(PoisonError::into_inner);
                done(&flags)
            }
            Some(timeout) => {
                let (flags, _) = self
                    .changed
                    .wait_timeout_while(flags, timeout, |f| !done(&*f))
                    .unwrap_or_else(PoisonError::into_inner);
                done(&flags)
            }
        }
    }
}

/// Dueño de una cola y de un pool de workers que ejecutan jobs
pub struct JobsSet {
    config: JobsSetConfig,

    queue: Arc<TimedJoinQueue<Message>>,

    workers: Vec<WorkerThread>,

    /// Cantidad resuelta en `start()`
    worker_count: Option<usize>,

    progress: Arc<Progress>,

    /// Jobs aceptados, en orden de llegada
    jobs: Mutex<Vec<Arc<Job>>>,

    /// Bookkeeping: `task_done` + recalcular "all done"
    on_job_finished: Handler<Job>,

    /// Marca "any done"
    on_any_done: Handler<Job>,

    joined: bool,
}

impl JobsSet {
    /// Crea un set nuevo. Los workers no arrancan hasta `start()`.
    pub fn new(config: JobsSetConfig) -> Self {
        let queue = Arc::new(TimedJoinQueue::with_capacity(config.max_capacity));
        let progress = Arc::new(Progress::new());

        let on_job_finished: Handler<Job> = {
            let queue = Arc::clone(&queue);
            let progress = Arc::clone(&progress);
            Arc::new(move |job: &Job| {
                if let Err(e) = queue.task_done() {
                    tracing::warn!(job = %job.name(), error = %e, "job finished more times than queued");
                }
                refresh_all_done(&queue, &progress);
            })
        };

        let on_any_done: Handler<Job> = {
            let progress = Arc::clone(&progress);
            Arc::new(move |_: &Job| progress.update(|f| f.any_done = true))
        };

        Self {
            config,
            queue,
            workers: Vec::new(),
            worker_count: None,
            progress,
            jobs: Mutex::new(Vec::new()),
            on_job_finished,
            on_any_done,
            joined: false,
        }
    }

    /// Set con cola acotada y el resto de la configuración por defecto
    pub fn bounded(max_capacity: usize) -> Self {
        Self::new(JobsSetConfig {
            max_capacity: Some(max_capacity),
            ..JobsSetConfig::default()
        })
    }

    /// Encola varios jobs (ver `add_job`)
    pub fn add_jobs<I>(&self, jobs: I, block: bool) -> Result<()>
    where
        I: IntoIterator<Item = Arc<Job>>,
    {
        for job in jobs {
            self.add_job(job, block)?;
        }
        Ok(())
    }

    /// Encola un job y le registra los handlers de bookkeeping.
    ///
    /// Con `block = false` no espera espacio: si la cola está llena retorna
    /// `JobsError::QueueFull` y el job queda como estaba.
    ///
    /// Los handlers se registran ANTES de encolar, así un worker rápido no
    /// puede terminar el job antes de que el set se entere.
    pub fn add_job(&self, job: Arc<Job>, block: bool) -> Result<()> {
        if self.joined {
            return Err(JobsError::AlreadyJoined);
        }

        // Un job que ya está en la cola conserva sus handlers aunque este
        // intento falle
        let already_tracked = job.finished_event().is_handled(&self.on_job_finished);
        job.finished_event()
            .handle(Arc::clone(&self.on_job_finished))
            .handle(Arc::clone(&self.on_any_done));

        self.progress.update(|f| f.all_done = false);

        let message = Message::Run(Arc::clone(&job));
        let queued = if block {
            self.queue.put(message);
            Ok(())
        } else {
            self.queue.try_put(message)
        };

        if let Err(e) = queued {
            if !already_tracked {
                let _ = job.finished_event().unhandle(&self.on_job_finished);
                let _ = job.finished_event().unhandle(&self.on_any_done);
            }
            refresh_all_done(&self.queue, &self.progress);
            return Err(e);
        }

        refresh_all_done(&self.queue, &self.progress);
        self.lock_jobs().push(job);
        Ok(())
    }

    fn lock_jobs(&self) -> MutexGuard<'_, Vec<Arc<Job>>> {
        self.jobs.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Arranca el pool.
    ///
    /// La cantidad de workers se resuelve una sola vez: `workers` si se da,
    /// si no la de la configuración, y si tampoco hay, la cantidad de jobs
    /// encolados en este momento. Retorna la cantidad lanzada.
    pub fn start(&mut self, workers: Option<usize>) -> Result<usize> {
        if self.joined {
            return Err(JobsError::AlreadyJoined);
        }
        if self.worker_count.is_some() {
            return Err(JobsError::AlreadyStarted);
        }

        let count = workers
            .or(self.config.workers)
            .unwrap_or_else(|| self.queue.len());

        let mut spawned = Vec::with_capacity(count);
        for i in 0..count {
            let worker = Worker::new(Arc::clone(&self.queue), self.config.poll_interval);
            match WorkerThread::spawn(format!("jobs-worker-{}", i), worker) {
                Ok(thread) => {
                    tracing::debug!(worker = %thread.name(), "worker spawned");
                    spawned.push(thread);
                }
                Err(e) => {
                    // Pool parcial: se suelta y el set queda sin arrancar
                    for thread in spawned {
                        thread.detach();
                    }
                    return Err(e);
                }
            }
        }
        self.workers = spawned;
        self.worker_count = Some(count);

        tracing::info!(workers = count, queued = self.queue.len(), "jobs set started");
        Ok(count)
    }

    /// "All done": no queda ningún item sin terminar en la cola
    pub fn all_done(&self) -> bool {
        self.progress.lock().all_done
    }

    /// "Any done": al menos un job terminó
    pub fn any_done(&self) -> bool {
        self.progress.lock().any_done
    }

    /// Espera a que todos los jobs terminen.
    ///
    /// Retorna `false` si venció el timeout antes.
    pub fn wait_until_all_done(&self, timeout: Option<Duration>) -> bool {
        self.progress.wait_for(timeout, |f| f.all_done)
    }

    /// Espera a que termine al menos un job.
    ///
    /// Retorna `true` si se observó la bandera, `false` si venció el timeout.
    pub fn wait_until_any_done(&self, timeout: Option<Duration>) -> bool {
        self.progress.wait_for(timeout, |f| f.any_done)
    }

    /// Cierre en dos fases.
    ///
    /// 1. Espera (con `timeout`) a que la cola no tenga items pendientes. Si
    ///    vence, retorna `JobsError::Timeout` y deja workers y jobs vivos;
    ///    se puede volver a llamar.
    /// 2. Pide `stop()` a cada worker y espera, sin timeout, a que todos los
    ///    hilos terminen. Ningún worker se corta a mitad de un job.
    pub fn join(&mut self, timeout: Option<Duration>) -> Result<()> {
        if self.joined {
            return Err(JobsError::AlreadyJoined);
        }

        tracing::info!(
            ?timeout,
            unfinished = self.queue.unfinished(),
            "waiting for jobs to finish"
        );
        self.queue.join(timeout)?;

        tracing::debug!(workers = self.workers.len(), "stopping workers");
        for worker in &self.workers {
            worker.stop();
        }

        let mut first_error = None;
        for worker in self.workers.drain(..) {
            if let Err(e) = worker.join() {
                tracing::error!(error = %e, "worker thread ended abnormally");
                first_error.get_or_insert(e);
            }
        }

        self.joined = true;
        tracing::info!("jobs set joined");
        first_error.map_or(Ok(()), Err)
    }

    /// Llena la cola con copias de `job` hasta que reporte estar llena.
    ///
    /// Retorna las copias efectivamente encoladas: sirve para descubrir la
    /// capacidad de una cola acotada sin conocerla de antemano.
    pub fn fill_queue(&self, job: &Job) -> Result<Vec<Arc<Job>>> {
        if self.queue.max_capacity().is_none() {
            return Err(JobsError::UnboundedQueue);
        }

        let mut clones = Vec::new();
        loop {
            let clone = Arc::new(job.duplicate());
            match self.add_job(Arc::clone(&clone), false) {
                Ok(()) => clones.push(clone),
                Err(JobsError::QueueFull { .. }) => break,
                Err(e) => return Err(e),
            }
        }
        Ok(clones)
    }

    /// Jobs aceptados, en orden de llegada
    pub fn jobs(&self) -> Vec<Arc<Job>> {
        self.lock_jobs().clone()
    }

    /// Cantidad de workers resuelta en `start()` (`None` si no arrancó)
    pub fn worker_count(&self) -> Option<usize> {
        self.worker_count
    }

    /// Items encolados cuyo job aún no terminó
    pub fn unfinished(&self) -> usize {
        self.queue.unfinished()
    }

    pub fn is_joined(&self) -> bool {
        self.joined
    }

    /// Obtiene estadísticas del set
    pub fn stats(&self) -> JobsSetStats {
        let jobs = self.lock_jobs();
        let finished: Vec<_> = jobs.iter().filter(|j| j.state() == JobState::Finished).collect();
        let failed = finished.iter().filter(|j| j.exception().is_some()).count();
        let flags = *self.progress.lock();

        JobsSetStats {
            submitted: jobs.len(),
            running: jobs.iter().filter(|j| j.state() == JobState::Running).count(),
            finished: finished.len(),
            failed,
            workers: self.worker_count,
            live_workers: self.workers.iter().filter(|w| !w.is_finished()).count(),
            queue: self.queue.stats(),
            all_done: flags.all_done,
            any_done: flags.any_done,
        }
    }
}

impl Drop for JobsSet {
    fn drop(&mut self) {
        // Sin join(): se pide stop y los hilos quedan sueltos, como daemons
        for worker in self.workers.drain(..) {
            worker.detach();
        }
    }
}

/// Recalcula "all done" a partir del contador de la cola
fn refresh_all_done(queue: &TimedJoinQueue<Message>, progress: &Progress) {
    progress.update(|f| f.all_done = queue.unfinished() == 0);
}

/// Estadísticas de un set
#[derive(Debug, Clone, Serialize)]
pub struct JobsSetStats {
    pub submitted: usize,
    pub running: usize,
    pub finished: usize,
    pub failed: usize,
    pub workers: Option<usize>,
    pub live_workers: usize,
    pub queue: QueueStats,
    pub all_done: bool,
    pub any_done: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::JobError;
    use serde_json::{json, Map, Value};
    use std::thread;

    fn quick(_: &[Value], _: &Map<String, Value>) -> std::result::Result<Value, JobError> {
        Ok(json!(1))
    }

    fn slow(_: &[Value], _: &Map<String, Value>) -> std::result::Result<Value, JobError> {
        thread::sleep(Duration::from_millis(200));
        Ok(json!("slow"))
    }

    fn fast_config() -> JobsSetConfig {
        JobsSetConfig {
            poll_interval: Duration::from_millis(20),
            ..JobsSetConfig::default()
        }
    }

    #[test]
    fn test_empty_set_is_all_done() {
        let mut set = JobsSet::new(fast_config());
        assert!(set.all_done());
        assert!(!set.any_done());
        assert_eq!(set.start(None).unwrap(), 0);
        assert!(set.join(Some(Duration::from_millis(100))).is_ok());
    }

    #[test]
    fn test_worker_count_defaults_to_queued_jobs() {
        let mut set = JobsSet::new(fast_config());
        set.add_jobs((0..3).map(|_| Arc::new(Job::new(quick))), true).unwrap();
        assert!(!set.all_done());

        assert_eq!(set.start(None).unwrap(), 3);
        assert_eq!(set.worker_count(), Some(3));
        set.join(Some(Duration::from_secs(5))).unwrap();
        assert!(set.all_done());
    }

    #[test]
    fn test_explicit_worker_count_beats_config() {
        let mut set = JobsSet::new(JobsSetConfig {
            workers: Some(4),
            ..fast_config()
        });
        set.add_job(Arc::new(Job::new(quick)), true).unwrap();
        assert_eq!(set.start(Some(2)).unwrap(), 2);
        set.join(None).unwrap();
    }

    #[test]
    fn test_start_twice_fails() {
        let mut set = JobsSet::new(fast_config());
        set.start(Some(1)).unwrap();
        assert!(matches!(set.start(Some(1)), Err(JobsError::AlreadyStarted)));
        set.join(None).unwrap();
        assert!(matches!(set.start(Some(1)), Err(JobsError::AlreadyJoined)));
        assert!(matches!(
            set.add_job(Arc::new(Job::noop()), true),
            Err(JobsError::AlreadyJoined)
        ));
    }

    #[test]
    fn test_wait_until_any_done() {
        let mut set = JobsSet::new(fast_config());
        set.add_jobs(vec![Arc::new(Job::new(quick)), Arc::new(Job::new(slow))], true)
            .unwrap();

        // Sin workers nada avanza
        assert!(!set.wait_until_any_done(Some(Duration::from_millis(30))));

        set.start(Some(2)).unwrap();
        assert!(set.wait_until_any_done(Some(Duration::from_secs(5))));
        assert!(set.wait_until_all_done(Some(Duration::from_secs(5))));
        set.join(None).unwrap();
    }

    #[test]
    fn test_join_timeout_then_retry() {
        let mut set = JobsSet::new(fast_config());
        set.add_job(Arc::new(Job::new(slow)), true).unwrap();
        set.start(Some(1)).unwrap();

        assert!(matches!(
            set.join(Some(Duration::from_millis(10))),
            Err(JobsError::Timeout { .. })
        ));
        assert!(!set.is_joined());
        assert!(set.join(Some(Duration::from_secs(5))).is_ok());
        assert!(set.is_joined());
    }

    #[test]
    fn test_failed_readd_keeps_bookkeeping() {
        let mut set = JobsSet::new(JobsSetConfig {
            max_capacity: Some(1),
            ..fast_config()
        });
        let job = Arc::new(Job::new(quick));
        set.add_job(Arc::clone(&job), true).unwrap();

        // Cola llena: el reintento falla pero el job encolado sigue rastreado
        assert!(matches!(
            set.add_job(Arc::clone(&job), false),
            Err(JobsError::QueueFull { capacity: 1 })
        ));
        assert_eq!(job.finished_event().len(), 2);

        set.start(Some(1)).unwrap();
        set.join(Some(Duration::from_secs(5))).unwrap();
        assert!(set.all_done());
        assert_eq!(set.unfinished(), 0);
    }

    #[test]
    fn test_bounded_set_fill_queue() {
        let set = JobsSet::bounded(3);
        let clones = set.fill_queue(&Job::noop()).unwrap();
        assert_eq!(clones.len(), 3);
        assert_eq!(set.stats().queue.capacity, Some(3));
        assert_eq!(set.worker_count(), None);
    }

    #[test]
    fn test_fill_queue_requires_bound() {
        let set = JobsSet::new(fast_config());
        assert!(matches!(
            set.fill_queue(&Job::noop()),
            Err(JobsError::UnboundedQueue)
        ));
    }

    #[test]
    fn test_stats_after_join() {
        let mut set = JobsSet::new(fast_config());
        let failing = Job::new(|_: &[Value], _: &Map<String, Value>| -> std::result::Result<Value, JobError> {
            Err(JobError::failed("nope"))
        });
        set.add_jobs(vec![Arc::new(Job::new(quick)), Arc::new(failing)], true)
            .unwrap();
        set.start(Some(2)).unwrap();
        set.join(Some(Duration::from_secs(5))).unwrap();

        let stats = set.stats();
        assert_eq!(stats.submitted, 2);
        assert_eq!(stats.finished, 2);
        assert_eq!(stats.failed, 1);
        assert_eq!(stats.live_workers, 0);
        assert!(stats.all_done && stats.any_done);

        let json = serde_json::to_value(&stats).unwrap();
        assert_eq!(json["queue"]["unfinished"], 0);
    }
}
