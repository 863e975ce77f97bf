//! # Estructura de Job
//! src/jobs/job.rs
//!
//! Un job envuelve un cuerpo ejecutable con sus argumentos, guarda el
//! resultado (o el error) y emite eventos en cada transición de su ciclo de
//! vida:
//!
//! ```text
//! Inited ──start()──> Running ──(ok | error)──> Finished
//! ```
//!
//! `Finished` es terminal haya éxito o fallo; el fallo se distingue por
//! `exception()`, no por un estado aparte.

use crate::error::JobError;
use crate::events::Event;
use serde::Serialize;
use serde_json::{Map, Value};
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// Estados posibles de un job
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum JobState {
    /// Creado, todavía no ejecutado
    Inited,

    /// Ejecutándose en algún worker
    Running,

    /// Terminado, con resultado o con error
    Finished,
}

impl JobState {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobState::Inited => "inited",
            JobState::Running => "running",
            JobState::Finished => "finished",
        }
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Cuerpo de un job.
///
/// Cualquier closure `Fn(&[Value], &Map<String, Value>) -> Result<Value, JobError>`
/// ya es un `Run`. Para "sobrescribir run", implementar el trait en un tipo propio.
pub trait Run: Send + Sync {
    fn run(&self, args: &[Value], kwargs: &Map<String, Value>) -> Result<Value, JobError>;

    /// Nombre mostrado en logs y en `Display`
    fn describe(&self) -> String {
        "run".to_string()
    }
}

impl<F> Run for F
where
    F: Fn(&[Value], &Map<String, Value>) -> Result<Value, JobError> + Send + Sync,
{
    fn run(&self, args: &[Value], kwargs: &Map<String, Value>) -> Result<Value, JobError> {
        self(args, kwargs)
    }

    fn describe(&self) -> String {
        std::any::type_name::<F>().to_string()
    }
}

/// Cuerpo por defecto cuando no se da ninguno: no hace nada
struct Noop;

impl Run for Noop {
    fn run(&self, _args: &[Value], _kwargs: &Map<String, Value>) -> Result<Value, JobError> {
        Ok(Value::Null)
    }

    fn describe(&self) -> String {
        "noop".to_string()
    }
}

/// Datos internos mutables del job
#[derive(Debug, Clone)]
struct JobData {
    state: JobState,
    result: Option<Value>,
    exception: Option<JobError>,
}

/// Representa un job individual.
///
/// Se comparte como `Arc<Job>`: la identidad es la del puntero. Solo el hilo
/// que ejecuta `start()` escribe los datos mutables; los demás deberían
/// leerlos después de `finished_event`.
pub struct Job {
    /// Cuerpo a ejecutar
    body: Arc<dyn Run>,

    /// Nombre para mostrar
    name: String,

    args: Vec<Value>,
    kwargs: Map<String, Value>,

    /// Datos mutables (protegidos por Mutex)
    data: Mutex<JobData>,

    running_event: Event<Job>,
    exception_event: Event<JobError>,
    finished_event: Event<Job>,
}

impl Job {
    /// Crea un nuevo job a partir de su cuerpo
    pub fn new(body: impl Run + 'static) -> Self {
        Self::from_body(Arc::new(body))
    }

    /// Job sin cuerpo: `start()` solo recorre el ciclo de vida
    pub fn noop() -> Self {
        Self::new(Noop)
    }

    fn from_body(body: Arc<dyn Run>) -> Self {
        Self {
            name: body.describe(),
            body,
            args: Vec::new(),
            kwargs: Map::new(),
            data: Mutex::new(JobData {
                state: JobState::Inited,
                result: None,
                exception: None,
            }),
            running_event: Event::new(),
            exception_event: Event::new(),
            finished_event: Event::new(),
        }
    }

    pub fn with_args(mut self, args: Vec<Value>) -> Self {
        self.args = args;
        self
    }

    pub fn with_kwargs(mut self, kwargs: Map<String, Value>) -> Self {
        self.kwargs = kwargs;
        self
    }

    /// Reemplaza el nombre que se muestra en logs y en `Display`
    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    fn data(&self) -> MutexGuard<'_, JobData> {
        self.data.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Ejecuta el job en el hilo actual.
    ///
    /// Orden garantizado:
    /// 1. estado `Running` y `running_event`
    /// 2. ejecución del cuerpo
    /// 3. `result`, o `exception` + log + `exception_event`
    /// 4. estado `Finished` y, por último, `finished_event`
    ///
    /// Un error (o panic) del cuerpo nunca sale de aquí. Un panic dentro de
    /// un handler sí sale.
    pub fn start(&self) {
        {
            let mut data = self.data();
            data.state = JobState::Running;
            data.result = None;
            data.exception = None;
        }
        self.running_event.invoke(self);

        let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
            self.body.run(&self.args, &self.kwargs)
        }))
        .unwrap_or_else(|payload| Err(JobError::Panicked(panic_message(&*payload))));

        match outcome {
            Ok(value) => {
                self.data().result = Some(value);
            }
            Err(error) => {
                tracing::error!(job = %self.name, error = %error, "job raised an error");
                self.data().exception = Some(error.clone());
                self.exception_event.invoke(&error);
            }
        }

        self.data().state = JobState::Finished;
        self.finished_event.invoke(self);
    }

    /// Copia superficial: comparte el cuerpo, copia args/kwargs y arranca con
    /// estado nuevo y sin handlers registrados.
    pub fn duplicate(&self) -> Self {
        Self::from_body(Arc::clone(&self.body))
            .named(self.name.clone())
            .with_args(self.args.clone())
            .with_kwargs(self.kwargs.clone())
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn args(&self) -> &[Value] {
        &self.args
    }

    pub fn kwargs(&self) -> &Map<String, Value> {
        &self.kwargs
    }

    /// Obtiene el estado actual
    pub fn state(&self) -> JobState {
        self.data().state
    }

    pub fn is_finished(&self) -> bool {
        self.state() == JobState::Finished
    }

    /// Valor devuelto por el cuerpo (`None` hasta terminar o si falló)
    pub fn result(&self) -> Option<Value> {
        self.data().result.clone()
    }

    /// Error del cuerpo (`None` si no falló)
    pub fn exception(&self) -> Option<JobError> {
        self.data().exception.clone()
    }

    /// Se emite al pasar a `Running`
    pub fn running_event(&self) -> &Event<Job> {
        &self.running_event
    }

    /// Se emite con el error capturado, antes de `finished_event`
    pub fn exception_event(&self) -> &Event<JobError> {
        &self.exception_event
    }

    /// Se emite exactamente una vez por `start()`, con todo ya actualizado
    pub fn finished_event(&self) -> &Event<Job> {
        &self.finished_event
    }

    /// Foto serializable del job
    pub fn snapshot(&self) -> JobSnapshot {
        let data = self.data().clone();
        JobSnapshot {
            name: self.name.clone(),
            args: self.args.clone(),
            kwargs: self.kwargs.clone(),
            state: data.state,
            result: data.result,
            exception: data.exception.map(|e| e.to_string()),
        }
    }
}

impl Default for Job {
    fn default() -> Self {
        Self::noop()
    }
}

impl fmt::Display for Job {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let data = self.data().clone();
        let result = match (&data.state, &data.result) {
            (JobState::Finished, Some(value)) => value.to_string(),
            (JobState::Finished, None) => "None".to_string(),
            _ => "<pending>".to_string(),
        };
        write!(
            f,
            "Job(target={}, args={}, kwargs={}, result={}, state={})",
            self.name,
            Value::Array(self.args.clone()),
            Value::Object(self.kwargs.clone()),
            result,
            data.state
        )
    }
}

impl fmt::Debug for Job {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let data = self.data().clone();
        f.debug_struct("Job")
            .field("name", &self.name)
            .field("args", &self.args)
            .field("kwargs", &self.kwargs)
            .field("state", &data.state)
            .field("result", &data.result)
            .field("exception", &data.exception)
            .finish()
    }
}

/// Datos de un job listos para serializar
#[derive(Debug, Clone, Serialize)]
pub struct JobSnapshot {
    pub name: String,
    pub args: Vec<Value>,
    pub kwargs: Map<String, Value>,
    pub state: JobState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exception: Option<String>,
}

/// Extrae el mensaje del payload de un panic
pub(crate) fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
