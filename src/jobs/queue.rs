//! # Cola FIFO con join temporizado
//! src/jobs/queue.rs
//!
//! Cola thread-safe productor/consumidor (varios productores, varios
//! consumidores) que además lleva la cuenta de items "sin terminar":
//! cada `put` la incrementa y cada `task_done` la decrementa. `join` espera
//! a que esa cuenta llegue a cero, opcionalmente con un timeout.

use crate::error::{JobsError, Result};
use serde::Serialize;
use std::collections::VecDeque;
use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

/// Estado interno protegido por un único Mutex
struct QueueState<T> {
    items: VecDeque<T>,

    /// Items encolados cuyo `task_done` aún no llegó
    unfinished: usize,
}

/// Cola FIFO acotada (u opcionalmente sin límite) con `join(timeout)`
pub struct TimedJoinQueue<T> {
    state: Mutex<QueueState<T>>,

    /// Notifica a consumidores cuando hay items
    not_empty: Condvar,

    /// Notifica a productores cuando se libera espacio
    not_full: Condvar,

    /// Notifica a los que esperan en `join` cuando `unfinished` llega a 0
    all_tasks_done: Condvar,

    /// `None` = sin límite
    max_capacity: Option<usize>,
}

impl<T> TimedJoinQueue<T> {
    /// Cola con capacidad máxima. Una capacidad 0 se trata como sin límite.
    pub fn bounded(max_capacity: usize) -> Self {
        Self::with_capacity((max_capacity > 0).then_some(max_capacity))
    }

    pub fn unbounded() -> Self {
        Self::with_capacity(None)
    }

    pub fn with_capacity(max_capacity: Option<usize>) -> Self {
        Self {
            state: Mutex::new(QueueState {
                items: VecDeque::new(),
                unfinished: 0,
            }),
            not_empty: Condvar::new(),
            not_full: Condvar::new(),
            all_tasks_done: Condvar::new(),
            max_capacity,
        }
    }

    fn lock(&self) -> MutexGuard<'_, QueueState<T>> {
        // Nunca se ejecuta código ajeno con el lock tomado
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn full(&self, state: &QueueState<T>) -> bool {
        self.max_capacity.is_some_and(|cap| state.items.len() >= cap)
    }

    fn push(&self, mut state: MutexGuard<'_, QueueState<T>>, item: T) {
        state.items.push_back(item);
        state.unfinished += 1;
        drop(state);
        self.not_empty.notify_one();
    }

    fn pop(&self, mut state: MutexGuard<'_, QueueState<T>>) -> Option<T> {
        let item = state.items.pop_front();
        drop(state);
        if item.is_some() {
            self.not_full.notify_one();
        }
        item
    }

    /// Encola un item, bloqueando mientras la cola esté llena
    pub fn put(&self, item: T) {
        let mut state = self.lock();
        while self.full(&state) {
            state = self.not_full.wait(state).unwrap_or_else(PoisonError::into_inner);
        }
        self.push(state, item);
    }

    /// Encola un item esperando como mucho `timeout` a que haya espacio
    pub fn put_timeout(&self, item: T, timeout: Duration) -> Result<()> {
        let state = self.lock();
        let (state, wait) = self
            .not_full
            .wait_timeout_while(state, timeout, |s| self.full(s))
            .unwrap_or_else(PoisonError::into_inner);

        if wait.timed_out() && self.full(&state) {
            return Err(self.full_error());
        }
        self.push(state, item);
        Ok(())
    }

    /// Encola sin bloquear.
    ///
    /// Retorna `JobsError::QueueFull` si la cola está llena; el item se descarta.
    pub fn try_put(&self, item: T) -> Result<()> {
        let state = self.lock();
        if self.full(&state) {
            return Err(self.full_error());
        }
        self.push(state, item);
        Ok(())
    }

    fn full_error(&self) -> JobsError {
        JobsError::QueueFull {
            capacity: self.max_capacity.unwrap_or(usize::MAX),
        }
    }

    /// Desencola el item más antiguo, bloqueando hasta que haya uno
    pub fn get(&self) -> T {
        let mut state = self.lock();
        loop {
            if let Some(item) = state.items.pop_front() {
                drop(state);
                self.not_full.notify_one();
                return item;
            }
            state = self.not_empty.wait(state).unwrap_or_else(PoisonError::into_inner);
        }
    }

    /// Desencola esperando como mucho `timeout`.
    ///
    /// Retorna `None` si la cola siguió vacía durante toda la espera.
    pub fn get_timeout(&self, timeout: Duration) -> Option<T> {
        let state = self.lock();
        let (state, _) = self
            .not_empty
            .wait_timeout_while(state, timeout, |s| s.items.is_empty())
            .unwrap_or_else(PoisonError::into_inner);
        self.pop(state)
    }

    /// Desencola sin bloquear
    pub fn try_get(&self) -> Option<T> {
        let state = self.lock();
        self.pop(state)
    }

    /// Marca como terminado un item obtenido antes con `get`.
    ///
    /// Al llegar a cero despierta a todos los hilos bloqueados en `join`.
    pub fn task_done(&self) -> Result<()> {
        let mut state = self.lock();
        if state.unfinished == 0 {
            return Err(JobsError::TaskDoneUnderflow);
        }
        state.unfinished -= 1;
        if state.unfinished == 0 {
            self.all_tasks_done.notify_all();
        }
        Ok(())
    }

    /// Espera a que todos los items encolados estén terminados.
    ///
    /// Con `None` espera indefinidamente. Con `Some(timeout)` retorna
    /// `JobsError::Timeout` si al vencer el plazo quedan items sin terminar.
    /// El timeout no cancela nada: solo informa que la espera no alcanzó.
    pub fn join(&self, timeout: Option<Duration>) -> Result<()> {
        let mut state = self.lock();
        match timeout {
            None => {
                while state.unfinished > 0 {
                    state = self
                        .all_tasks_done
                        .wait(state)
                        .unwrap_or_else(PoisonError::into_inner);
                }
                Ok(())
            }
            Some(timeout) => {
                let deadline = Instant::now() + timeout;
                while state.unfinished > 0 {
                    let remaining = deadline.saturating_duration_since(Instant::now());
                    if remaining.is_zero() {
                        return Err(JobsError::Timeout { timeout });
                    }
                    state = self
                        .all_tasks_done
                        .wait_timeout(state, remaining)
                        .unwrap_or_else(PoisonError::into_inner)
                        .0;
                }
                Ok(())
            }
        }
    }

    /// Items actualmente en la cola (no incluye los que se están ejecutando)
    pub fn len(&self) -> usize {
        self.lock().items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_full(&self) -> bool {
        let state = self.lock();
        self.full(&state)
    }

    /// Items encolados cuyo `task_done` aún no llegó
    pub fn unfinished(&self) -> usize {
        self.lock().unfinished
    }

    pub fn max_capacity(&self) -> Option<usize> {
        self.max_capacity
    }

    /// Obtiene estadísticas de la cola
    pub fn stats(&self) -> QueueStats {
        let state = self.lock();
        QueueStats {
            queued: state.items.len(),
            unfinished: state.unfinished,
            capacity: self.max_capacity,
        }
    }
}

/// Estadísticas de una cola
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct QueueStats {
    pub queued: usize,
    pub unfinished: usize,
    pub capacity: Option<usize>,
}
