//! # Eventos
//! src/events.rs
//!
//! Primitiva mínima de observador:
//! - `Event`: fan-out a todos los handlers, sin agregar resultados.
//! - `ReturnableEvent`: un único respondedor que devuelve un valor.
//!
//! La identidad de un handler es la del `Arc` que lo envuelve: registrar dos
//! veces el mismo `Arc` (o un clon suyo) no tiene efecto.
//!
//! Un handler que hace panic NO se aísla: el panic sale de `invoke` y los
//! handlers restantes no se llaman.

use crate::error::{JobsError, Result};
use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};

/// Handler de un `Event`
pub type Handler<A> = Arc<dyn Fn(&A) + Send + Sync>;

/// Handler de un `ReturnableEvent`
pub type ReturningHandler<A, R> = Arc<dyn Fn(&A) -> R + Send + Sync>;

fn same_handler<T: ?Sized>(a: &Arc<T>, b: &Arc<T>) -> bool {
    // Solo el puntero de datos; los vtables pueden duplicarse entre unidades
    std::ptr::eq(Arc::as_ptr(a) as *const (), Arc::as_ptr(b) as *const ())
}

/// Registro thread-safe de handlers, compartido por ambos tipos de evento
struct Registry<H: ?Sized> {
    handlers: Mutex<Vec<Arc<H>>>,
}

impl<H: ?Sized> Registry<H> {
    fn new() -> Self {
        Self { handlers: Mutex::new(Vec::new()) }
    }

    fn add(&self, handler: Arc<H>) {
        let mut handlers = self.handlers.lock().unwrap_or_else(PoisonError::into_inner);
        if !handlers.iter().any(|h| same_handler(h, &handler)) {
            handlers.push(handler);
        }
    }

    fn contains(&self, handler: &Arc<H>) -> bool {
        self.handlers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .any(|h| same_handler(h, handler))
    }

    fn remove(&self, handler: &Arc<H>) -> Result<()> {
        let mut handlers = self.handlers.lock().unwrap_or_else(PoisonError::into_inner);
        let idx = handlers
            .iter()
            .position(|h| same_handler(h, handler))
            .ok_or(JobsError::HandlerNotRegistered)?;
        handlers.remove(idx);
        Ok(())
    }

    /// Copia de la lista para invocar sin sostener el lock
    fn snapshot(&self) -> Vec<Arc<H>> {
        self.handlers.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    fn first(&self) -> Option<Arc<H>> {
        self.handlers.lock().unwrap_or_else(PoisonError::into_inner).first().cloned()
    }

    fn len(&self) -> usize {
        self.handlers.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    fn clear(&self) {
        self.handlers.lock().unwrap_or_else(PoisonError::into_inner).clear();
    }
}

/// Evento multicast: `invoke` llama a cada handler registrado
pub struct Event<A> {
    registry: Registry<dyn Fn(&A) + Send + Sync>,
}

impl<A> Event<A> {
    pub fn new() -> Self {
        Self { registry: Registry::new() }
    }

    /// Registra un handler. Registrar el mismo handler dos veces no hace nada.
    /// Devuelve `&Self` para encadenar.
    pub fn handle(&self, handler: Handler<A>) -> &Self {
        self.registry.add(handler);
        self
    }

    /// Quita un handler; falla si nunca se registró
    pub fn unhandle(&self, handler: &Handler<A>) -> Result<()> {
        self.registry.remove(handler)
    }

    /// Verifica si el handler ya está registrado
    pub fn is_handled(&self, handler: &Handler<A>) -> bool {
        self.registry.contains(handler)
    }

    /// Llama a cada handler en orden de registro.
    ///
    /// La lista se copia antes de invocar, así un handler puede registrar o
    /// quitar handlers (incluido él mismo) sin deadlock.
    pub fn invoke(&self, payload: &A) {
        for handler in self.registry.snapshot() {
            handler(payload);
        }
    }

    /// Cantidad de handlers registrados
    pub fn len(&self) -> usize {
        self.registry.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        self.registry.clear();
    }
}

impl<A> Default for Event<A> {
    fn default() -> Self {
        Self::new()
    }
}

impl<A> fmt::Debug for Event<A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Event").field("handlers", &self.len()).finish()
    }
}

/// Evento de un solo respondedor: `invoke` llama al primer handler y devuelve
/// su valor. Pensado para tener exactamente un handler.
pub struct ReturnableEvent<A, R> {
    registry: Registry<dyn Fn(&A) -> R + Send + Sync>,
}

impl<A, R> ReturnableEvent<A, R> {
    pub fn new() -> Self {
        Self { registry: Registry::new() }
    }

    pub fn handle(&self, handler: ReturningHandler<A, R>) -> &Self {
        self.registry.add(handler);
        self
    }

    pub fn unhandle(&self, handler: &ReturningHandler<A, R>) -> Result<()> {
        self.registry.remove(handler)
    }

    /// Valor del primer handler, o `None` si no hay ninguno
    pub fn invoke(&self, payload: &A) -> Option<R> {
        self.registry.first().map(|handler| handler(payload))
    }

    pub fn len(&self) -> usize {
        self.registry.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<A, R> Default for ReturnableEvent<A, R> {
    fn default() -> Self {
        Self::new()
    }
}

impl<A, R> fmt::Debug for ReturnableEvent<A, R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReturnableEvent").field("handlers", &self.len()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn counter() -> (Arc<AtomicUsize>, Handler<()>) {
        let count = Arc::new(AtomicUsize::new(0));
        let c = Arc::clone(&count);
        let handler: Handler<()> = Arc::new(move |_: &()| {
            c.fetch_add(1, Ordering::SeqCst);
        });
        (count, handler)
    }

    #[test]
    fn test_invoke_calls_every_handler_then_unhandle() {
        let event = Event::new();
        let (c1, h1) = counter();
        let (c2, h2) = counter();
        event.handle(Arc::clone(&h1)).handle(Arc::clone(&h2));

        event.invoke(&());
        assert_eq!(c1.load(Ordering::SeqCst), 1);
        assert_eq!(c2.load(Ordering::SeqCst), 1);

        event.unhandle(&h1).unwrap();
        event.invoke(&());
        assert_eq!(c1.load(Ordering::SeqCst), 1);
        assert_eq!(c2.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_duplicate_handle_is_noop() {
        let event = Event::new();
        let (count, h) = counter();
        assert!(!event.is_handled(&h));
        event.handle(Arc::clone(&h));
        event.handle(Arc::clone(&h));
        assert_eq!(event.len(), 1);
        assert!(event.is_handled(&h));

        event.invoke(&());
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_unhandle_unknown_fails() {
        let event: Event<()> = Event::new();
        let (_, h) = counter();
        assert!(matches!(event.unhandle(&h), Err(JobsError::HandlerNotRegistered)));
    }

    #[test]
    fn test_handler_may_unhandle_itself() {
        let event: Arc<Event<()>> = Arc::new(Event::new());
        let slot: Arc<Mutex<Option<Handler<()>>>> = Arc::new(Mutex::new(None));

        let ev = Arc::clone(&event);
        let me = Arc::clone(&slot);
        let once: Handler<()> = Arc::new(move |_: &()| {
            if let Some(h) = me.lock().unwrap().take() {
                ev.unhandle(&h).unwrap();
            }
        });
        *slot.lock().unwrap() = Some(Arc::clone(&once));
        event.handle(once);

        event.invoke(&());
        assert!(event.is_empty());
    }

    #[test]
    fn test_handler_panic_stops_delivery() {
        let event = Event::new();
        let boom: Handler<()> = Arc::new(|_: &()| panic!("handler failed"));
        let (count, after) = counter();
        event.handle(boom).handle(after);

        let outcome = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| event.invoke(&())));
        assert!(outcome.is_err());
        assert_eq!(count.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_returnable_event_uses_first_handler() {
        let event: ReturnableEvent<u32, u32> = ReturnableEvent::new();
        assert_eq!(event.invoke(&1), None);

        event.handle(Arc::new(|n: &u32| n * 2));
        event.handle(Arc::new(|n: &u32| n * 3));
        assert_eq!(event.len(), 2);
        assert_eq!(event.invoke(&21), Some(42));
    }
}
