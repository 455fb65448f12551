use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, TryLockError};

use crate::scene::Scene;

#[derive(Debug, Clone, PartialEq)]
pub enum InputEvent {
    /// `key` is the logical key name, e.g. `"w"` or `"Escape"`.
    Key { key: String, pressed: bool },
    CursorMoved { x: f64, y: f64 },
    MouseButton { button: u16, pressed: bool },
    Scroll { delta: f32 },
}

impl InputEvent {
    pub fn kind(&self) -> InputKind {
        match self {
            InputEvent::Key { .. } => InputKind::Key,
            InputEvent::CursorMoved { .. } => InputKind::CursorMoved,
            InputEvent::MouseButton { .. } => InputKind::MouseButton,
            InputEvent::Scroll { .. } => InputKind::Scroll,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum InputKind {
    Key,
    CursorMoved,
    MouseButton,
    Scroll,
}

pub type InputHandler = Box<dyn FnMut(&InputEvent, &mut Scene) + Send>;

#[derive(Default)]
pub struct InputBindings {
    handlers: HashMap<InputKind, Vec<InputHandler>>,
}

impl InputBindings {
    /// Runs every handler bound to the event's kind, in binding order.
    pub fn dispatch(&mut self, event: &InputEvent, scene: &mut Scene) {
        if let Some(handlers) = self.handlers.get_mut(&event.kind()) {
            for handler in handlers {
                handler(event, scene);
            }
        }
    }

    pub fn handler_count(&self, kind: InputKind) -> usize {
        self.handlers.get(&kind).map_or(0, Vec::len)
    }

    fn push(&mut self, kind: InputKind, handler: InputHandler) {
        self.handlers.entry(kind).or_default().push(handler);
    }
}

#[derive(Default)]
struct SharedBindings {
    bindings: Mutex<InputBindings>,
    /// Handlers bound while the frame lock was held elsewhere.
    pending: Mutex<Vec<(InputKind, InputHandler)>>,
}

/// Shared handle for binding input handlers from any thread.
///
/// The engine holds the frame lock for the whole body of a frame. A `bind`
/// that finds it taken, whether from another thread or from a handler
/// running inside the frame, is parked and merged once dispatch is over, so
/// it lands either before or after a frame, never in the middle of one.
#[derive(Clone, Default)]
pub struct InputRegistrar {
    shared: Arc<SharedBindings>,
}

impl InputRegistrar {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn bind<F>(&self, kind: InputKind, handler: F)
    where
        F: FnMut(&InputEvent, &mut Scene) + Send + 'static,
    {
        let handler: InputHandler = Box::new(handler);
        match self.shared.bindings.try_lock() {
            Ok(mut bindings) => {
                self.merge_pending(&mut bindings);
                bindings.push(kind, handler);
            }
            Err(TryLockError::Poisoned(poisoned)) => {
                let mut bindings = poisoned.into_inner();
                self.merge_pending(&mut bindings);
                bindings.push(kind, handler);
            }
            Err(TryLockError::WouldBlock) => {
                self.pending().push((kind, handler));
            }
        }
        log::debug!("Bound {kind:?} handler");
    }

    /// Acquires the frame lock. A handler that panicked in an earlier frame
    /// does not poison later frames.
    pub fn lock(&self) -> MutexGuard<'_, InputBindings> {
        let mut bindings = self
            .shared
            .bindings
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        self.merge_pending(&mut bindings);
        bindings
    }

    /// Moves handlers parked during a frame into `bindings`, in bind order.
    pub fn merge_pending(&self, bindings: &mut InputBindings) {
        for (kind, handler) in self.pending().drain(..) {
            bindings.push(kind, handler);
        }
    }

    fn pending(&self) -> MutexGuard<'_, Vec<(InputKind, InputHandler)>> {
        self.shared
            .pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}
