//! Observation hooks for payload execution.
//!
//! Composites and model calls report what they are doing through an optional
//! [`EventHandler`] on the [`ExecCtx`](crate::ExecCtx): unit start and end,
//! streamed model tokens, the route a branch picked, and retry attempts.
//! Nothing in the engine depends on a handler being present.

use std::sync::Arc;

/// Events emitted during payload execution.
#[derive(Debug, Clone)]
pub enum Event {
    /// A payload has started executing.
    PayloadStart {
        /// Instance name of the payload.
        name: String,
        /// Stable type identifier (e.g. `"llm-call"`, `"sequence"`).
        kind: &'static str,
    },
    /// A model produced a token while streaming.
    Token {
        /// Instance name of the payload producing this token.
        name: String,
        /// The token text.
        chunk: String,
    },
    /// A payload has finished executing.
    PayloadEnd {
        /// Instance name of the payload.
        name: String,
        /// Whether execution succeeded.
        ok: bool,
    },
    /// A branch evaluated its conditions and picked a route.
    BranchSelected {
        /// Instance name of the branch.
        name: String,
        /// Index of the matching route, or `None` for the default.
        index: Option<usize>,
    },
    /// A retry attempt is starting.
    RetryStart {
        /// Instance name of the payload being retried.
        name: String,
        /// The retry attempt number (1-indexed).
        attempt: u32,
        /// The error that triggered the retry.
        reason: String,
    },
    /// A retry sequence has completed.
    RetryEnd {
        /// Instance name of the payload.
        name: String,
        /// Total number of retry attempts made.
        attempts: u32,
        /// Whether the final attempt succeeded.
        success: bool,
    },
}

/// Handler for payload lifecycle events.
///
/// # Example
///
/// ```
/// use llm_runnable::events::{Event, EventHandler};
///
/// struct PrintHandler;
///
/// impl EventHandler for PrintHandler {
///     fn on_event(&self, event: Event) {
///         match event {
///             Event::Token { chunk, .. } => print!("{}", chunk),
///             Event::BranchSelected { name, index } => println!("[route] {} -> {:?}", name, index),
///             Event::PayloadEnd { name, ok, .. } => println!("[end] {} ok={}", name, ok),
///             _ => {}
///         }
///     }
/// }
/// ```
pub trait EventHandler: Send + Sync {
    /// Called when a payload emits an event.
    fn on_event(&self, event: Event);
}

/// Emit an event if a handler is present. No-op otherwise.
pub(crate) fn emit(handler: &Option<Arc<dyn EventHandler>>, event: Event) {
    if let Some(ref h) = handler {
        h.on_event(event);
    }
}

/// An [`EventHandler`] backed by a closure.
///
/// ```
/// use llm_runnable::events::{Event, FnEventHandler};
/// use std::sync::Arc;
///
/// let handler = Arc::new(FnEventHandler(|event: Event| {
///     if let Event::Token { chunk, .. } = event {
///         print!("{}", chunk);
///     }
/// }));
/// ```
pub struct FnEventHandler<F: Fn(Event) + Send + Sync>(pub F);

impl<F: Fn(Event) + Send + Sync> EventHandler for FnEventHandler<F> {
    fn on_event(&self, event: Event) {
        (self.0)(event);
    }
}

/// Records every event it receives. Handy in tests and demos.
#[derive(Debug, Default)]
pub struct RecordingHandler {
    events: std::sync::Mutex<Vec<Event>>,
}

impl RecordingHandler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of the events received so far.
    pub fn events(&self) -> Vec<Event> {
        self.events
            .lock()
            .map(|events| events.clone())
            .unwrap_or_default()
    }
}

impl EventHandler for RecordingHandler {
    fn on_event(&self, event: Event) {
        if let Ok(mut events) = self.events.lock() {
            events.push(event);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_emit_without_handler_is_noop() {
        emit(
            &None,
            Event::PayloadEnd {
                name: "x".into(),
                ok: true,
            },
        );
    }

    #[test]
    fn test_fn_handler_receives_events() {
        let count = Arc::new(AtomicUsize::new(0));
        let seen = count.clone();
        let handler: Arc<dyn EventHandler> = Arc::new(FnEventHandler(move |_event: Event| {
            seen.fetch_add(1, Ordering::SeqCst);
        }));
        let handler = Some(handler);
        emit(
            &handler,
            Event::Token {
                name: "llm".into(),
                chunk: "hi".into(),
            },
        );
        emit(
            &handler,
            Event::BranchSelected {
                name: "router".into(),
                index: None,
            },
        );
        assert_eq!(count.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_recording_handler_keeps_order() {
        let recorder = RecordingHandler::new();
        recorder.on_event(Event::PayloadStart {
            name: "a".into(),
            kind: "lambda",
        });
        recorder.on_event(Event::PayloadEnd {
            name: "a".into(),
            ok: false,
        });
        let events = recorder.events();
        assert!(matches!(events[0], Event::PayloadStart { .. }));
        assert!(matches!(events[1], Event::PayloadEnd { ok: false, .. }));
    }
}
