// Diagnostic sink for non-fatal background information

use std::sync::{Arc, RwLock};

use crate::error::AuthError;

/// Callback signature for the diagnostic sink
pub type DiagnosticCallback = dyn Fn(&str, Option<&AuthError>) + Send + Sync;

/// Registrable sink for non-fatal background information: refresh retries,
/// listener errors and the like. Never used for control flow.
///
/// When no callback is registered, messages go to `tracing::debug!`.
#[derive(Clone, Default)]
pub struct DiagnosticSink {
    callback: Arc<RwLock<Option<Arc<DiagnosticCallback>>>>,
}

impl DiagnosticSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a callback, replacing any previous one
    pub fn set<F>(&self, callback: F)
    where
        F: Fn(&str, Option<&AuthError>) + Send + Sync + 'static,
    {
        if let Ok(mut guard) = self.callback.write() {
            *guard = Some(Arc::new(callback));
        }
    }

    /// Remove the registered callback, falling back to tracing output
    pub fn unset(&self) {
        if let Ok(mut guard) = self.callback.write() {
            *guard = None;
        }
    }

    /// Report a non-fatal event
    pub fn report(&self, message: &str, error: Option<&AuthError>) {
        let callback = self
            .callback
            .read()
            .ok()
            .and_then(|guard| guard.clone());

        match callback {
            Some(cb) => cb(message, error),
            None => match error {
                Some(err) => tracing::debug!("{}: {}", message, err),
                None => tracing::debug!("{}", message),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_report_invokes_registered_callback() {
        let sink = DiagnosticSink::new();
        let calls = Arc::new(AtomicUsize::new(0));

        let counter = calls.clone();
        sink.set(move |message, error| {
            assert_eq!(message, "refresh retry");
            assert!(error.is_some());
            counter.fetch_add(1, Ordering::SeqCst);
        });

        sink.report("refresh retry", Some(&AuthError::NotAuthenticated));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_report_without_callback_does_not_panic() {
        let sink = DiagnosticSink::new();
        sink.report("background info", None);
    }

    #[test]
    fn test_unset_restores_default_behavior() {
        let sink = DiagnosticSink::new();
        let calls = Arc::new(AtomicUsize::new(0));

        let counter = calls.clone();
        sink.set(move |_, _| {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        sink.report("one", None);
        sink.unset();
        sink.report("two", None);

        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
