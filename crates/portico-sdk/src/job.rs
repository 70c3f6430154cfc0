//! Scheduled job handlers.

use std::future::Future;

use futures_util::future::LocalBoxFuture;
use futures_util::FutureExt;

pub(crate) type JobHandlerFn =
    dyn Fn() -> LocalBoxFuture<'static, anyhow::Result<()>> + Send + Sync;

/// A registered job: `(name, cron_spec, fn)`.
///
/// Whatever the handler returns on success is discarded; a job invocation
/// always answers with an empty body.
pub struct Job {
    pub(crate) name: String,
    pub(crate) spec: String,
    pub(crate) handler: Box<JobHandlerFn>,
}

impl std::fmt::Debug for Job {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Job")
            .field("name", &self.name)
            .field("spec", &self.spec)
            .finish_non_exhaustive()
    }
}

impl Job {
    pub fn new<F, Fut, R>(name: impl Into<String>, spec: impl Into<String>, handler: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<R>> + 'static,
        R: 'static,
    {
        Self {
            name: name.into(),
            spec: spec.into(),
            handler: Box::new(move || handler().map(|res| res.map(drop)).boxed_local()),
        }
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Cron expression the host schedules this job with.
    #[must_use]
    pub fn spec(&self) -> &str {
        &self.spec
    }

    pub(crate) fn call(&self) -> LocalBoxFuture<'static, anyhow::Result<()>> {
        (self.handler)()
    }
}
