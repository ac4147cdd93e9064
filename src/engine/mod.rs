//! Scripting engine seam: sessions, invocation and scoped release.

use std::ops::{Deref, DerefMut};
use std::rc::Rc;

use thiserror::Error;
use tokio::io::AsyncWrite;

use crate::locale::Locale;

pub mod pipeline;
pub mod pwsh;

pub use pipeline::Pipeline;

/// Callback surface an engine uses to ask its host to terminate.
pub trait HostControl {
    fn request_exit(&self, code: i32);
    fn is_exit_requested(&self) -> bool;
}

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("locale {0} is not available to the engine")]
    LocaleUnavailable(Locale),
    #[error("cannot start scripting session with {program}: {reason}")]
    SessionUnavailable { program: String, reason: String },
    /// The script itself failed; the engine ran to completion.
    #[error("script failed: {0}")]
    Script(String),
    #[error("{program} terminated by signal")]
    Terminated { program: String },
    #[error("session is closed")]
    SessionClosed,
    #[error("failed to release session: {0}")]
    Release(String),
    #[error(transparent)]
    Pipeline(#[from] pipeline::PipelineError),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Everything a session captures when it is opened. The engine never reads
/// ambient locale state after this point.
#[derive(Clone)]
pub struct SessionConfig {
    pub locale: Locale,
    pub host: Rc<dyn HostControl>,
}

#[allow(async_fn_in_trait)]
pub trait ScriptEngine {
    type Session: Session;

    async fn open(&self, config: SessionConfig) -> Result<Self::Session, EngineError>;
}

#[allow(async_fn_in_trait)]
pub trait Session {
    /// Run `pipeline` to completion, writing everything it renders to `out`.
    async fn invoke<W>(&mut self, pipeline: &Pipeline, out: &mut W) -> Result<(), EngineError>
    where
        W: AsyncWrite + Unpin;

    fn close(&mut self) -> Result<(), EngineError>;
}

/// Owns an open session and releases it exactly once: explicitly through
/// [`SessionGuard::close`], or on drop.
pub struct SessionGuard<S: Session> {
    inner: Option<S>,
}

impl<S: Session> SessionGuard<S> {
    pub fn new(session: S) -> Self {
        Self { inner: Some(session) }
    }

    pub fn close(mut self) -> Result<(), EngineError> {
        match self.inner.take() {
            Some(mut session) => session.close(),
            None => Ok(()),
        }
    }
}

impl<S: Session> Deref for SessionGuard<S> {
    type Target = S;

    fn deref(&self) -> &S {
        self.inner.as_ref().expect("session already released")
    }
}

impl<S: Session> DerefMut for SessionGuard<S> {
    fn deref_mut(&mut self) -> &mut S {
        self.inner.as_mut().expect("session already released")
    }
}

impl<S: Session> Drop for SessionGuard<S> {
    fn drop(&mut self) {
        if let Some(mut session) = self.inner.take() {
            if let Err(e) = session.close() {
                tracing::warn!("{e}");
            }
        }
    }
}
