//! Host shell controller: owns the exit state and drives the fixed pipeline.

use std::cell::Cell;
use std::rc::Rc;

use tokio::io::{AsyncWrite, AsyncWriteExt};

use crate::engine::{
    EngineError, HostControl, Pipeline, ScriptEngine, Session, SessionConfig, SessionGuard,
};
use crate::locale::Locale;

/// Culture the session is opened with; date output is rendered in German.
pub const LOCALE_ID: &str = "de-de";

/// Processes ordered by handle count, then the current date as a string.
pub const SCRIPT: &str = "
get-process | sort handlecount
get-date | out-string";

/// Terminal stage; consumes everything and renders it to the console.
pub const OUTPUT_COMMAND: &str = "out-default";

/// Exit request written by the engine, read by the process at shutdown.
#[derive(Debug, Default)]
pub struct ExitState {
    requested: Cell<bool>,
    code: Cell<i32>,
}

impl ExitState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn request_exit(&self, code: i32) {
        self.code.set(code);
        self.requested.set(true);
    }

    pub fn is_exit_requested(&self) -> bool {
        self.requested.get()
    }

    /// Last code written; only meaningful once exit was requested.
    pub fn exit_code(&self) -> i32 {
        self.code.get()
    }

    pub fn requested_code(&self) -> Option<i32> {
        self.is_exit_requested().then(|| self.exit_code())
    }
}

impl HostControl for ExitState {
    fn request_exit(&self, code: i32) {
        ExitState::request_exit(self, code)
    }

    fn is_exit_requested(&self) -> bool {
        ExitState::is_exit_requested(self)
    }
}

pub struct HostController {
    exit: Rc<ExitState>,
    locale_id: String,
}

impl Default for HostController {
    fn default() -> Self {
        Self::new()
    }
}

impl HostController {
    pub fn new() -> Self {
        Self::with_locale(LOCALE_ID)
    }

    fn with_locale(id: &str) -> Self {
        Self { exit: Rc::new(ExitState::new()), locale_id: id.to_string() }
    }

    pub fn exit_state(&self) -> &ExitState {
        &self.exit
    }

    /// The fixed script followed by the output command, with the script's
    /// errors merged into its output.
    pub fn pipeline() -> Result<Pipeline, EngineError> {
        let mut pipeline = Pipeline::new();
        pipeline.add_script(SCRIPT).add_command(OUTPUT_COMMAND);
        pipeline.merge_errors(0)?;
        Ok(pipeline)
    }

    /// Open a session, run the pipeline into `out`, release the session.
    ///
    /// Every invocation failure is written to `out` next to whatever the
    /// pipeline rendered. A failure of the script itself ends there; one that
    /// kept the pipeline from running (engine launch, I/O, signal) is also
    /// returned, as are session setup failures.
    pub async fn run<E, W>(&self, engine: &E, out: &mut W) -> Result<(), EngineError>
    where
        E: ScriptEngine,
        W: AsyncWrite + Unpin,
    {
        let locale = Locale::resolve(&self.locale_id);
        let mut session = self.open(engine, locale).await?;

        let invoked = match Self::pipeline() {
            Ok(pipeline) => session.invoke(&pipeline, out).await,
            Err(e) => Err(e),
        };
        if let Err(e) = session.close() {
            tracing::warn!("{e}");
        }

        let Err(e) = invoked else {
            return Ok(());
        };
        tracing::warn!("pipeline failed: {e}");
        out.write_all(format!("{e}\n").as_bytes()).await?;
        out.flush().await?;
        match e {
            EngineError::Script(_) => Ok(()),
            fatal => Err(fatal),
        }
    }

    async fn open<E: ScriptEngine>(
        &self,
        engine: &E,
        locale: Locale,
    ) -> Result<SessionGuard<E::Session>, EngineError> {
        let host: Rc<dyn HostControl> = self.exit.clone();
        let config = SessionConfig { locale, host: host.clone() };
        match engine.open(config).await {
            Ok(session) => Ok(SessionGuard::new(session)),
            Err(EngineError::LocaleUnavailable(locale)) if !locale.is_invariant() => {
                tracing::warn!("locale {locale} unavailable, using the invariant locale");
                let config = SessionConfig { locale: Locale::invariant(), host };
                Ok(SessionGuard::new(engine.open(config).await?))
            }
            Err(e) => Err(e),
        }
    }

    /// Status for the process: the engine's exit request wins, otherwise
    /// success or failure of [`HostController::run`].
    pub fn exit_status<T, E>(&self, result: &Result<T, E>) -> i32 {
        self.exit
            .requested_code()
            .unwrap_or(if result.is_ok() { 0 } else { 1 })
    }
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;

    use super::*;
    use crate::engine::pipeline::StageKind;

    #[derive(Default)]
    struct Calls {
        opens: Cell<u32>,
        closes: Cell<u32>,
        locales: RefCell<Vec<Locale>>,
        pipelines: RefCell<Vec<Pipeline>>,
    }

    #[derive(Clone, Copy, Default)]
    enum Behavior {
        #[default]
        Healthy,
        FailOpen,
        RejectLocale,
        ScriptError,
        LaunchFailed,
        Killed,
        RequestExit(i32),
    }

    #[derive(Default)]
    struct FakeEngine {
        calls: Rc<Calls>,
        behavior: Behavior,
    }

    struct FakeSession {
        calls: Rc<Calls>,
        behavior: Behavior,
        host: Rc<dyn HostControl>,
    }

    impl ScriptEngine for FakeEngine {
        type Session = FakeSession;

        async fn open(&self, config: SessionConfig) -> Result<FakeSession, EngineError> {
            self.calls.locales.borrow_mut().push(config.locale.clone());
            match self.behavior {
                Behavior::FailOpen => {
                    return Err(EngineError::SessionUnavailable {
                        program: "fake".into(),
                        reason: "not installed".into(),
                    })
                }
                Behavior::RejectLocale if !config.locale.is_invariant() => {
                    return Err(EngineError::LocaleUnavailable(config.locale))
                }
                _ => {}
            }
            self.calls.opens.set(self.calls.opens.get() + 1);
            Ok(FakeSession { calls: self.calls.clone(), behavior: self.behavior, host: config.host })
        }
    }

    impl Session for FakeSession {
        async fn invoke<W>(&mut self, pipeline: &Pipeline, out: &mut W) -> Result<(), EngineError>
        where
            W: AsyncWrite + Unpin,
        {
            self.calls.pipelines.borrow_mut().push(pipeline.clone());
            if let Behavior::LaunchFailed = self.behavior {
                return Err(std::io::Error::new(std::io::ErrorKind::NotFound, "pwsh vanished").into());
            }
            out.write_all(b"processes\ndate\n").await?;
            match self.behavior {
                Behavior::Killed => Err(EngineError::Terminated { program: "fake".into() }),
                Behavior::ScriptError => Err(EngineError::Script("get-process: access denied".into())),
                Behavior::RequestExit(code) => {
                    self.host.request_exit(code);
                    Ok(())
                }
                _ => Ok(()),
            }
        }

        fn close(&mut self) -> Result<(), EngineError> {
            self.calls.closes.set(self.calls.closes.get() + 1);
            Ok(())
        }
    }

    fn engine(behavior: Behavior) -> FakeEngine {
        FakeEngine { calls: Rc::default(), behavior }
    }

    #[test]
    fn request_exit_sets_flag_and_code() {
        for code in [0, 1, -1, 42, i32::MIN, i32::MAX] {
            let state = ExitState::new();
            assert!(!state.is_exit_requested());
            assert_eq!(state.requested_code(), None);
            state.request_exit(code);
            assert!(state.is_exit_requested());
            assert_eq!(state.exit_code(), code);
            assert_eq!(state.requested_code(), Some(code));
        }
    }

    #[test]
    fn last_exit_request_wins() {
        let state = ExitState::new();
        state.request_exit(3);
        state.request_exit(-7);
        assert!(state.is_exit_requested());
        assert_eq!(state.exit_code(), -7);
    }

    #[test]
    fn fixed_pipeline_shape() {
        let pipeline = HostController::pipeline().unwrap();
        let stages = pipeline.stages();
        assert_eq!(stages.len(), 2);
        assert_eq!(stages[0].kind, StageKind::Script(SCRIPT.into()));
        assert!(stages[0].merge_errors);
        assert_eq!(stages[1].kind, StageKind::Command(OUTPUT_COMMAND.into()));
        assert!(!stages[1].merge_errors);
    }

    #[tokio::test]
    async fn healthy_run_opens_and_closes_once() {
        let engine = engine(Behavior::Healthy);
        let controller = HostController::new();
        let mut out = Vec::new();

        let result = controller.run(&engine, &mut out).await;
        assert!(result.is_ok());
        assert_eq!(engine.calls.opens.get(), 1);
        assert_eq!(engine.calls.closes.get(), 1);
        assert_eq!(engine.calls.locales.borrow()[0].tag(), "de-DE");
        assert_eq!(engine.calls.pipelines.borrow()[0], HostController::pipeline().unwrap());
        assert_eq!(String::from_utf8(out).unwrap(), "processes\ndate\n");
        assert_eq!(controller.exit_status(&result), 0);
    }

    #[tokio::test]
    async fn script_error_is_written_to_output_and_session_released() {
        let engine = engine(Behavior::ScriptError);
        let controller = HostController::new();
        let mut out = Vec::new();

        let result = controller.run(&engine, &mut out).await;
        assert!(result.is_ok());
        assert_eq!(engine.calls.opens.get(), 1);
        assert_eq!(engine.calls.closes.get(), 1);
        let text = String::from_utf8(out).unwrap();
        assert!(text.starts_with("processes\ndate\n"));
        assert!(text.contains("get-process: access denied"), "{text}");
        assert_eq!(controller.exit_status(&result), 0);
    }

    #[tokio::test]
    async fn session_failure_propagates() {
        let engine = engine(Behavior::FailOpen);
        let controller = HostController::new();
        let mut out = Vec::new();

        let result = controller.run(&engine, &mut out).await;
        assert!(matches!(result, Err(EngineError::SessionUnavailable { .. })));
        assert_eq!(engine.calls.opens.get(), 0);
        assert_eq!(engine.calls.closes.get(), 0);
        assert!(out.is_empty());
        assert_eq!(controller.exit_status(&result), 1);
    }

    #[tokio::test]
    async fn unavailable_locale_falls_back_to_invariant() {
        let engine = engine(Behavior::RejectLocale);
        let controller = HostController::new();
        let mut out = Vec::new();

        controller.run(&engine, &mut out).await.unwrap();
        let locales = engine.calls.locales.borrow();
        assert_eq!(locales.len(), 2);
        assert_eq!(locales[0].tag(), "de-DE");
        assert!(locales[1].is_invariant());
        assert_eq!(engine.calls.opens.get(), 1);
        assert_eq!(engine.calls.closes.get(), 1);
    }

    #[tokio::test]
    async fn malformed_locale_opens_with_invariant() {
        let engine = engine(Behavior::Healthy);
        let controller = HostController::with_locale("deutsch");
        let mut out = Vec::new();

        controller.run(&engine, &mut out).await.unwrap();
        assert!(engine.calls.locales.borrow()[0].is_invariant());
    }

    #[tokio::test]
    async fn engine_exit_request_sets_status() {
        let engine = engine(Behavior::RequestExit(-2));
        let controller = HostController::new();
        let mut out = Vec::new();

        let result = controller.run(&engine, &mut out).await;
        assert!(result.is_ok());
        assert!(controller.exit_state().is_exit_requested());
        assert_eq!(controller.exit_status(&result), -2);
        assert_eq!(engine.calls.closes.get(), 1);
    }

    #[tokio::test]
    async fn engine_launch_failure_is_fatal_and_reported() {
        let engine = engine(Behavior::LaunchFailed);
        let controller = HostController::new();
        let mut out = Vec::new();

        let result = controller.run(&engine, &mut out).await;
        assert!(matches!(result, Err(EngineError::Io(_))), "{result:?}");
        assert_eq!(engine.calls.opens.get(), 1);
        assert_eq!(engine.calls.closes.get(), 1);
        assert_eq!(String::from_utf8(out).unwrap(), "pwsh vanished\n");
        assert_eq!(controller.exit_status(&result), 1);
    }

    #[tokio::test]
    async fn killed_engine_is_fatal_after_partial_output() {
        let engine = engine(Behavior::Killed);
        let controller = HostController::new();
        let mut out = Vec::new();

        let result = controller.run(&engine, &mut out).await;
        assert!(matches!(result, Err(EngineError::Terminated { .. })), "{result:?}");
        assert_eq!(engine.calls.closes.get(), 1);
        assert_eq!(
            String::from_utf8(out).unwrap(),
            "processes\ndate\nfake terminated by signal\n"
        );
        assert_eq!(controller.exit_status(&result), 1);
    }
}
