//! PowerShell engine: each invocation runs in a `pwsh` child process.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::rc::Rc;

use tempfile::TempDir;
use tokio::io::{AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::process::Command;

use super::{EngineError, HostControl, Pipeline, ScriptEngine, Session, SessionConfig};
use crate::locale::Locale;

const BASE_ARGS: &[&str] = &["-NoLogo", "-NoProfile", "-NonInteractive"];

/// Startup check exit status meaning the culture could not be loaded.
const LOCALE_CHECK_FAILED: i32 = 3;

/// Map user-facing engine names to an executable. `auto` picks Windows
/// PowerShell when its module path is present and `pwsh` otherwise.
pub fn normalize_program(name: &str) -> String {
    let lower = name.trim().to_ascii_lowercase();
    match lower.as_str() {
        "" | "auto" => {
            if cfg!(windows) && !std::env::var("PSModulePath").unwrap_or_default().is_empty() {
                "powershell.exe".to_string()
            } else {
                "pwsh".to_string()
            }
        }
        "powershell" | "powershell.exe" => "powershell.exe".to_string(),
        "pwsh" | "pwsh.exe" => "pwsh".to_string(),
        _ => name.trim().to_string(),
    }
}

#[derive(Debug, Clone)]
pub struct PwshEngine {
    program: String,
}

impl PwshEngine {
    pub fn new(program: &str) -> Self {
        Self { program: normalize_program(program) }
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    fn unavailable(&self, reason: impl ToString) -> EngineError {
        EngineError::SessionUnavailable { program: self.program.clone(), reason: reason.to_string() }
    }
}

impl ScriptEngine for PwshEngine {
    type Session = PwshSession;

    async fn open(&self, config: SessionConfig) -> Result<PwshSession, EngineError> {
        let check = format!(
            "try {{\n{}}} catch {{ exit {} }}",
            config.locale.powershell_assign("culture"),
            LOCALE_CHECK_FAILED
        );
        let status = Command::new(&self.program)
            .args(BASE_ARGS)
            .arg("-Command")
            .arg(&check)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .await
            .map_err(|e| self.unavailable(e))?;

        match status.code() {
            Some(0) => {}
            Some(LOCALE_CHECK_FAILED) => return Err(EngineError::LocaleUnavailable(config.locale)),
            Some(code) => return Err(self.unavailable(format!("startup check exited with status {code}"))),
            None => return Err(self.unavailable("startup check terminated by signal")),
        }

        let scratch = tempfile::Builder::new()
            .prefix("pshost-")
            .tempdir()
            .map_err(|e| self.unavailable(e))?;
        tracing::debug!(program = %self.program, locale = %config.locale, "session opened");

        Ok(PwshSession {
            program: self.program.clone(),
            locale: config.locale,
            host: config.host,
            scratch: Some(scratch),
        })
    }
}

pub struct PwshSession {
    program: String,
    locale: Locale,
    host: Rc<dyn HostControl>,
    scratch: Option<TempDir>,
}

impl PwshSession {
    fn scratch_dir(&self) -> Result<PathBuf, EngineError> {
        self.scratch
            .as_ref()
            .map(|dir| dir.path().to_path_buf())
            .ok_or(EngineError::SessionClosed)
    }
}

/// Full script file text: culture prologue, the pipeline, then an explicit
/// `exit 0` so any other status can only come from the script calling `exit`.
/// A terminating error is written to `failure_path` instead of the console.
pub fn compose_script(locale: &Locale, pipeline: &Pipeline, failure_path: &Path) -> String {
    let mut script = String::new();
    script.push_str("$ErrorActionPreference = 'Continue'\n");
    script.push_str(&format!(
        "try {{\n{}[System.Threading.Thread]::CurrentThread.CurrentCulture = $culture\n[System.Globalization.CultureInfo]::CurrentCulture = $culture\n}} catch {{\nWrite-Warning \"culture '{}' unavailable, using the default\"\n}}\n",
        locale.powershell_assign("culture"),
        locale.tag()
    ));
    let on_error = format!(
        "$_ | Out-String | Set-Content -LiteralPath '{}' -Encoding utf8",
        failure_path.display().to_string().replace('\'', "''")
    );
    script.push_str(&pipeline.render_powershell(&on_error));
    script.push_str("exit 0\n");
    script
}

/// Message left behind by a terminating script error, if any.
async fn take_failure(path: &Path) -> Result<Option<String>, EngineError> {
    match tokio::fs::read(path).await {
        Ok(bytes) => {
            tokio::fs::remove_file(path).await?;
            let text = String::from_utf8_lossy(&bytes);
            Ok(Some(text.trim_start_matches('\u{feff}').trim().to_string()))
        }
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}

impl Session for PwshSession {
    async fn invoke<W>(&mut self, pipeline: &Pipeline, out: &mut W) -> Result<(), EngineError>
    where
        W: AsyncWrite + Unpin,
    {
        let dir = self.scratch_dir()?;
        let script_path = dir.join("pipeline.ps1");
        let failure_path = dir.join("failure.txt");
        tokio::fs::write(&script_path, compose_script(&self.locale, pipeline, &failure_path)).await?;

        let posix = self.locale.posix();
        let mut child = Command::new(&self.program)
            .args(BASE_ARGS)
            .arg("-File")
            .arg(&script_path)
            .env("LANG", &posix)
            .env("LC_ALL", &posix)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| std::io::Error::new(ErrorKind::BrokenPipe, "engine stdout not captured"))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| std::io::Error::new(ErrorKind::BrokenPipe, "engine stderr not captured"))?;
        let mut stdout = BufReader::new(stdout);
        let mut stderr = BufReader::new(stderr);
        let (mut out_line, mut err_line) = (Vec::new(), Vec::new());
        let (mut out_open, mut err_open) = (true, true);

        // Both pipes feed the one sink line by line, in arrival order. Bytes
        // are passed through as-is; the engine's code page is not ours to fix.
        while out_open || err_open {
            let from_stdout = tokio::select! {
                read = stdout.read_until(b'\n', &mut out_line), if out_open => {
                    out_open = read? > 0;
                    true
                }
                read = stderr.read_until(b'\n', &mut err_line), if err_open => {
                    err_open = read? > 0;
                    false
                }
            };
            let line = if from_stdout { &mut out_line } else { &mut err_line };
            if !line.is_empty() {
                out.write_all(line).await?;
                line.clear();
            }
        }
        out.flush().await?;

        let status = child.wait().await?;
        let Some(code) = status.code() else {
            return Err(EngineError::Terminated { program: self.program.clone() });
        };
        if code != 0 {
            tracing::debug!(code, "engine requested exit");
            self.host.request_exit(code);
        }
        match take_failure(&failure_path).await? {
            Some(message) => Err(EngineError::Script(message)),
            None => Ok(()),
        }
    }

    fn close(&mut self) -> Result<(), EngineError> {
        match self.scratch.take() {
            Some(dir) => dir.close().map_err(|e| EngineError::Release(e.to_string())),
            None => Ok(()),
        }
    }
}
