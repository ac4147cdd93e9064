//! Locale identifiers handed to the engine at session construction.

use std::fmt;

use thiserror::Error;

/// LCID .NET assigns to cultures it builds on the fly for unknown names.
const SYNTHETIC_LCID: u32 = 4096;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum LocaleError {
    #[error("malformed locale identifier: {0:?}")]
    Malformed(String),
}

/// A normalized culture tag (`de-DE`), or the invariant locale.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Locale {
    language: String,
    region: Option<String>,
}

impl Locale {
    /// Parse `de-de`, `de_DE`, `en`, `es-419` and similar.
    pub fn parse(id: &str) -> Result<Self, LocaleError> {
        let malformed = || LocaleError::Malformed(id.to_string());
        let mut parts = id.trim().split(['-', '_']);

        let language = parts.next().unwrap_or_default();
        if !(2..=3).contains(&language.len()) || !language.chars().all(|c| c.is_ascii_alphabetic()) {
            return Err(malformed());
        }

        let region = match parts.next() {
            None => None,
            Some(r) if r.len() == 2 && r.chars().all(|c| c.is_ascii_alphabetic()) => {
                Some(r.to_ascii_uppercase())
            }
            Some(r) if r.len() == 3 && r.chars().all(|c| c.is_ascii_digit()) => Some(r.to_string()),
            Some(_) => return Err(malformed()),
        };
        if parts.next().is_some() {
            return Err(malformed());
        }

        Ok(Self { language: language.to_ascii_lowercase(), region })
    }

    pub fn invariant() -> Self {
        Self { language: String::new(), region: None }
    }

    /// Parse `id`, falling back to the invariant locale when it is unusable.
    pub fn resolve(id: &str) -> Self {
        match Self::parse(id) {
            Ok(locale) => locale,
            Err(e) => {
                tracing::warn!("{e}; using the invariant locale");
                Self::invariant()
            }
        }
    }

    pub fn is_invariant(&self) -> bool {
        self.language.is_empty()
    }

    /// Culture name as the engine spells it; empty for the invariant locale.
    pub fn tag(&self) -> String {
        match &self.region {
            Some(region) => format!("{}-{}", self.language, region),
            None => self.language.clone(),
        }
    }

    /// Value for `LANG`/`LC_ALL` in the engine's environment.
    pub fn posix(&self) -> String {
        if self.is_invariant() {
            return "C.UTF-8".to_string();
        }
        match &self.region {
            Some(region) => format!("{}_{}.UTF-8", self.language, region),
            None => format!("{}.UTF-8", self.language),
        }
    }

    /// PowerShell expression that yields this culture. Works on both
    /// Windows PowerShell and pwsh; see [`Locale::powershell_assign`].
    pub fn powershell_culture(&self) -> String {
        if self.is_invariant() {
            "[System.Globalization.CultureInfo]::InvariantCulture".to_string()
        } else {
            format!("[System.Globalization.CultureInfo]::GetCultureInfo('{}')", self.tag())
        }
    }

    /// Statements assigning the culture to `$var`, throwing when the engine
    /// only has a synthetic culture (LCID 4096) for this tag.
    pub fn powershell_assign(&self, var: &str) -> String {
        let mut text = format!("${var} = {}\n", self.powershell_culture());
        if !self.is_invariant() {
            text.push_str(&format!(
                "if (${var}.LCID -eq {SYNTHETIC_LCID}) {{ throw \"culture '{}' is not installed\" }}\n",
                self.tag()
            ));
        }
        text
    }
}

impl fmt::Display for Locale {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_invariant() {
            f.write_str("invariant")
        } else {
            f.write_str(&self.tag())
        }
    }
}
