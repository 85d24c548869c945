//! Language lookup: file extension, launcher script and optional shim.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use tracing::trace;

use crate::error::RunnerError;

/// Runtime helpers prepended to JavaScript programs.
///
/// Gives scripts blocking `readline()` and `print()` so interactive programs
/// read stdin line by line the same way they would in other languages.
pub const JAVASCRIPT_SHIM: &str = r#"const __stdinLines = (() => {
  try {
    return require('fs').readFileSync(0, 'utf8').split('\n');
  } catch (e) {
    return [];
  }
})();
let __stdinIndex = 0;
function readline() {
  return __stdinIndex < __stdinLines.length ? __stdinLines[__stdinIndex++] : undefined;
}
function print(...args) {
  console.log(...args);
}
"#;

const BUILTIN_EXTENSIONS: &[(&str, &str)] = &[
    ("bash", ".sh"),
    ("c", ".c"),
    ("cpp", ".cpp"),
    ("csharp", ".cs"),
    ("go", ".go"),
    ("haskell", ".hs"),
    ("java", ".java"),
    ("javascript", ".js"),
    ("kotlin", ".kt"),
    ("lua", ".lua"),
    ("php", ".php"),
    ("python", ".py"),
    ("python2", ".py"),
    ("python3", ".py"),
    ("ruby", ".rb"),
    ("rust", ".rs"),
    ("scala", ".scala"),
    ("swift", ".swift"),
    ("typescript", ".ts"),
];

/// A resolved language.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Language {
    pub name: String,
    /// Extension of the source file, including the dot. May be empty.
    pub extension: String,
    /// Launcher script taking the source path as its only argument.
    pub launcher: PathBuf,
    /// Code prepended to the program, if any.
    pub shim: Option<&'static str>,
}

impl Language {
    /// The text written to the source file.
    #[must_use]
    pub fn source_for(&self, code: &str) -> String {
        match self.shim {
            Some(shim) => format!("{shim}{code}"),
            None => code.to_string(),
        }
    }
}

/// Maps language names to launchers found in a directory.
#[derive(Debug, Clone)]
pub struct LanguageRegistry {
    launchers_dir: PathBuf,
    extensions: HashMap<String, String>,
}

impl LanguageRegistry {
    /// Creates a registry with the built-in extension table.
    #[must_use]
    pub fn new(launchers_dir: impl Into<PathBuf>) -> Self {
        Self {
            launchers_dir: launchers_dir.into(),
            extensions: BUILTIN_EXTENSIONS
                .iter()
                .map(|(name, ext)| ((*name).to_string(), (*ext).to_string()))
                .collect(),
        }
    }

    /// Adds or overrides a file extension.
    #[must_use]
    pub fn with_extension(mut self, language: impl Into<String>, extension: impl Into<String>) -> Self {
        self.extensions.insert(language.into(), extension.into());
        self
    }

    #[must_use]
    pub fn launchers_dir(&self) -> &Path {
        &self.launchers_dir
    }

    /// Resolves a language name to its launcher.
    ///
    /// # Errors
    ///
    /// Returns `RunnerError::UnsupportedLanguage` if the name is not a plain
    /// identifier or no `{name}.sh` launcher exists.
    pub async fn resolve(&self, name: &str) -> Result<Language, RunnerError> {
        let unsupported = || RunnerError::UnsupportedLanguage {
            language: name.to_string(),
        };

        if !is_valid_name(name) {
            return Err(unsupported());
        }

        let launcher = self.launchers_dir.join(format!("{name}.sh"));
        match tokio::fs::metadata(&launcher).await {
            Ok(meta) if meta.is_file() => {}
            _ => return Err(unsupported()),
        }
        trace!(language = name, launcher = %launcher.display(), "Resolved launcher");

        Ok(Language {
            name: name.to_string(),
            extension: self.extensions.get(name).cloned().unwrap_or_default(),
            launcher,
            shim: (name == "javascript").then_some(JAVASCRIPT_SHIM),
        })
    }
}

/// Language names become file names, so only plain identifiers are allowed.
fn is_valid_name(name: &str) -> bool {
    !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '+'))
}
