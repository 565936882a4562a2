//! ---
//! vsl_section: "06-update-capsule"
//! vsl_subsection: "module"
//! vsl_type: "source"
//! vsl_scope: "code"
//! vsl_description: "Update capsule embedding and startup check."
//! vsl_version: "v0.0.0-prealpha"
//! vsl_owner: "tbd"
//! ---
//! Preamble rendering and entry point rewriting.

use std::fs;
use std::path::{Path, PathBuf};

use crate::config::{CapsuleConfig, CAPSULE_FILE, LAUNCHER_FILE};
use crate::error::{CapsuleError, Result};

/// Replaced with the release server base URL.
pub const SERVER_PLACEHOLDER: &str = "[%__vessel_server__%]";
/// Replaced with the product identifier.
pub const PRODUCT_PLACEHOLDER: &str = "[%__vessel_product__%]";
/// Replaced with the release version.
pub const VERSION_PLACEHOLDER: &str = "[%__vessel_version__%]";

const PLACEHOLDER_MARKER: &str = "[%";

/// Built-in POSIX shell preamble.
pub const SHELL_TEMPLATE: &str = include_str!("../templates/preamble.sh");
/// Built-in Python preamble.
pub const PYTHON_TEMPLATE: &str = include_str!("../templates/preamble.py");

const SHELLS: [&str; 5] = ["sh", "bash", "zsh", "dash", "ksh"];

/// Language of an entry point, which selects the preamble.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EntryLanguage {
    /// POSIX shell script.
    Shell,
    /// Python 3 script.
    Python,
}

impl EntryLanguage {
    /// Detect from the shebang line, falling back to the file extension.
    ///
    /// A shebang naming any other interpreter yields `None`.
    #[must_use]
    pub fn detect(path: &Path, contents: &str) -> Option<Self> {
        match contents.lines().next().and_then(|line| line.strip_prefix("#!")) {
            Some(shebang) => Self::from_interpreter(shebang),
            None => Self::from_file_name(path),
        }
    }

    /// Detect from the file extension. A trailing `.tmpl` is ignored, so
    /// `capsule.py.tmpl` is a Python template.
    #[must_use]
    pub fn from_file_name(path: &Path) -> Option<Self> {
        let name = path.file_name()?.to_str()?;
        let name = name.strip_suffix(".tmpl").unwrap_or(name);
        match Path::new(name).extension()?.to_str()? {
            "py" | "pyw" => Some(EntryLanguage::Python),
            "sh" | "bash" | "command" => Some(EntryLanguage::Shell),
            _ => None,
        }
    }

    fn from_interpreter(shebang: &str) -> Option<Self> {
        let mut words = shebang.split_whitespace();
        let mut program = words.next()?;
        if program.rsplit('/').next() == Some("env") {
            program = words.find(|word| !word.starts_with('-'))?;
        }
        let program = program.rsplit('/').next()?;
        if program.starts_with("python") {
            Some(EntryLanguage::Python)
        } else if SHELLS.contains(&program) {
            Some(EntryLanguage::Shell)
        } else {
            None
        }
    }

    /// Built-in preamble for this language.
    #[must_use]
    pub fn default_template(self) -> &'static str {
        match self {
            EntryLanguage::Shell => SHELL_TEMPLATE,
            EntryLanguage::Python => PYTHON_TEMPLATE,
        }
    }
}

/// Values substituted into the preamble.
#[derive(Debug, Clone, Copy)]
pub struct CapsuleValues<'a> {
    pub server: &'a str,
    pub product: &'a str,
    pub version: &'a str,
}

/// Render a preamble by literal placeholder substitution.
///
/// Values must not contain quotes, backslashes, `$`, backticks, control
/// characters or the placeholder marker.
pub fn render_template(template: &str, values: &CapsuleValues<'_>) -> Result<String> {
    let server = embeddable(SERVER_PLACEHOLDER, values.server)?;
    let product = embeddable(PRODUCT_PLACEHOLDER, values.product)?;
    let version = embeddable(VERSION_PLACEHOLDER, values.version)?;
    Ok(template
        .replace(SERVER_PLACEHOLDER, server)
        .replace(PRODUCT_PLACEHOLDER, product)
        .replace(VERSION_PLACEHOLDER, version))
}

fn embeddable<'a>(placeholder: &'static str, value: &'a str) -> Result<&'a str> {
    let breaks_template = |c: char| matches!(c, '\'' | '"' | '\\' | '$' | '`') || c.is_control();
    if value.is_empty() || value.contains(PLACEHOLDER_MARKER) || value.chars().any(breaks_template)
    {
        return Err(CapsuleError::UnsafeValue {
            placeholder,
            value: value.to_owned(),
        });
    }
    Ok(value)
}

/// Insert `preamble` into the script text `original`.
///
/// Shell scripts keep their shebang first. Python scripts also keep an
/// encoding declaration and any `from __future__` imports ahead of it.
#[must_use]
pub fn insert_preamble(original: &str, preamble: &str, language: EntryLanguage) -> String {
    let lines: Vec<&str> = original.split_inclusive('\n').collect();
    let at = match language {
        EntryLanguage::Shell => usize::from(original.starts_with("#!")),
        EntryLanguage::Python => python_insertion_line(&lines),
    };
    let mut head = lines[..at].concat();
    if !head.is_empty() && !head.ends_with('\n') {
        head.push('\n');
    }
    let preamble = preamble.trim_end_matches('\n');
    format!("{head}{preamble}\n{}", lines[at..].concat())
}

fn python_insertion_line(lines: &[&str]) -> usize {
    let mut at = usize::from(lines.first().is_some_and(|line| line.starts_with("#!")));
    if lines.get(at).is_some_and(|line| is_coding_declaration(line)) {
        at += 1;
    }
    // `from __future__` imports must stay the first statements.
    let mut continued = false;
    for (index, line) in lines.iter().enumerate() {
        if continued {
            if line.contains(')') {
                continued = false;
                at = index + 1;
            }
        } else if line.starts_with("from __future__ import") {
            at = index + 1;
            continued = line.contains('(') && !line.contains(')');
        }
    }
    at
}

fn is_coding_declaration(line: &str) -> bool {
    line.trim_start().starts_with('#') && (line.contains("coding:") || line.contains("coding="))
}

/// Files produced next to the entry point that must ship as resources.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EmbeddedCapsule {
    pub record: PathBuf,
    pub launcher: Option<PathBuf>,
    pub language: EntryLanguage,
}

impl EmbeddedCapsule {
    /// Resource paths to hand to the bundler.
    #[must_use]
    pub fn resources(&self) -> Vec<PathBuf> {
        let mut resources = vec![self.record.clone()];
        resources.extend(self.launcher.clone());
        resources
    }
}

/// Embeds the update capsule into an application entry point.
#[derive(Debug, Clone)]
pub struct CapsuleEmbedder {
    shell: String,
    python: String,
    launcher: Option<PathBuf>,
}

impl Default for CapsuleEmbedder {
    fn default() -> Self {
        Self {
            shell: SHELL_TEMPLATE.to_owned(),
            python: PYTHON_TEMPLATE.to_owned(),
            launcher: None,
        }
    }
}

impl CapsuleEmbedder {
    /// Replace the preamble used for `language` entry points.
    #[must_use]
    pub fn with_template(mut self, language: EntryLanguage, template: impl Into<String>) -> Self {
        match language {
            EntryLanguage::Shell => self.shell = template.into(),
            EntryLanguage::Python => self.python = template.into(),
        }
        self
    }

    /// Default embedder with the preamble for one language loaded from a
    /// file. The language comes from the file name (`capsule.py.tmpl`).
    pub fn from_template_file(path: &Path) -> Result<Self> {
        let language =
            EntryLanguage::from_file_name(path).ok_or_else(|| CapsuleError::UnsupportedLanguage {
                path: path.to_path_buf(),
            })?;
        let template = fs::read_to_string(path)
            .map_err(|err| CapsuleError::io_at("read capsule template", path, err))?;
        Ok(Self::default().with_template(language, template))
    }

    /// Ship a launcher binary next to the entry point.
    #[must_use]
    pub fn with_launcher(mut self, launcher: Option<PathBuf>) -> Self {
        self.launcher = launcher;
        self
    }

    fn template(&self, language: EntryLanguage) -> &str {
        match language {
            EntryLanguage::Shell => &self.shell,
            EntryLanguage::Python => &self.python,
        }
    }

    /// Render the `language` preamble for `config`.
    pub fn render(&self, language: EntryLanguage, config: &CapsuleConfig) -> Result<String> {
        let server = config.server.to_string();
        render_template(
            self.template(language),
            &CapsuleValues {
                server: &server,
                product: &config.product,
                version: &config.version,
            },
        )
    }

    /// Insert the preamble matching the entry point's language and write the
    /// capsule record (and launcher, when configured) into the same
    /// directory.
    ///
    /// The language and values are validated before anything is written.
    pub fn embed(&self, entry_point: &Path, config: &CapsuleConfig) -> Result<EmbeddedCapsule> {
        let original = fs::read_to_string(entry_point)
            .map_err(|err| CapsuleError::io_at("read entry point", entry_point, err))?;
        let language = EntryLanguage::detect(entry_point, &original).ok_or_else(|| {
            CapsuleError::UnsupportedLanguage {
                path: entry_point.to_path_buf(),
            }
        })?;
        let preamble = self.render(language, config)?;
        let dir = entry_point.parent().unwrap_or_else(|| Path::new("."));

        let record = dir.join(CAPSULE_FILE);
        config.save(&record)?;

        let launcher = match &self.launcher {
            Some(source) => {
                let target = dir.join(LAUNCHER_FILE);
                fs::copy(source, &target)
                    .map_err(|err| CapsuleError::io_at("copy launcher", source, err))?;
                Some(target)
            }
            None => None,
        };

        fs::write(entry_point, insert_preamble(&original, &preamble, language))
            .map_err(|err| CapsuleError::io_at("rewrite entry point", entry_point, err))?;
        Ok(EmbeddedCapsule {
            record,
            launcher,
            language,
        })
    }
}
