//! ---
//! vsl_section: "07-build-orchestrator"
//! vsl_subsection: "module"
//! vsl_type: "source"
//! vsl_scope: "code"
//! vsl_description: "Release build pipeline and artifact archival."
//! vsl_version: "v0.0.0-prealpha"
//! vsl_owner: "tbd"
//! ---
//! External packaging tools behind a narrow trait.

use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

use indexmap::IndexMap;
use serde::Serialize;
use serde_json::{Map, Value};
use tracing::{debug, info};
use vessel_common::{BuildConfig, OperatingSystem, ToolCommand};

use crate::error::{BuildError, Result};

/// Environment variable carrying the hex-encoded resource key to the packer.
pub const PACK_KEY_ENV: &str = "VESSEL_PACK_KEY";

const INPUTS_PLACEHOLDER: &str = "{inputs}";
const STDERR_TAIL: usize = 2048;

/// Description of the application handed to the bundler as JSON.
#[derive(Debug, Clone, Serialize)]
pub struct BundleManifest {
    pub identifier: String,
    pub name: String,
    pub version: String,
    pub platform: OperatingSystem,
    pub entry_point: PathBuf,
    pub resources: Vec<PathBuf>,
    pub icon: Option<PathBuf>,
    pub metadata: Map<String, Value>,
}

/// Inputs for the resource packer.
#[derive(Debug, Clone, Copy)]
pub struct PackJob<'a> {
    pub key: &'a str,
    pub inputs: &'a [PathBuf],
    pub output: &'a Path,
}

/// Inputs for the bundler.
#[derive(Debug, Clone, Copy)]
pub struct BundleJob<'a> {
    pub manifest: &'a BundleManifest,
    pub manifest_path: &'a Path,
    pub dist_dir: &'a Path,
}

/// Inputs for the installer creator.
#[derive(Debug, Clone, Copy)]
pub struct InstallerJob<'a> {
    pub bundle: &'a Path,
    pub output_dir: &'a Path,
    pub name: &'a str,
    pub version: &'a str,
}

/// The three packaging tools used by the pipeline.
///
/// Each call must either produce its output or return an error.
pub trait Toolchain: Send + Sync {
    fn pack(&self, job: &PackJob<'_>) -> Result<()>;
    fn bundle(&self, job: &BundleJob<'_>) -> Result<()>;
    fn create_installer(&self, job: &InstallerJob<'_>) -> Result<()>;
}

/// Runs configured external programs.
#[derive(Debug, Clone)]
pub struct ExternalToolchain {
    bundler: ToolCommand,
    installer: ToolCommand,
    packer: ToolCommand,
}

impl ExternalToolchain {
    pub fn new(bundler: ToolCommand, installer: ToolCommand, packer: ToolCommand) -> Self {
        Self {
            bundler,
            installer,
            packer,
        }
    }

    pub fn from_config(config: &BuildConfig) -> Self {
        Self::new(
            config.bundler.clone(),
            config.installer.command.clone(),
            config.packer.clone(),
        )
    }
}

impl Toolchain for ExternalToolchain {
    fn pack(&self, job: &PackJob<'_>) -> Result<()> {
        let mut vars = TemplateVars::new();
        vars.set("output", job.output);
        let args = expand_args(&self.packer.args, &vars, job.inputs);
        run_tool("packer", &self.packer, args, &[(PACK_KEY_ENV, job.key)])
    }

    fn bundle(&self, job: &BundleJob<'_>) -> Result<()> {
        let mut vars = TemplateVars::new();
        vars.set("manifest", job.manifest_path);
        vars.set("dist_dir", job.dist_dir);
        vars.set("name", &job.manifest.name);
        vars.set("version", &job.manifest.version);
        let args = expand_args(&self.bundler.args, &vars, &[]);
        run_tool("bundler", &self.bundler, args, &[])
    }

    fn create_installer(&self, job: &InstallerJob<'_>) -> Result<()> {
        let mut vars = TemplateVars::new();
        vars.set("bundle", job.bundle);
        vars.set("output_dir", job.output_dir);
        vars.set("name", job.name);
        vars.set("version", job.version);
        let args = expand_args(&self.installer.args, &vars, &[]);
        run_tool("installer", &self.installer, args, &[])
    }
}

/// `{placeholder}` values for argument and file name templates.
#[derive(Debug, Clone, Default)]
pub struct TemplateVars {
    values: IndexMap<&'static str, OsString>,
}

impl TemplateVars {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, key: &'static str, value: impl AsRef<std::ffi::OsStr>) {
        self.values.insert(key, value.as_ref().to_owned());
    }

    /// Substitute every known placeholder in `template`. Unknown
    /// placeholders are left as written.
    pub fn render(&self, template: &str) -> OsString {
        if let Some(key) = template
            .strip_prefix('{')
            .and_then(|rest| rest.strip_suffix('}'))
        {
            if let Some(value) = self.values.get(key) {
                return value.clone();
            }
        }
        let mut rendered = template.to_owned();
        for (key, value) in &self.values {
            rendered = rendered.replace(&format!("{{{key}}}"), &value.to_string_lossy());
        }
        rendered.into()
    }
}

/// Expand an argument template list; an argument that is exactly
/// `{inputs}` expands to one argument per input.
pub fn expand_args(args: &[String], vars: &TemplateVars, inputs: &[PathBuf]) -> Vec<OsString> {
    let mut expanded = Vec::with_capacity(args.len() + inputs.len());
    for arg in args {
        if arg == INPUTS_PLACEHOLDER {
            expanded.extend(inputs.iter().map(|input| input.clone().into_os_string()));
        } else {
            expanded.push(vars.render(arg));
        }
    }
    expanded
}

fn run_tool(
    tool: &'static str,
    command: &ToolCommand,
    args: Vec<OsString>,
    extra_env: &[(&str, &str)],
) -> Result<()> {
    info!(tool, program = %command.program, "running external tool");
    debug!(tool, args = ?args, "tool arguments");
    let output = Command::new(&command.program)
        .args(&args)
        .envs(&command.env)
        .envs(extra_env.iter().copied())
        .stdin(Stdio::null())
        .output()
        .map_err(|err| BuildError::ExternalToolFailure {
            tool,
            status: format!("could not start {}: {err}", command.program),
            stderr: String::new(),
        })?;

    if !output.stdout.is_empty() {
        debug!(tool, stdout = %String::from_utf8_lossy(&output.stdout), "tool output");
    }
    if output.status.success() {
        return Ok(());
    }
    Err(BuildError::ExternalToolFailure {
        tool,
        status: output.status.to_string(),
        stderr: stderr_tail(&output.stderr),
    })
}

fn stderr_tail(stderr: &[u8]) -> String {
    let text = String::from_utf8_lossy(stderr);
    let text = text.trim();
    if text.len() <= STDERR_TAIL {
        return text.to_owned();
    }
    let mut start = text.len() - STDERR_TAIL;
    while !text.is_char_boundary(start) {
        start += 1;
    }
    format!("...{}", &text[start..])
}
