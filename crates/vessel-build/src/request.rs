//! ---
//! vsl_section: "07-build-orchestrator"
//! vsl_subsection: "module"
//! vsl_type: "source"
//! vsl_scope: "code"
//! vsl_description: "Release build pipeline and artifact archival."
//! vsl_version: "v0.0.0-prealpha"
//! vsl_owner: "tbd"
//! ---
use std::path::{Component, Path, PathBuf};

use serde_json::{Map, Value};
use vessel_catalog::{validate_identifier, validate_name};
use vessel_common::ServerEndpoints;
use vessel_versioning::Version;

use crate::error::{BuildError, Result};

/// Version used when the metadata carries none.
pub const DEFAULT_VERSION: &str = "0.0.0";

/// Raw text fields of a build upload.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BuildForm {
    pub identifier: String,
    pub name: String,
    pub password: String,
    pub app: String,
    pub pakked: String,
    pub unpakked: String,
    pub plist: String,
}

/// A validated build request whose paths all live inside the upload root.
#[derive(Debug, Clone)]
pub struct BuildRequest {
    pub identifier: String,
    pub name: String,
    pub password: Option<String>,
    /// Application entry point the capsule is embedded into.
    pub entry_point: PathBuf,
    /// Inputs for the resource packer.
    pub pakked: Vec<PathBuf>,
    /// Resources shipped as-is.
    pub unpakked: Vec<PathBuf>,
    /// Platform metadata handed to the bundler.
    pub metadata: Map<String, Value>,
    pub icon: Option<PathBuf>,
    /// Release server embedded into the capsule.
    pub server: ServerEndpoints,
}

impl BuildRequest {
    /// Resolve form fields against the extracted upload at `root`.
    pub fn from_form(
        form: &BuildForm,
        root: &Path,
        server: ServerEndpoints,
        icon_name: &str,
    ) -> Result<Self> {
        let identifier = required("identifier", &form.identifier)?;
        let name = required("name", &form.name)?;
        let app = required("app", &form.app)?;
        validate_identifier(identifier)?;
        validate_name(name)?;

        let root = root
            .canonicalize()
            .map_err(|err| BuildError::io_at("resolve upload root", root, err))?;
        let entry_point = resolve_inside(&root, "app", app)?;
        if !entry_point.is_file() {
            return Err(BuildError::InvalidField {
                field: "app",
                reason: format!("{app} is not a file in the upload"),
            });
        }

        let pakked = resolve_list(&root, "pakked", &form.pakked)?;
        let unpakked = resolve_list(&root, "unpakked", &form.unpakked)?;

        let password = match form.password.trim() {
            "" => None,
            _ => Some(form.password.clone()),
        };
        if !pakked.is_empty() && password.is_none() {
            return Err(BuildError::MissingField("password"));
        }

        let metadata = parse_metadata(&form.plist)?;
        let icon = Some(root.join(icon_name)).filter(|path| path.is_file());

        Ok(Self {
            identifier: identifier.to_owned(),
            name: name.to_owned(),
            password,
            entry_point,
            pakked,
            unpakked,
            metadata,
            icon,
            server,
        })
    }

    /// Release version from the metadata key, defaulting to `0.0.0`.
    pub fn version(&self, key: &str) -> Result<Version> {
        let raw = match self.metadata.get(key) {
            None | Some(Value::Null) => DEFAULT_VERSION,
            Some(Value::String(value)) if value.trim().is_empty() => DEFAULT_VERSION,
            Some(Value::String(value)) => value.as_str(),
            Some(other) => {
                return Err(BuildError::InvalidField {
                    field: "plist",
                    reason: format!("{key} must be a string, got {other}"),
                })
            }
        };
        Ok(Version::parse(raw)?)
    }
}

fn required<'a>(field: &'static str, value: &'a str) -> Result<&'a str> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        Err(BuildError::MissingField(field))
    } else {
        Ok(trimmed)
    }
}

fn parse_metadata(raw: &str) -> Result<Map<String, Value>> {
    if raw.trim().is_empty() {
        return Ok(Map::new());
    }
    match serde_json::from_str::<Value>(raw) {
        Ok(Value::Object(map)) => Ok(map),
        Ok(_) => Err(BuildError::InvalidField {
            field: "plist",
            reason: "expected a JSON object".into(),
        }),
        Err(err) => Err(BuildError::InvalidField {
            field: "plist",
            reason: err.to_string(),
        }),
    }
}

fn resolve_list(root: &Path, field: &'static str, raw: &str) -> Result<Vec<PathBuf>> {
    raw.split(',')
        .map(str::trim)
        .filter(|item| !item.is_empty())
        .map(|item| {
            let path = resolve_inside(root, field, item)?;
            if path.exists() {
                Ok(path)
            } else {
                Err(BuildError::InvalidField {
                    field,
                    reason: format!("{item} does not exist in the upload"),
                })
            }
        })
        .collect()
}

/// Join `relative` onto `root`, refusing anything that escapes it.
fn resolve_inside(root: &Path, field: &'static str, relative: &str) -> Result<PathBuf> {
    let escapes = || BuildError::InvalidField {
        field,
        reason: format!("{relative} points outside the upload"),
    };
    let candidate = Path::new(relative);
    if candidate
        .components()
        .any(|c| !matches!(c, Component::Normal(_) | Component::CurDir))
    {
        return Err(escapes());
    }
    let joined = root.join(candidate);
    match joined.canonicalize() {
        Ok(resolved) if resolved.starts_with(root) => Ok(resolved),
        Ok(_) => Err(escapes()),
        Err(_) => Ok(joined),
    }
}
