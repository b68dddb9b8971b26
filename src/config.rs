// Runtime configuration, built in code or read from SHM_RENDER_* variables.

use crate::error::{RenderError, Result};
use std::path::PathBuf;
use std::time::Duration;

pub const ENV_PYTHON: &str = "SHM_RENDER_PYTHON";
pub const ENV_MODULE_DIR: &str = "SHM_RENDER_MODULE_DIR";
pub const ENV_TIMEOUT_MS: &str = "SHM_RENDER_TIMEOUT_MS";
pub const ENV_CLOSE_GRACE_MS: &str = "SHM_RENDER_CLOSE_GRACE_MS";
pub const ENV_RENDERER_MODULE: &str = "SHM_RENDER_RENDERER_MODULE";
pub const ENV_RENDERER_CLASS: &str = "SHM_RENDER_RENDERER_CLASS";
pub const ENV_CREDENTIAL_ENV: &str = "SHM_RENDER_CREDENTIAL_ENV";
pub const ENV_EXTRA_PATH: &str = "SHM_RENDER_EXTRA_PATH";
pub const ENV_INSTALL_PACKAGES: &str = "SHM_RENDER_INSTALL_PACKAGES";

/// Packages the bundled renderer module needs.
pub const RENDERER_PACKAGES: &[&str] = &["numpy", "wgpu-shadertoy"];

#[derive(Clone, Debug)]
pub struct RenderConfig {
    /// Interpreter used for the renderer subprocess.
    pub python: PathBuf,
    /// Parent of the hash-keyed directories holding the bundled modules.
    pub module_cache_root: PathBuf,
    /// Bound on one command round trip. `None` blocks indefinitely.
    pub command_timeout: Option<Duration>,
    /// How long close waits for the subprocess before killing it.
    pub close_grace: Duration,
    pub renderer_module: String,
    pub renderer_class: String,
    /// Remote environment variable that receives the access credential.
    pub credential_env: String,
    /// Extra directories prepended to the subprocess PYTHONPATH.
    pub extra_python_path: Vec<PathBuf>,
    /// Run `pip install` for the renderer packages when initialising.
    pub install_packages: bool,
}

impl Default for RenderConfig {
    fn default() -> Self {
        Self {
            python: PathBuf::from("python3"),
            module_cache_root: std::env::temp_dir().join("shm-render"),
            command_timeout: None,
            close_grace: Duration::from_millis(2000),
            renderer_module: "shadertoyinterop".to_string(),
            renderer_class: "ShadertoyRenderer".to_string(),
            credential_env: "SHADERTOY_KEY".to_string(),
            extra_python_path: Vec::new(),
            install_packages: false,
        }
    }
}

impl RenderConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Defaults overridden by whichever SHM_RENDER_* variables are set.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as [`from_env`](Self::from_env) with a custom variable source.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(python) = get(ENV_PYTHON) {
            config.python = PathBuf::from(python);
        }
        if let Some(dir) = get(ENV_MODULE_DIR) {
            config.module_cache_root = PathBuf::from(dir);
        }
        if let Some(ms) = get(ENV_TIMEOUT_MS) {
            let ms = parse_millis(ENV_TIMEOUT_MS, &ms)?;
            config.command_timeout = (ms > 0).then(|| Duration::from_millis(ms));
        }
        if let Some(ms) = get(ENV_CLOSE_GRACE_MS) {
            config.close_grace = Duration::from_millis(parse_millis(ENV_CLOSE_GRACE_MS, &ms)?);
        }
        if let Some(module) = get(ENV_RENDERER_MODULE) {
            config.renderer_module = module;
        }
        if let Some(class) = get(ENV_RENDERER_CLASS) {
            config.renderer_class = class;
        }
        if let Some(var) = get(ENV_CREDENTIAL_ENV) {
            config.credential_env = var;
        }
        if let Some(paths) = get(ENV_EXTRA_PATH) {
            config.extra_python_path = std::env::split_paths(&paths).collect();
        }
        if let Some(flag) = get(ENV_INSTALL_PACKAGES) {
            config.install_packages = parse_flag(ENV_INSTALL_PACKAGES, &flag)?;
        }

        config.validate()?;
        Ok(config)
    }

    pub fn with_python(mut self, python: impl Into<PathBuf>) -> Self {
        self.python = python.into();
        self
    }

    pub fn with_module_cache_root(mut self, dir: impl Into<PathBuf>) -> Self {
        self.module_cache_root = dir.into();
        self
    }

    pub fn with_command_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.command_timeout = timeout;
        self
    }

    pub fn with_close_grace(mut self, grace: Duration) -> Self {
        self.close_grace = grace;
        self
    }

    pub fn with_renderer(mut self, module: &str, class: &str) -> Self {
        self.renderer_module = module.to_string();
        self.renderer_class = class.to_string();
        self
    }

    pub fn with_credential_env(mut self, var: &str) -> Self {
        self.credential_env = var.to_string();
        self
    }

    pub fn with_extra_python_path(mut self, dir: impl Into<PathBuf>) -> Self {
        self.extra_python_path.push(dir.into());
        self
    }

    pub fn with_install_packages(mut self, install: bool) -> Self {
        self.install_packages = install;
        self
    }

    /// Names spliced into remote commands must be plain identifiers.
    pub fn validate(&self) -> Result<()> {
        let dotted = |s: &str| !s.is_empty() && s.split('.').all(is_identifier);
        if !dotted(&self.renderer_module) {
            return Err(RenderError::InvalidArgument(format!(
                "renderer module {:?} is not a module path",
                self.renderer_module
            )));
        }
        if !is_identifier(&self.renderer_class) {
            return Err(RenderError::InvalidArgument(format!(
                "renderer class {:?} is not an identifier",
                self.renderer_class
            )));
        }
        if !is_identifier(&self.credential_env) {
            return Err(RenderError::InvalidArgument(format!(
                "credential variable {:?} is not an identifier",
                self.credential_env
            )));
        }
        Ok(())
    }
}

fn is_identifier(s: &str) -> bool {
    let mut chars = s.chars();
    matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

fn parse_millis(key: &str, value: &str) -> Result<u64> {
    value.trim().parse::<u64>().map_err(|_| {
        RenderError::InvalidArgument(format!("{} must be milliseconds, got {:?}", key, value))
    })
}

fn parse_flag(key: &str, value: &str) -> Result<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(RenderError::InvalidArgument(format!(
            "{} must be a boolean, got {:?}",
            key, value
        ))),
    }
}
