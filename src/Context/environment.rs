// The interpreter environment shared by every render context in the process.

use crate::config::{RenderConfig, RENDERER_PACKAGES};
use crate::error::{RenderError, Result};
use crate::Channel::repl::{ReplChannel, ReplOptions};
use crate::Channel::CommandChannel;
use lazy_static::lazy_static;
use parking_lot::Mutex;
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::Arc;

pub const REPL_SERVER_FILE: &str = "repl_server.py";

/// Python files shipped inside the library and written out at start-up.
pub const BUNDLED_MODULES: &[(&str, &str)] = &[
    (REPL_SERVER_FILE, include_str!("../../python/repl_server.py")),
    ("shadertoyinterop.py", include_str!("../../python/shadertoyinterop.py")),
];

lazy_static! {
    static ref GLOBAL_ENVIRONMENT: Mutex<Option<Arc<RendererEnvironment>>> = Mutex::new(None);
}

// Serializes materialisation when several environments share a cache root.
static MATERIALIZE_LOCK: Mutex<()> = parking_lot::const_mutex(());

pub struct RendererEnvironment {
    pub(crate) config: RenderConfig,
    pub(crate) module_dir: PathBuf,
    pub(crate) python_version: String,
}

impl RendererEnvironment {
    /// Check the interpreter, write out the bundled modules and, if asked
    /// to, install the renderer packages.
    pub fn initialize(config: RenderConfig) -> Result<Self> {
        config.validate()?;
        let python_version = probe_python(&config.python)?;
        let module_dir = materialize_modules(&config.module_cache_root)?;

        let env = Self {
            config,
            module_dir,
            python_version,
        };
        tracing::info!(
            python = %env.config.python.display(),
            version = %env.python_version,
            modules = %env.module_dir.display(),
            "renderer environment ready"
        );

        if env.config.install_packages {
            env.install_packages(RENDERER_PACKAGES)?;
        }
        Ok(env)
    }

    /// The process-wide environment, built from `RenderConfig::from_env` on
    /// first use and kept until exit. Only the C boundary should need this.
    pub fn global() -> Result<Arc<RendererEnvironment>> {
        let mut slot = GLOBAL_ENVIRONMENT.lock();
        if let Some(env) = slot.as_ref() {
            return Ok(env.clone());
        }
        let env = Arc::new(Self::initialize(RenderConfig::from_env()?)?);
        *slot = Some(env.clone());
        Ok(env)
    }

    pub fn config(&self) -> &RenderConfig {
        &self.config
    }

    pub fn module_dir(&self) -> &Path {
        &self.module_dir
    }

    pub fn python_version(&self) -> &str {
        &self.python_version
    }

    pub fn repl_options(&self) -> ReplOptions {
        let mut python_path = self.config.extra_python_path.clone();
        python_path.push(self.module_dir.clone());
        ReplOptions {
            python: self.config.python.clone(),
            server_script: self.module_dir.join(REPL_SERVER_FILE),
            python_path,
            command_timeout: self.config.command_timeout,
            close_grace: self.config.close_grace,
        }
    }

    /// Start a fresh interpreter for one render context.
    pub fn spawn_channel(&self) -> Result<Box<dyn CommandChannel>> {
        Ok(Box::new(ReplChannel::spawn(&self.repl_options())?))
    }

    /// `python -m pip install <packages>`, output forwarded to the log.
    pub fn install_packages(&self, packages: &[&str]) -> Result<()> {
        tracing::info!(?packages, "installing renderer packages");
        let output = Command::new(&self.config.python)
            .args(["-m", "pip", "install", "--quiet"])
            .args(packages)
            .output()
            .map_err(|e| RenderError::Provisioning(format!("failed to run pip: {}", e)))?;

        for line in String::from_utf8_lossy(&output.stderr).lines() {
            tracing::debug!(target: "shm_render::pip", "{}", line);
        }
        if !output.status.success() {
            return Err(RenderError::Provisioning(format!(
                "pip install {:?} exited with {}",
                packages, output.status
            )));
        }
        Ok(())
    }
}

fn probe_python(python: &Path) -> Result<String> {
    let output = Command::new(python)
        .args(["-c", "import sys; print(sys.version.split()[0])"])
        .output()
        .map_err(|e| {
            RenderError::Provisioning(format!("cannot run {}: {}", python.display(), e))
        })?;
    if !output.status.success() {
        return Err(RenderError::Provisioning(format!(
            "{} exited with {}: {}",
            python.display(),
            output.status,
            String::from_utf8_lossy(&output.stderr).trim()
        )));
    }
    Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
}

/// Hash of the bundled module set; names the cache directory.
pub fn modules_digest() -> String {
    let mut hasher = Sha256::new();
    for (name, source) in BUNDLED_MODULES {
        hasher.update(name.as_bytes());
        hasher.update([0u8]);
        hasher.update(source.as_bytes());
        hasher.update([0u8]);
    }
    format!("{:x}", hasher.finalize())
}

/// Write the bundled modules to `<root>/<digest prefix>/`, reusing the
/// directory when a previous run already wrote the same contents.
pub fn materialize_modules(root: &Path) -> Result<PathBuf> {
    let digest = modules_digest();
    let dir = root.join(&digest[..16]);

    let _guard = MATERIALIZE_LOCK.lock();
    let complete = BUNDLED_MODULES
        .iter()
        .all(|(name, source)| matches!(std::fs::read_to_string(dir.join(name)), Ok(s) if s == *source));
    if complete {
        tracing::debug!(dir = %dir.display(), "reusing bundled modules");
        return Ok(dir);
    }

    std::fs::create_dir_all(&dir).map_err(|e| {
        RenderError::Provisioning(format!("cannot create {}: {}", dir.display(), e))
    })?;
    for (name, source) in BUNDLED_MODULES {
        // Write then rename so a concurrent reader never sees half a file.
        let tmp = dir.join(format!(".{}.{}.tmp", name, std::process::id()));
        std::fs::write(&tmp, source)
            .and_then(|_| std::fs::rename(&tmp, dir.join(name)))
            .map_err(|e| {
                let _ = std::fs::remove_file(&tmp);
                RenderError::Provisioning(format!("cannot write {}: {}", name, e))
            })?;
    }
    tracing::info!(dir = %dir.display(), "wrote bundled modules");
    Ok(dir)
}

impl std::fmt::Debug for RendererEnvironment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        crate::Debug::StructDebug::debug_environment(self, f)
    }
}
