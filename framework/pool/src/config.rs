//! Fleet configuration, loaded from TOML.
//!
//! Every section has defaults so that an empty file, or no file at all, yields a usable
//! configuration for a runtime whose workspace ships `register`, `start`, `unregister` and `run`
//! executables.

use std::collections::HashMap;
use std::env;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::{FleetError, FleetResult};

/// Environment variable pointing at the fleet configuration file.
pub const FT_FLEET_CONFIG_ENV: &str = "FT_FLEET_CONFIG";

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct FleetConfig {
    pub ports: PortRange,
    pub pool: PoolConfig,
    pub paths: PathsConfig,
    pub controller: ControllerConfig,
    pub runtime: RuntimeConfig,
    pub readiness: ReadinessConfig,
    pub metrics: MetricsConfig,
}

impl FleetConfig {
    /// Load the configuration from an explicit path, from [FT_FLEET_CONFIG_ENV], or fall back to
    /// the defaults when neither is set.
    pub fn load(path: Option<&Path>) -> FleetResult<Self> {
        let from_env = env::var(FT_FLEET_CONFIG_ENV).ok().filter(|p| !p.is_empty());
        let path = match (path, from_env) {
            (Some(path), _) => path.to_path_buf(),
            (None, Some(path)) => PathBuf::from(path),
            (None, None) => {
                log::info!("No fleet configuration given, using defaults");
                return Ok(Self::default());
            }
        };

        log::info!("Loading fleet configuration from {}", path.display());
        let content = std::fs::read_to_string(&path).map_err(|e| {
            FleetError::Config(format!("Cannot read '{}': {e}", path.display()))
        })?;
        let config = Self::from_toml(&content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_toml(content: &str) -> FleetResult<Self> {
        toml::from_str(content).map_err(|e| FleetError::Config(e.to_string()))
    }

    pub fn validate(&self) -> FleetResult<()> {
        if self.ports.start > self.ports.end {
            return Err(FleetError::Config(format!(
                "Port range start {} is after end {}",
                self.ports.start, self.ports.end
            )));
        }
        if self.ports.start == 0 {
            return Err(FleetError::Config(
                "Port 0 cannot be assigned to a runner".to_string(),
            ));
        }
        for (name, template) in self.runtime.commands() {
            if template.is_empty() {
                return Err(FleetError::Config(format!(
                    "The '{name}' command must not be empty"
                )));
            }
        }
        Ok(())
    }

    /// The largest number of runners this fleet can hold.
    pub fn capacity(&self) -> usize {
        let by_ports = self.ports.len();
        self.pool
            .max_runners
            .map_or(by_ports, |max| max.min(by_ports))
    }

    /// Check that every bare program name used by the runtime commands can be found on `PATH`.
    ///
    /// Programs given as a path are resolved inside each runner workspace and cannot be checked
    /// until a workspace exists.
    pub fn check_prerequisites(&self) -> FleetResult<()> {
        for (name, template) in self.runtime.commands() {
            let Some(program) = template.program() else {
                continue;
            };
            if program.contains('/') || program.contains('{') {
                continue;
            }
            which::which(program).map_err(|_| {
                FleetError::Config(format!(
                    "Program '{program}' for the '{name}' command was not found in PATH"
                ))
            })?;
        }
        Ok(())
    }
}

/// An inclusive range of ports that runners may bind.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct PortRange {
    pub start: u16,
    pub end: u16,
}

impl Default for PortRange {
    fn default() -> Self {
        Self {
            start: 8100,
            end: 8199,
        }
    }
}

impl PortRange {
    pub fn new(start: u16, end: u16) -> Self {
        Self { start, end }
    }

    pub fn len(&self) -> usize {
        if self.start > self.end {
            0
        } else {
            usize::from(self.end - self.start) + 1
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn contains(&self, port: u16) -> bool {
        port >= self.start && port <= self.end
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct PoolConfig {
    /// Upper bound on the number of runners, the port range size is used if not set.
    pub max_runners: Option<usize>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct PathsConfig {
    /// Directory holding one workspace per runner.
    pub runner_root: PathBuf,
    /// Directory holding the prebuilt template that workspaces are cloned from.
    pub template_dir: PathBuf,
    /// Directory that scenario run directories are created in.
    pub output_dir: PathBuf,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            runner_root: PathBuf::from("runners"),
            template_dir: PathBuf::from("runners/.template"),
            output_dir: PathBuf::from("scenario_runs"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ControllerConfig {
    /// The remote controller that runners register with.
    pub url: Url,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            url: Url::parse("http://127.0.0.1:8080").expect("Default controller URL is valid"),
        }
    }
}

/// How to drive the opaque runner runtime.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Copied into the template directory before `install` runs.
    pub template_source: Option<PathBuf>,
    /// Run once, inside the template directory, to download and install the runtime.
    pub install: Option<CommandTemplate>,
    pub register: CommandTemplate,
    pub start: CommandTemplate,
    pub unregister: CommandTemplate,
    /// Written to the unregister command's single selection prompt.
    pub unregister_reply: String,
    pub unregister_timeout_ms: u64,
    pub unregister_settle_ms: u64,
    /// Executes one workload invocation.
    pub run: CommandTemplate,
    /// Extra environment for every runtime command.
    pub env: HashMap<String, String>,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            template_source: None,
            install: None,
            register: CommandTemplate::from_args([
                "./register",
                "--url",
                "{url}",
                "--token",
                "{token}",
                "--port",
                "{port}",
            ]),
            start: CommandTemplate::from_args(["./start", "--port", "{port}"]),
            unregister: CommandTemplate::from_args(["./unregister", "--port", "{port}"]),
            unregister_reply: "1".to_string(),
            unregister_timeout_ms: 30_000,
            unregister_settle_ms: 2_000,
            run: CommandTemplate::from_args(["./run", "{job}"]),
            env: HashMap::new(),
        }
    }
}

impl RuntimeConfig {
    fn commands(&self) -> Vec<(&'static str, &CommandTemplate)> {
        let mut commands = vec![
            ("register", &self.register),
            ("start", &self.start),
            ("unregister", &self.unregister),
            ("run", &self.run),
        ];
        if let Some(install) = &self.install {
            commands.push(("install", install));
        }
        commands
    }

    pub fn unregister_timeout(&self) -> Duration {
        Duration::from_millis(self.unregister_timeout_ms)
    }

    pub fn unregister_settle(&self) -> Duration {
        Duration::from_millis(self.unregister_settle_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ReadinessConfig {
    /// How long to watch a freshly started runner before accepting it.
    pub grace_ms: u64,
    pub poll_ms: u64,
    /// Log output that marks a port conflict.
    pub conflict_signature: String,
}

impl Default for ReadinessConfig {
    fn default() -> Self {
        Self {
            grace_ms: 5_000,
            poll_ms: 250,
            conflict_signature: "address already in use".to_string(),
        }
    }
}

impl ReadinessConfig {
    pub fn grace(&self) -> Duration {
        Duration::from_millis(self.grace_ms)
    }

    pub fn poll(&self) -> Duration {
        Duration::from_millis(self.poll_ms.max(10))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct MetricsConfig {
    pub sample_period_ms: u64,
    /// How long sampling loops get to exit before they are aborted.
    pub stop_grace_ms: u64,
    /// Share of host CPU the controller may use before its overhead is reported as skewing the
    /// host metrics.
    pub controller_cpu_warn_percent: f32,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            sample_period_ms: 1_000,
            stop_grace_ms: 2_000,
            controller_cpu_warn_percent: 10.0,
        }
    }
}

/// A command line with `{placeholder}` arguments.
///
/// Supported placeholders are `{index}`, `{port}`, `{url}`, `{token}`, `{job}` and
/// `{workspace}`. Unknown placeholders are passed through untouched.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(transparent)]
pub struct CommandTemplate(Vec<String>);

impl CommandTemplate {
    pub fn from_args<I, S>(args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self(args.into_iter().map(Into::into).collect())
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn program(&self) -> Option<&str> {
        self.0.first().map(String::as_str)
    }

    /// Substitute the placeholders and return the program followed by its arguments.
    pub fn render(&self, vars: &CommandVars) -> Vec<String> {
        self.0.iter().map(|arg| vars.substitute(arg)).collect()
    }

    /// Build a command that runs inside `workspace`.
    ///
    /// A program starting with `./` is resolved relative to the workspace.
    pub fn to_command(
        &self,
        vars: &CommandVars,
        workspace: &Path,
    ) -> FleetResult<tokio::process::Command> {
        let rendered = self.render(vars);
        let (program, args) = rendered
            .split_first()
            .ok_or_else(|| FleetError::Config("Empty command".to_string()))?;

        let program = match program.strip_prefix("./") {
            Some(relative) => workspace.join(relative),
            None => PathBuf::from(program),
        };

        let mut command = tokio::process::Command::new(program);
        command.args(args).current_dir(workspace);
        Ok(command)
    }
}

/// Values for [CommandTemplate] placeholders.
#[derive(Debug, Clone, Default)]
pub struct CommandVars {
    pub index: Option<usize>,
    pub port: Option<u16>,
    pub url: Option<String>,
    pub token: Option<String>,
    pub job: Option<PathBuf>,
    pub workspace: Option<PathBuf>,
}

impl CommandVars {
    fn substitute(&self, arg: &str) -> String {
        let mut out = arg.to_string();
        if let Some(index) = self.index {
            out = out.replace("{index}", &index.to_string());
        }
        if let Some(port) = self.port {
            out = out.replace("{port}", &port.to_string());
        }
        if let Some(url) = &self.url {
            out = out.replace("{url}", url);
        }
        if let Some(token) = &self.token {
            out = out.replace("{token}", token);
        }
        if let Some(job) = &self.job {
            out = out.replace("{job}", &job.to_string_lossy());
        }
        if let Some(workspace) = &self.workspace {
            out = out.replace("{workspace}", &workspace.to_string_lossy());
        }
        out
    }
}
