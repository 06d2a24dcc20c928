//! Layered config loader: file, then environment, then CLI flags.
//!
//! Layered file → environment → CLI, pared down to the handful of fields
//! this crate actually names: the agent mode (advisory, never enforced
//! by the core), the data directory, the server port, and each new
//! board's default `resume_mode`.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::store::models::ResumeMode;

/// `agent.mode` is advisory only; never enforced by the core.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AgentMode {
    Autonomous,
    Collaborative,
    Supervised,
}

impl Default for AgentMode {
    fn default() -> Self {
        Self::Collaborative
    }
}

impl std::str::FromStr for AgentMode {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "autonomous" => Ok(Self::Autonomous),
            "collaborative" => Ok(Self::Collaborative),
            "supervised" => Ok(Self::Supervised),
            other => anyhow::bail!(
                "invalid agent.mode '{other}'. Valid values: autonomous, collaborative, supervised"
            ),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct AgentSection {
    #[serde(default)]
    mode: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct DataSection {
    #[serde(default)]
    dir: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct ServerSection {
    #[serde(default)]
    port: Option<u16>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct BoardDefaultsSection {
    #[serde(default)]
    resume_mode: Option<String>,
}

/// On-disk shape of `.egenskriven/config.toml`
/// Every field is optional; a config file may set any subset of sections.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct ConfigFile {
    #[serde(default)]
    agent: AgentSection,
    #[serde(default)]
    data: DataSection,
    #[serde(default)]
    server: ServerSection,
    #[serde(default)]
    board_defaults: BoardDefaultsSection,
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("./pb_data")
}

fn default_server_port() -> u16 {
    8090
}

/// The resolved, layered configuration: file → environment → CLI flags,
/// each layer overriding the previous one only where it actually sets a
/// value.
#[derive(Debug, Clone)]
pub struct Config {
    /// Absolute path to the project root this config was loaded for.
    pub project_dir: PathBuf,
    /// Data directory; defaults to `./pb_data`.
    pub data_dir: PathBuf,
    /// Port `egenskriven serve` binds to by default.
    pub server_port: u16,
    /// Advisory only; the core never enforces it.
    pub agent_mode: AgentMode,
    /// Applied to newly created boards whose `--resume-mode` flag is
    /// absent; does not affect existing boards.
    pub board_default_resume_mode: ResumeMode,
    pub verbose: bool,
}

/// CLI-flag overrides, applied last and therefore highest-priority.
#[derive(Debug, Clone, Default)]
pub struct ConfigOverrides {
    pub data_dir: Option<PathBuf>,
    pub server_port: Option<u16>,
    pub verbose: Option<bool>,
}

impl Config {
    /// Load layered config for `project_dir`: `.egenskriven/config.toml` (if
    /// present) → `EGENSKRIVEN_*` environment variables → `overrides`.
    pub fn load(project_dir: &Path, overrides: ConfigOverrides) -> Result<Self> {
        let project_dir = project_dir
            .canonicalize()
            .with_context(|| format!("failed to resolve project dir {}", project_dir.display()))?;

        let file = Self::read_file(&project_dir.join(".egenskriven").join("config.toml"))?;

        let mut data_dir = file
            .data
            .dir
            .map(PathBuf::from)
            .unwrap_or_else(default_data_dir);
        let mut server_port = file.server.port.unwrap_or_else(default_server_port);
        let mut agent_mode = match file.agent.mode {
            Some(ref s) => s.parse()?,
            None => AgentMode::default(),
        };
        let board_default_resume_mode = match file.board_defaults.resume_mode {
            Some(ref s) => ResumeMode::from_str(s).map_err(|e| anyhow::anyhow!(e))?,
            None => ResumeMode::default(),
        };
        let mut verbose = false;

        if let Ok(dir) = std::env::var("EGENSKRIVEN_DATA_DIR") {
            data_dir = PathBuf::from(dir);
        }
        if let Ok(port) = std::env::var("EGENSKRIVEN_PORT") {
            server_port = port
                .parse()
                .context("EGENSKRIVEN_PORT must be a valid u16")?;
        }
        if let Ok(mode) = std::env::var("EGENSKRIVEN_AGENT_MODE") {
            agent_mode = mode.parse()?;
        }

        if let Some(dir) = overrides.data_dir {
            data_dir = dir;
        }
        if let Some(port) = overrides.server_port {
            server_port = port;
        }
        if let Some(v) = overrides.verbose {
            verbose = v;
        }

        if !data_dir.is_absolute() {
            data_dir = project_dir.join(data_dir);
        }

        Ok(Self {
            project_dir,
            data_dir,
            server_port,
            agent_mode,
            board_default_resume_mode,
            verbose,
        })
    }

    /// The SQLite database file within `data_dir`.
    pub fn db_path(&self) -> PathBuf {
        self.data_dir.join("data.db")
    }

    fn read_file(path: &Path) -> Result<ConfigFile> {
        if !path.exists() {
            return Ok(ConfigFile::default());
        }
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file {}", path.display()))?;
        toml::from_str(&text).with_context(|| format!("failed to parse config file {}", path.display()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn defaults_when_no_config_file_present() {
        let dir = tempdir().unwrap();
        let config = Config::load(dir.path(), ConfigOverrides::default()).unwrap();
        assert_eq!(config.data_dir, config.project_dir.join("pb_data"));
        assert_eq!(config.server_port, 8090);
        assert_eq!(config.agent_mode, AgentMode::Collaborative);
    }

    #[test]
    fn file_layer_is_read_when_present() {
        let dir = tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join(".egenskriven")).unwrap();
        std::fs::write(
            dir.path().join(".egenskriven/config.toml"),
            "[agent]\nmode = \"autonomous\"\n[server]\nport = 9001\n[board_defaults]\nresume_mode = \"auto\"\n",
        )
        .unwrap();
        let config = Config::load(dir.path(), ConfigOverrides::default()).unwrap();
        assert_eq!(config.agent_mode, AgentMode::Autonomous);
        assert_eq!(config.server_port, 9001);
        assert_eq!(config.board_default_resume_mode, ResumeMode::Auto);
    }

    #[test]
    fn cli_override_beats_file_layer() {
        let dir = tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join(".egenskriven")).unwrap();
        std::fs::write(
            dir.path().join(".egenskriven/config.toml"),
            "[server]\nport = 9001\n",
        )
        .unwrap();
        let overrides = ConfigOverrides {
            server_port: Some(7000),
            ..Default::default()
        };
        let config = Config::load(dir.path(), overrides).unwrap();
        assert_eq!(config.server_port, 7000);
    }

    #[test]
    fn data_dir_override_is_resolved_absolute() {
        let dir = tempdir().unwrap();
        let overrides = ConfigOverrides {
            data_dir: Some(PathBuf::from("custom_data")),
            ..Default::default()
        };
        let config = Config::load(dir.path(), overrides).unwrap();
        assert!(config.data_dir.is_absolute());
        assert_eq!(config.db_path().file_name().unwrap(), "data.db");
    }
}
