//! Configuração do segjob carregada a partir de `segjob.toml`.
//!
//! A struct [`AppConfig`] agrupa o [`RunnerConfig`] (como invocar o Python da
//! ferramenta externa) e o [`ToolConfig`] (módulo, pasta de trabalho e marcadores
//! de progresso). Valores não presentes no arquivo usam defaults sensíveis.
//! A variável de ambiente `SEGJOB_PYTHON` tem precedência sobre o arquivo.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

use crate::error::JobError;

/// Nome padrão do arquivo de configuração.
pub const CONFIG_FILE: &str = "segjob.toml";

/// Variável de ambiente que sobrescreve `runner.executable`.
pub const PYTHON_ENV_VAR: &str = "SEGJOB_PYTHON";

/// Configuração de nível superior carregada de `segjob.toml`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub runner: RunnerConfig,

    #[serde(default)]
    pub tool: ToolConfig,
}

/// Tipo de ambiente em que a ferramenta externa está instalada.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum EnvironmentKind {
    /// O caminho aponta diretamente para o executável Python.
    #[default]
    Executable,
    /// O caminho é a raiz de um virtualenv.
    VirtualEnv,
    /// O caminho é o prefixo de um ambiente conda.
    CondaEnv,
}

/// Como invocar o interpretador da ferramenta externa.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct RunnerConfig {
    /// Executável ou diretório do ambiente. Vazio significa "não configurado".
    #[serde(default)]
    pub executable: String,

    #[serde(default)]
    pub environment: EnvironmentKind,
}

impl RunnerConfig {
    pub fn new(executable: impl Into<String>, environment: EnvironmentKind) -> Self {
        Self {
            executable: executable.into(),
            environment,
        }
    }

    /// Falha com `ConfigurationError` se nenhum executável/ambiente foi configurado.
    pub fn validate(&self) -> Result<(), JobError> {
        if self.executable.trim().is_empty() {
            return Err(JobError::Configuration(format!(
                "no executable or environment configured; set runner.executable in {CONFIG_FILE} or {PYTHON_ENV_VAR}"
            )));
        }
        Ok(())
    }

    /// Resolve o programa a executar e os argumentos que precedem `-m <module>`.
    pub fn command_prefix(&self) -> (PathBuf, Vec<String>) {
        let path = PathBuf::from(self.executable.trim());
        match self.environment {
            EnvironmentKind::Executable => (path, Vec::new()),
            EnvironmentKind::VirtualEnv => (venv_python(&path), Vec::new()),
            EnvironmentKind::CondaEnv => (
                PathBuf::from("conda"),
                vec![
                    "run".to_string(),
                    "--no-capture-output".to_string(),
                    "-p".to_string(),
                    path.display().to_string(),
                    "python".to_string(),
                ],
            ),
        }
    }
}

#[cfg(windows)]
fn venv_python(root: &Path) -> PathBuf {
    root.join("Scripts").join("python.exe")
}

#[cfg(not(windows))]
fn venv_python(root: &Path) -> PathBuf {
    root.join("bin").join("python")
}

/// Parâmetros da ferramenta externa e da pasta de trabalho.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ToolConfig {
    /// Módulo Python invocado com `-m`.
    #[serde(default = "default_module")]
    pub module: String,

    /// Nome da pasta de trabalho criada dentro do projeto.
    #[serde(default = "default_workspace_dir")]
    pub workspace_dir: String,

    /// Prefixo de linha que marca uma imagem concluída na predição.
    #[serde(default = "default_predict_marker")]
    pub predict_marker: String,

    /// Prefixo de linha que marca uma época concluída no treino.
    #[serde(default = "default_train_marker")]
    pub train_marker: String,

    /// Emite `--use_less_memory` nas predições.
    #[serde(default = "default_use_less_memory")]
    pub use_less_memory: bool,
}

// Valor padrão do módulo: "efficient_v2_unet".
fn default_module() -> String {
    "efficient_v2_unet".to_string()
}

// Valor padrão da pasta de trabalho: "Efficient_V2_UNet".
fn default_workspace_dir() -> String {
    "Efficient_V2_UNet".to_string()
}

fn default_predict_marker() -> String {
    "Tiling".to_string()
}

fn default_train_marker() -> String {
    "Epoch".to_string()
}

fn default_use_less_memory() -> bool {
    true
}

impl Default for ToolConfig {
    fn default() -> Self {
        Self {
            module: default_module(),
            workspace_dir: default_workspace_dir(),
            predict_marker: default_predict_marker(),
            train_marker: default_train_marker(),
            use_less_memory: default_use_less_memory(),
        }
    }
}

impl AppConfig {
    /// Carrega a configuração do caminho informado ou de `segjob.toml` no diretório atual.
    /// Usa valores padrão se o arquivo não existir.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let path = path.unwrap_or_else(|| Path::new(CONFIG_FILE));
        let mut config = Self::from_file(path)?;

        // Variável de ambiente tem precedência sobre o arquivo para o executável.
        if let Ok(python) = std::env::var(PYTHON_ENV_VAR)
            && !python.trim().is_empty()
        {
            config.runner.executable = python;
        }

        Ok(config)
    }

    fn from_file(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        toml::from_str::<AppConfig>(&contents)
            .with_context(|| format!("failed to parse {}", path.display()))
    }
}
