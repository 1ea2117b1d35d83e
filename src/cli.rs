//! Interface de linha de comando do segjob baseada em clap.
//!
//! Define a struct [`Cli`] com subcomandos [`Command`] (predict, train, run,
//! load-mask, model-info, status) e flags globais (--config, --verbose, --project).

use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};

use crate::orchestrator::ResidualDecision;
use crate::state_machine::BaseModel;

/// segjob: orquestra treino e predição de segmentação com uma ferramenta externa.
#[derive(Debug, Parser)]
#[command(name = "segjob", version, about)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Arquivo de configuração (padrão: ./segjob.toml).
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Pasta do projeto com as imagens.
    #[arg(long, short, global = true, default_value = ".")]
    pub project: PathBuf,

    /// Habilita saída detalhada (verbose).
    #[arg(long, short, global = true, default_value_t = false)]
    pub verbose: bool,
}

/// Modelo base aceito pela CLI, mapeado para [`BaseModel`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum BaseModelArg {
    B0,
    B1,
    B2,
    B3,
    S,
    M,
    L,
}

impl From<BaseModelArg> for BaseModel {
    fn from(arg: BaseModelArg) -> Self {
        match arg {
            BaseModelArg::B0 => BaseModel::B0,
            BaseModelArg::B1 => BaseModel::B1,
            BaseModelArg::B2 => BaseModel::B2,
            BaseModelArg::B3 => BaseModel::B3,
            BaseModelArg::S => BaseModel::S,
            BaseModelArg::M => BaseModel::M,
            BaseModelArg::L => BaseModel::L,
        }
    }
}

/// O que fazer com dados de treino residuais em images/ e masks/.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum ResidualArg {
    Keep,
    Delete,
}

impl From<ResidualArg> for ResidualDecision {
    fn from(arg: ResidualArg) -> Self {
        match arg {
            ResidualArg::Keep => ResidualDecision::Keep,
            ResidualArg::Delete => ResidualDecision::Delete,
        }
    }
}

/// Opções de importação comuns a predict e load-mask.
#[derive(Debug, Clone, clap::Args)]
pub struct ImportArgs {
    /// Cria uma anotação por componente conectado.
    #[arg(long, default_value_t = false)]
    pub split: bool,

    /// Remove as anotações existentes antes de importar.
    #[arg(long, default_value_t = false)]
    pub remove_existing: bool,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Segmenta imagens com um modelo treinado e importa as máscaras.
    Predict {
        /// Imagens do projeto (padrão: todas).
        images: Vec<String>,

        /// Arquivo do modelo (.h5).
        #[arg(long)]
        model: PathBuf,

        /// Fator de resolução 1, 2 ou 3 (padrão: metadados do modelo ou 1).
        #[arg(long)]
        resolution: Option<u8>,

        /// Limiar em [0, 1] (padrão: metadados do modelo ou 0.5).
        #[arg(long)]
        threshold: Option<f64>,

        /// Classe das anotações criadas.
        #[arg(long = "class")]
        class: String,

        #[command(flatten)]
        import: ImportArgs,

        /// Imprime o resultado completo em JSON.
        #[arg(long, default_value_t = false)]
        json: bool,
    },

    /// Treina um novo modelo a partir das anotações das imagens.
    Train {
        /// Imagens do projeto (padrão: todas).
        images: Vec<String>,

        /// Arquitetura base.
        #[arg(long, value_enum)]
        base_model: BaseModelArg,

        /// Número de épocas.
        #[arg(long)]
        epochs: u32,

        /// Classe que define as regiões de recorte (opcional).
        #[arg(long)]
        crop_class: Option<String>,

        /// Classe que marca os pixels de interesse.
        #[arg(long = "fg-class")]
        foreground_class: String,

        /// Nome do modelo (padrão: EfficientV2UNet_<base>_epochs<n>).
        #[arg(long)]
        name: Option<String>,

        /// Decisão para dados residuais em images/ e masks/.
        #[arg(long, value_enum, default_value_t = ResidualArg::Keep)]
        on_residual: ResidualArg,

        /// Imprime o resultado completo em JSON.
        #[arg(long, default_value_t = false)]
        json: bool,
    },

    /// Executa um job descrito em um arquivo JSON ou TOML.
    Run {
        /// Caminho para o arquivo do job.
        file: PathBuf,

        /// Decisão para dados residuais em images/ e masks/.
        #[arg(long, value_enum, default_value_t = ResidualArg::Keep)]
        on_residual: ResidualArg,
    },

    /// Importa uma máscara de rótulos como anotações de uma imagem.
    LoadMask {
        /// Arquivo da máscara.
        mask: PathBuf,

        /// Imagem do projeto que recebe as anotações.
        #[arg(long)]
        image: String,

        /// Classe por rótulo, no formato ID=CLASSE (pode repetir).
        #[arg(long = "label", value_parser = parse_label, required = true)]
        labels: Vec<(u16, String)>,

        #[command(flatten)]
        import: ImportArgs,
    },

    /// Mostra os parâmetros sugeridos nos metadados de um modelo.
    ModelInfo {
        /// Arquivo do modelo (.h5).
        model: PathBuf,
    },

    /// Mostra o estado da pasta de trabalho do projeto.
    Status,
}

/// Nome padrão de um modelo treinado.
pub fn default_model_name(base: BaseModel, epochs: u32) -> String {
    format!("EfficientV2UNet_{base}_epochs{epochs}")
}

fn parse_label(s: &str) -> Result<(u16, String), String> {
    let (id, class) = s
        .split_once('=')
        .ok_or_else(|| format!("expected ID=CLASS, got '{s}'"))?;
    let id: u16 = id.trim().parse().map_err(|e| format!("invalid label id '{id}': {e}"))?;
    if id == 0 {
        return Err("label 0 is the background".to_string());
    }
    let class = class.trim();
    if class.is_empty() {
        return Err(format!("empty class name for label {id}"));
    }
    Ok((id, class.to_string()))
}
