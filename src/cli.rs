//! Interface de linha de comando do ocr-batch baseada em clap.
//!
//! Define a struct [`Cli`] com subcomandos [`Command`] (run, retry, condition)
//! e flags globais (--config, --workers, --max-retries, --mode, --verbose).

use std::path::PathBuf;

use clap::{Parser, Subcommand};

use crate::baidu::RecognitionMode;
use crate::error::FailureKind;

/// ocr-batch: reconhecimento de texto em lote com a API de OCR da Baidu.
#[derive(Debug, Parser)]
#[command(name = "ocr-batch", version, about)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Arquivo de configuração (padrão: ./ocr-batch.toml).
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Número de workers concorrentes.
    #[arg(long, global = true)]
    pub workers: Option<usize>,

    /// Número máximo de retentativas por causa (cota e rede).
    #[arg(long, global = true)]
    pub max_retries: Option<u32>,

    /// Modo de reconhecimento.
    #[arg(long, global = true)]
    pub mode: Option<RecognitionMode>,

    /// Habilita saída detalhada (verbose).
    #[arg(long, short, global = true, default_value_t = false)]
    pub verbose: bool,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Processa as imagens fornecidas.
    Run {
        /// Imagens a processar.
        paths: Vec<PathBuf>,

        /// Diretório com imagens (.jpg .jpeg .png .bmp .tiff).
        #[arg(long)]
        dir: Option<PathBuf>,

        /// Salva o resumo da execução em JSON.
        #[arg(long)]
        report: Option<PathBuf>,

        /// Diretório onde gravar um markdown por imagem reconhecida.
        #[arg(long)]
        output_dir: Option<PathBuf>,
    },

    /// Reenvia as falhas de um relatório salvo.
    Retry {
        /// Relatório JSON gerado por `run --report`.
        #[arg(long)]
        report: PathBuf,

        /// Reenvia apenas falhas destes tipos (repetível).
        #[arg(long = "kind", value_enum)]
        kinds: Vec<FailureKind>,

        /// Diretório onde gravar um markdown por imagem reconhecida.
        #[arg(long)]
        output_dir: Option<PathBuf>,

        /// Salva o resumo da nova execução em JSON.
        #[arg(long)]
        save_report: Option<PathBuf>,
    },

    /// Condiciona uma imagem localmente, sem chamar o serviço.
    Condition {
        /// Imagem de entrada.
        input: PathBuf,

        /// Arquivo JPEG de saída.
        #[arg(long)]
        out: PathBuf,
    },
}
