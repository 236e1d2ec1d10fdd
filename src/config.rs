//! Configuração do ocr-batch carregada a partir de `ocr-batch.toml`.
//!
//! A struct [`OcrConfig`] contém todos os parâmetros configuráveis.
//! Valores não presentes no arquivo usam defaults sensíveis.
//! As variáveis de ambiente `BAIDU_OCR_API_KEY` e `BAIDU_OCR_SECRET_KEY`
//! têm precedência sobre o arquivo.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

use crate::baidu::RecognitionMode;
use crate::baidu::client::{API_URL, TOKEN_URL};
use crate::conditioner::{Limits, QualityLadder};
use crate::error::AppError;
use crate::retry::RetryPolicy;

const DEFAULT_CONFIG_FILE: &str = "ocr-batch.toml";

/// Configuração de nível superior carregada de `ocr-batch.toml`.
#[derive(Debug, Clone, Deserialize)]
pub struct OcrConfig {
    /// API Key da aplicação Baidu.
    #[serde(default)]
    pub api_key: String,

    /// Secret Key da aplicação Baidu.
    #[serde(default)]
    pub secret_key: String,

    /// URL base dos endpoints de OCR.
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// URL do endpoint OAuth de emissão de token.
    #[serde(default = "default_token_url")]
    pub token_url: String,

    /// Modo de reconhecimento.
    #[serde(default)]
    pub mode: RecognitionMode,

    /// Número de workers concorrentes.
    #[serde(default = "default_workers")]
    pub workers: usize,

    /// Tempo limite por chamada de rede, em segundos.
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,

    #[serde(default)]
    pub limits: LimitsConfig,

    #[serde(default)]
    pub retry: RetryConfig,

    #[serde(default)]
    pub conditioning: ConditioningConfig,
}

/// Tetos impostos pelo serviço.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LimitsConfig {
    pub max_dimension: u32,
    pub max_payload_bytes: usize,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        let limits = Limits::default();
        Self {
            max_dimension: limits.max_dimension,
            max_payload_bytes: limits.max_payload_bytes,
        }
    }
}

/// Política de retentativas.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Atraso base em milissegundos para backoff exponencial.
    pub base_delay_ms: u64,
    pub max_rate_limit_retries: u32,
    pub max_network_retries: u32,
    pub max_repairs: u32,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            base_delay_ms: 2000,
            max_rate_limit_retries: 3,
            max_network_retries: 3,
            max_repairs: 1,
        }
    }
}

/// Escada de qualidade JPEG e fator de reparo.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ConditioningConfig {
    pub start_quality: u8,
    pub quality_step: u8,
    pub min_quality: u8,
    /// Fator aplicado aos limites em cada reparo (0 < fator < 1).
    pub repair_factor: f64,
}

impl Default for ConditioningConfig {
    fn default() -> Self {
        let ladder = QualityLadder::default();
        Self {
            start_quality: ladder.start,
            quality_step: ladder.step,
            min_quality: ladder.floor,
            repair_factor: 0.75,
        }
    }
}

// Valor padrão para a URL base: produção da Baidu.
fn default_base_url() -> String {
    API_URL.to_string()
}

fn default_token_url() -> String {
    TOKEN_URL.to_string()
}

// Valor padrão para workers: 3, como no limite de QPS da camada gratuita.
fn default_workers() -> usize {
    3
}

fn default_request_timeout_secs() -> u64 {
    30
}

impl Default for OcrConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            secret_key: String::new(),
            base_url: default_base_url(),
            token_url: default_token_url(),
            mode: RecognitionMode::default(),
            workers: default_workers(),
            request_timeout_secs: default_request_timeout_secs(),
            limits: LimitsConfig::default(),
            retry: RetryConfig::default(),
            conditioning: ConditioningConfig::default(),
        }
    }
}

impl OcrConfig {
    /// Carrega a configuração de `path`, ou de `ocr-batch.toml` no diretório atual.
    /// Usa valores padrão se o arquivo padrão não existir; um caminho explícito
    /// inexistente é erro.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(path) => {
                let contents = std::fs::read_to_string(path)
                    .with_context(|| format!("failed to read {}", path.display()))?;
                Self::parse(&contents)
                    .with_context(|| format!("invalid config {}", path.display()))?
            }
            None => {
                let path = Path::new(DEFAULT_CONFIG_FILE);
                if path.exists() {
                    let contents = std::fs::read_to_string(path)?;
                    Self::parse(&contents)
                        .with_context(|| format!("invalid config {}", path.display()))?
                } else {
                    Self::default()
                }
            }
        };

        // Variáveis de ambiente têm precedência sobre o arquivo para as credenciais.
        if let Some(key) = non_empty_env("BAIDU_OCR_API_KEY") {
            config.api_key = key;
        }
        if let Some(secret) = non_empty_env("BAIDU_OCR_SECRET_KEY") {
            config.secret_key = secret;
        }

        Ok(config)
    }

    fn parse(contents: &str) -> Result<Self, AppError> {
        Ok(toml::from_str(contents)?)
    }

    /// Rejeita combinações que travariam ou esvaziariam a execução.
    pub fn validate(&self) -> Result<(), AppError> {
        if self.workers == 0 {
            return Err(AppError::Config("workers must be at least 1".into()));
        }
        if self.limits.max_dimension == 0 || self.limits.max_payload_bytes == 0 {
            return Err(AppError::Config("limits must be greater than zero".into()));
        }
        let c = &self.conditioning;
        if c.quality_step == 0 || c.start_quality < c.min_quality || c.start_quality > 100 {
            return Err(AppError::Config(format!(
                "invalid quality ladder: start {} step {} floor {}",
                c.start_quality, c.quality_step, c.min_quality
            )));
        }
        if !(c.repair_factor > 0.0 && c.repair_factor < 1.0) {
            return Err(AppError::Config(format!(
                "repair_factor must be in (0, 1), got {}",
                c.repair_factor
            )));
        }
        Ok(())
    }

    /// Exige credenciais antes de qualquer chamada ao serviço.
    pub fn require_credentials(&self) -> Result<(), AppError> {
        if self.api_key.is_empty() || self.secret_key.is_empty() {
            return Err(AppError::Config(
                "missing credentials: set BAIDU_OCR_API_KEY and BAIDU_OCR_SECRET_KEY".into(),
            ));
        }
        Ok(())
    }

    pub fn limits(&self) -> Limits {
        Limits {
            max_dimension: self.limits.max_dimension,
            max_payload_bytes: self.limits.max_payload_bytes,
        }
    }

    pub fn quality_ladder(&self) -> QualityLadder {
        QualityLadder {
            start: self.conditioning.start_quality,
            step: self.conditioning.quality_step,
            floor: self.conditioning.min_quality,
        }
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            base_delay: Duration::from_millis(self.retry.base_delay_ms),
            max_rate_limit_retries: self.retry.max_rate_limit_retries,
            max_network_retries: self.retry.max_network_retries,
            max_repairs: self.retry.max_repairs,
        }
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

fn non_empty_env(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.is_empty())
}
