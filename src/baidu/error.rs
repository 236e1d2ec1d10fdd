//! Tipos de erro para o cliente da API de OCR da Baidu.
//!
//! [`RecognitionError::kind`] é a única função de classificação: toda falha
//! do serviço ou do transporte vira exatamente um [`FailureKind`].

use thiserror::Error;

use crate::error::FailureKind;

/// Códigos de cota/QPS excedida.
const RATE_LIMIT_CODES: &[i64] = &[4, 17, 18, 19];
/// Códigos de permissão, IAM e token inválido/expirado.
const AUTH_CODES: &[i64] = &[6, 14, 110, 111];
/// Códigos que invalidam o token em cache.
pub(crate) const TOKEN_CODES: &[i64] = &[110, 111];
/// "image size error": payload acima de 4 MB ou resolução acima de 4096 px.
const IMAGE_SIZE_ERROR: i64 = 216202;
/// "Service temporarily unavailable".
const SERVICE_UNAVAILABLE: i64 = 2;

/// Erros que podem ocorrer ao chamar a API de OCR.
#[derive(Debug, Error)]
pub enum RecognitionError {
    /// Cota ou limite de QPS atingido (HTTP 429 ou códigos 4/17/18/19).
    #[error("rate limited: {0}")]
    RateLimited(String),

    /// Imagem grande demais em bytes.
    #[error("payload too large: {0}")]
    PayloadTooLarge(String),

    /// Resolução acima do limite do serviço.
    #[error("dimension exceeded: {0}")]
    DimensionExceeded(String),

    /// Credenciais ou token rejeitados.
    #[error("authentication failed: {0}")]
    Auth(String),

    /// A chamada excedeu o tempo limite.
    #[error("request timed out")]
    Timeout,

    /// Serviço temporariamente indisponível (gateway ou código 2).
    #[error("service unavailable: {0}")]
    Unavailable(String),

    /// Falha na camada de rede subjacente.
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),

    /// Erro da API sem mapeamento conhecido.
    #[error("API error {code}: {message}")]
    Api { code: i64, message: String },

    /// Status HTTP sem mapeamento conhecido.
    #[error("HTTP status {status}: {message}")]
    Http { status: u16, message: String },

    /// Corpo da resposta fora do esquema esperado.
    #[error("unexpected response: {0}")]
    Parse(String),
}

impl RecognitionError {
    /// Mapeia um corpo de erro `{error_code, error_msg}`.
    pub fn from_api_error(code: i64, message: String) -> Self {
        if RATE_LIMIT_CODES.contains(&code) {
            RecognitionError::RateLimited(message)
        } else if AUTH_CODES.contains(&code) {
            RecognitionError::Auth(message)
        } else if code == IMAGE_SIZE_ERROR {
            if mentions_dimensions(&message) {
                RecognitionError::DimensionExceeded(message)
            } else {
                RecognitionError::PayloadTooLarge(message)
            }
        } else if code == SERVICE_UNAVAILABLE {
            RecognitionError::Unavailable(message)
        } else {
            RecognitionError::Api { code, message }
        }
    }

    /// Mapeia uma resposta HTTP sem sucesso.
    pub fn from_status(status: u16, message: String) -> Self {
        match status {
            429 => RecognitionError::RateLimited(message),
            413 => RecognitionError::PayloadTooLarge(message),
            401 | 403 => RecognitionError::Auth(message),
            502..=504 => RecognitionError::Unavailable(message),
            _ => RecognitionError::Http { status, message },
        }
    }

    pub fn kind(&self) -> FailureKind {
        match self {
            RecognitionError::RateLimited(_) => FailureKind::RateLimited,
            RecognitionError::PayloadTooLarge(_) => FailureKind::PayloadTooLarge,
            RecognitionError::DimensionExceeded(_) => FailureKind::DimensionExceeded,
            RecognitionError::Auth(_) => FailureKind::AuthError,
            RecognitionError::Timeout | RecognitionError::Unavailable(_) => {
                FailureKind::TransientNetwork
            }
            RecognitionError::Network(e) => {
                if e.is_timeout() || e.is_connect() || e.is_request() {
                    FailureKind::TransientNetwork
                } else {
                    FailureKind::Unclassified
                }
            }
            RecognitionError::Api { .. }
            | RecognitionError::Http { .. }
            | RecognitionError::Parse(_) => FailureKind::Unclassified,
        }
    }
}

fn mentions_dimensions(message: &str) -> bool {
    let lower = message.to_lowercase();
    ["resolution", "dimension", "分辨率"]
        .iter()
        .any(|needle| lower.contains(needle))
}
