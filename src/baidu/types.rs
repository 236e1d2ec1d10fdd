//! Tipos de dados para requisições e respostas da API de OCR da Baidu.
//!
//! As respostas são validadas contra um esquema estrito: um corpo de
//! erro (`error_code`/`error_msg`), um corpo de sucesso com `words_result`
//! ou, no modo tabela, com `form_result`. Qualquer outro formato é tratado
//! como não classificado.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Modo de reconhecimento, mapeado para o endpoint REST correspondente.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum,
)]
#[serde(rename_all = "kebab-case")]
pub enum RecognitionMode {
    /// Reconhecimento geral (`general_basic`).
    General,
    /// Alta precisão (`accurate_basic`).
    #[default]
    Accurate,
    /// Texto manuscrito (`handwriting`).
    Handwriting,
    /// Tabelas (`form`), devolvidas como linhas de células.
    Table,
    /// Chinês e inglês misturados (`general` com `language_type=CHN_ENG`).
    MultiLanguage,
}

impl RecognitionMode {
    /// Segmento de caminho do endpoint sob `/rest/2.0/ocr/v1`.
    pub fn endpoint(self) -> &'static str {
        match self {
            RecognitionMode::General => "general_basic",
            RecognitionMode::Accurate => "accurate_basic",
            RecognitionMode::Handwriting => "handwriting",
            RecognitionMode::Table => "form",
            RecognitionMode::MultiLanguage => "general",
        }
    }

    /// Campos de formulário específicos do modo, além de `image`.
    pub fn extra_params(self) -> &'static [(&'static str, &'static str)] {
        match self {
            RecognitionMode::Table => &[("is_sync", "true"), ("request_type", "json")],
            RecognitionMode::MultiLanguage => &[("language_type", "CHN_ENG")],
            RecognitionMode::General | RecognitionMode::Accurate | RecognitionMode::Handwriting => {
                &[]
            }
        }
    }

    /// O endpoint de tabelas não aceita `detect_direction`.
    pub fn detects_direction(self) -> bool {
        self != RecognitionMode::Table
    }
}

impl fmt::Display for RecognitionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RecognitionMode::General => write!(f, "general"),
            RecognitionMode::Accurate => write!(f, "accurate"),
            RecognitionMode::Handwriting => write!(f, "handwriting"),
            RecognitionMode::Table => write!(f, "table"),
            RecognitionMode::MultiLanguage => write!(f, "multi-language"),
        }
    }
}

/// Resposta do endpoint OAuth `/oauth/2.0/token`.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub(crate) enum TokenReply {
    Granted {
        access_token: String,
        /// Validade em segundos.
        expires_in: u64,
    },
    Denied {
        error: String,
        #[serde(default)]
        error_description: Option<String>,
    },
}

/// Resposta de um endpoint de reconhecimento.
///
/// A variante de erro vem primeiro: um corpo com `error_code` nunca é
/// interpretado como sucesso.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub(crate) enum OcrReply {
    Error { error_code: i64, error_msg: String },
    Words(WordsResponse),
    Form(FormResponse),
}

#[derive(Debug, Deserialize)]
pub(crate) struct WordsResponse {
    #[serde(default)]
    pub log_id: Option<u64>,
    pub words_result: Vec<WordResult>,
    /// Orientação detectada (presente quando `detect_direction=true`).
    #[serde(default)]
    pub direction: Option<i32>,
    #[serde(default)]
    pub form_result: Option<Vec<FormRow>>,
}

/// Resposta do endpoint `form` sem `words_result`.
#[derive(Debug, Deserialize)]
pub(crate) struct FormResponse {
    #[serde(default)]
    pub log_id: Option<u64>,
    pub form_result: Vec<FormRow>,
}

/// Entradas sem `row` são ignoradas.
#[derive(Debug, Deserialize)]
pub(crate) struct FormRow {
    #[serde(default)]
    pub row: Option<Vec<String>>,
}

fn table_rows(form_result: Option<Vec<FormRow>>) -> Vec<Vec<String>> {
    form_result
        .unwrap_or_default()
        .into_iter()
        .filter_map(|r| r.row)
        .collect()
}

#[derive(Debug, Deserialize)]
pub(crate) struct WordResult {
    pub words: String,
    #[serde(default)]
    pub location: Option<Location>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct Location {
    pub top: u32,
}

/// Um fragmento de texto reconhecido, na ordem devolvida pelo serviço.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TextFragment {
    pub text: String,
    /// Coordenada vertical do topo do fragmento, quando disponível.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub top: Option<u32>,
}

/// Resultado estruturado de um reconhecimento bem-sucedido.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Recognition {
    pub fragments: Vec<TextFragment>,
    /// Linhas de células, no modo tabela.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub table: Vec<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub direction: Option<i32>,
    /// Identificador da requisição no serviço, útil para suporte.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub log_id: Option<u64>,
}

impl Recognition {
    /// Número de caracteres (não bytes) em todos os fragmentos e células.
    pub fn char_count(&self) -> usize {
        let text: usize = self.fragments.iter().map(|f| f.text.chars().count()).sum();
        let cells: usize = self
            .table
            .iter()
            .flatten()
            .map(|cell| cell.chars().count())
            .sum();
        text + cells
    }
}

impl From<WordsResponse> for Recognition {
    fn from(resp: WordsResponse) -> Self {
        Self {
            fragments: resp
                .words_result
                .into_iter()
                .map(|w| TextFragment {
                    text: w.words,
                    top: w.location.map(|l| l.top),
                })
                .collect(),
            table: table_rows(resp.form_result),
            direction: resp.direction,
            log_id: resp.log_id,
        }
    }
}

impl From<FormResponse> for Recognition {
    fn from(resp: FormResponse) -> Self {
        Self {
            table: table_rows(Some(resp.form_result)),
            log_id: resp.log_id,
            ..Self::default()
        }
    }
}
