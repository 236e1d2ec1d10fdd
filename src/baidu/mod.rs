pub mod client;
pub mod error;
pub mod types;

pub use client::{BaiduClient, Recognizer};
pub use error::RecognitionError;
pub use types::{Recognition, RecognitionMode, TextFragment};
