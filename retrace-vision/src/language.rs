//! Extraction languages as a closed enum with a static backend-code table,
//! validated at configuration load instead of rewritten per call.

use clap::ValueEnum;
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Language {
    #[clap(name = "english")]
    English,
    #[clap(name = "chinese")]
    Chinese,
    #[clap(name = "german")]
    German,
    #[clap(name = "spanish")]
    Spanish,
    #[clap(name = "russian")]
    Russian,
    #[clap(name = "korean")]
    Korean,
    #[clap(name = "french")]
    French,
    #[clap(name = "japanese")]
    Japanese,
    #[clap(name = "portuguese")]
    Portuguese,
    #[clap(name = "italian")]
    Italian,
    #[clap(name = "dutch")]
    Dutch,
    #[clap(name = "polish")]
    Polish,
    #[clap(name = "turkish")]
    Turkish,
    #[clap(name = "arabic")]
    Arabic,
    #[clap(name = "hindi")]
    Hindi,
}

impl Language {
    /// The language every extraction falls back to once.
    pub const FALLBACK: Language = Language::English;

    /// Tesseract traineddata code for this language.
    pub fn backend_code(&self) -> &'static str {
        match self {
            Language::English => "eng",
            Language::Chinese => "chi_sim",
            Language::German => "deu",
            Language::Spanish => "spa",
            Language::Russian => "rus",
            Language::Korean => "kor",
            Language::French => "fra",
            Language::Japanese => "jpn",
            Language::Portuguese => "por",
            Language::Italian => "ita",
            Language::Dutch => "nld",
            Language::Polish => "pol",
            Language::Turkish => "tur",
            Language::Arabic => "ara",
            Language::Hindi => "hin",
        }
    }
}

impl fmt::Display for Language {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.backend_code())
    }
}

impl Default for Language {
    fn default() -> Self {
        Language::English
    }
}
