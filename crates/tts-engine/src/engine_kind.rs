use serde::{Deserialize, Serialize};
use std::{fmt, str::FromStr};

#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EngineKind {
    PocketTts,
    Qwen3Tts,
}

impl EngineKind {
    pub const fn as_str(&self) -> &'static str {
        match self {
            EngineKind::PocketTts => "pocket_tts",
            EngineKind::Qwen3Tts => "qwen3_tts",
        }
    }

    /// Prefix used in startup log lines.
    pub const fn log_label(&self) -> &'static str {
        match self {
            EngineKind::PocketTts => "Pocket-TTS",
            EngineKind::Qwen3Tts => "Qwen3-TTS",
        }
    }
}

impl fmt::Display for EngineKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EngineKind {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "pocket_tts" | "pocket-tts" | "pocket" => Ok(EngineKind::PocketTts),
            "qwen3_tts" | "qwen3-tts" | "qwen" => Ok(EngineKind::Qwen3Tts),
            _ => Err(()),
        }
    }
}
