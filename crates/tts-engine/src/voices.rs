use serde::Serialize;

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct VoiceEntry {
    pub id: &'static str,
    pub name: &'static str,
    pub description: &'static str,
    pub language: &'static str,
    /// Reference audio the voice state is derived from. Only the Pocket
    /// model clones voices from a prompt.
    #[serde(skip)]
    pub prompt: Option<&'static str>,
}

/// Fixed voice table plus the legacy alias stage in front of it.
#[derive(Debug)]
pub struct VoiceRegistry {
    entries: &'static [VoiceEntry],
    aliases: &'static [(&'static str, &'static str)],
    default_id: &'static str,
}

impl VoiceRegistry {
    pub const fn new(
        entries: &'static [VoiceEntry],
        aliases: &'static [(&'static str, &'static str)],
        default_id: &'static str,
    ) -> Self {
        Self {
            entries,
            aliases,
            default_id,
        }
    }

    pub fn entries(&self) -> &'static [VoiceEntry] {
        self.entries
    }

    pub fn default_voice(&self) -> &'static VoiceEntry {
        let entries = self.entries;
        self.lookup(self.default_id).unwrap_or(&entries[0])
    }

    /// Case-insensitive lookup by id, without alias or default handling.
    pub fn lookup(&self, id: &str) -> Option<&'static VoiceEntry> {
        self.entries
            .iter()
            .find(|entry| entry.id.eq_ignore_ascii_case(id))
    }

    /// Maps a legacy voice name onto its replacement. Expects a normalized key.
    pub fn alias_target(&self, key: &str) -> Option<&'static str> {
        self.aliases
            .iter()
            .find(|(alias, _)| *alias == key)
            .map(|(_, target)| *target)
    }

    /// Normalizes, applies the alias table once, then falls back to the
    /// default voice for anything unknown.
    pub fn resolve(&self, requested: Option<&str>) -> &'static VoiceEntry {
        let Some(raw) = requested else {
            return self.default_voice();
        };
        let normalized = raw.trim().to_lowercase();
        if normalized.is_empty() {
            return self.default_voice();
        }
        let key = self
            .alias_target(&normalized)
            .unwrap_or(normalized.as_str());
        self.lookup(key).unwrap_or_else(|| self.default_voice())
    }
}

pub const POCKET_DEFAULT_VOICE: &str = "alba";

const POCKET_ENTRIES: &[VoiceEntry] = &[
    VoiceEntry {
        id: "alba",
        name: "Alba",
        description: "Clear female voice, casual style",
        language: "English",
        prompt: Some("hf://kyutai/tts-voices/alba-mackenna/casual.wav"),
    },
    VoiceEntry {
        id: "marius",
        name: "Marius",
        description: "Male voice with natural tone",
        language: "English",
        prompt: Some("hf://kyutai/tts-voices/marius/casual.wav"),
    },
    VoiceEntry {
        id: "javert",
        name: "Javert",
        description: "Deep authoritative male voice",
        language: "English",
        prompt: Some("hf://kyutai/tts-voices/javert/casual.wav"),
    },
    VoiceEntry {
        id: "jean",
        name: "Jean",
        description: "Warm male voice",
        language: "English",
        prompt: Some("hf://kyutai/tts-voices/jean/casual.wav"),
    },
    VoiceEntry {
        id: "fantine",
        name: "Fantine",
        description: "Gentle female voice",
        language: "English",
        prompt: Some("hf://kyutai/tts-voices/fantine/casual.wav"),
    },
    VoiceEntry {
        id: "cosette",
        name: "Cosette",
        description: "Young female voice",
        language: "English",
        prompt: Some("hf://kyutai/tts-voices/cosette/casual.wav"),
    },
    VoiceEntry {
        id: "eponine",
        name: "Eponine",
        description: "Expressive female voice",
        language: "English",
        prompt: Some("hf://kyutai/tts-voices/eponine/casual.wav"),
    },
    VoiceEntry {
        id: "azelma",
        name: "Azelma",
        description: "Soft female voice",
        language: "English",
        prompt: Some("hf://kyutai/tts-voices/azelma/casual.wav"),
    },
];

// Speaker names from the Qwen server, kept so older clients keep working.
const POCKET_ALIASES: &[(&str, &str)] = &[
    ("aiden", "alba"),
    ("ryan", "marius"),
    ("vivian", "cosette"),
    ("serena", "fantine"),
    ("ono_anna", "eponine"),
    ("sohee", "azelma"),
];

pub static POCKET_VOICES: VoiceRegistry =
    VoiceRegistry::new(POCKET_ENTRIES, POCKET_ALIASES, POCKET_DEFAULT_VOICE);

pub const QWEN_DEFAULT_SPEAKER: &str = "Aiden";

const QWEN_ENTRIES: &[VoiceEntry] = &[
    VoiceEntry {
        id: "Aiden",
        name: "Aiden",
        description: "Sunny American male voice with a clear midrange",
        language: "English",
        prompt: None,
    },
    VoiceEntry {
        id: "Ryan",
        name: "Ryan",
        description: "Dynamic male voice with strong rhythmic drive",
        language: "English",
        prompt: None,
    },
    VoiceEntry {
        id: "Vivian",
        name: "Vivian",
        description: "Bright, slightly edgy young female voice",
        language: "Chinese",
        prompt: None,
    },
    VoiceEntry {
        id: "Serena",
        name: "Serena",
        description: "Warm, gentle young female voice",
        language: "Chinese",
        prompt: None,
    },
    VoiceEntry {
        id: "Ono_Anna",
        name: "Ono Anna",
        description: "Playful Japanese female voice",
        language: "Japanese",
        prompt: None,
    },
    VoiceEntry {
        id: "Sohee",
        name: "Sohee",
        description: "Warm Korean female voice with rich emotion",
        language: "Korean",
        prompt: None,
    },
];

pub static QWEN_SPEAKERS: VoiceRegistry =
    VoiceRegistry::new(QWEN_ENTRIES, &[], QWEN_DEFAULT_SPEAKER);
