use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::path::PathBuf;

use crate::audio::{
    AudioBackendConfig, AudioSink, AudioSource, CAPTURE_FRAME_SIZE, CAPTURE_SAMPLE_RATE,
    PLAYBACK_SAMPLE_RATE,
};
use crate::session::{ResponseModality, SessionConfig, DEFAULT_MODEL, DEFAULT_VOICE};
use crate::transport::gemini::GEMINI_LIVE_URL;

/// Prefix of environment overrides, e.g. `LIVE_VOICE__SERVICE__HTTP__PORT=9000`
pub const ENV_PREFIX: &str = "LIVE_VOICE";

/// Fallback source of the API key
pub const API_KEY_ENV: &str = "GEMINI_API_KEY";

const DEFAULT_INSTRUCTION: &str = "You are a job candidate in a live voice interview. \
The user is the interviewer. Keep answers concise enough for conversation. \
If the interviewer asks you to note something down, record feedback, or save a \
salary expectation, use the 'record_interview_note' tool.";

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub service: ServiceConfig,
    pub transport: TransportConfig,
    pub persona: PersonaConfig,
    pub audio: AudioConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    pub name: String,
    pub http: HttpConfig,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            name: "live-voice".to_string(),
            http: HttpConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct HttpConfig {
    pub enabled: bool,
    pub bind: String,
    pub port: u16,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            bind: "127.0.0.1".to_string(),
            port: 3030,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TransportConfig {
    pub endpoint: String,
    pub model: String,
    /// Falls back to `GEMINI_API_KEY`
    pub api_key: Option<String>,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            endpoint: GEMINI_LIVE_URL.to_string(),
            model: DEFAULT_MODEL.to_string(),
            api_key: None,
        }
    }
}

impl TransportConfig {
    pub fn resolve_api_key(&self) -> Result<String> {
        if let Some(key) = self.api_key.as_ref().filter(|k| !k.is_empty()) {
            return Ok(key.clone());
        }

        match std::env::var(API_KEY_ENV) {
            Ok(key) if !key.is_empty() => Ok(key),
            _ => bail!(
                "No API key: set transport.api_key, {}__TRANSPORT__API_KEY or {}",
                ENV_PREFIX,
                API_KEY_ENV
            ),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PersonaConfig {
    /// Inline system instruction
    pub instruction: Option<String>,
    /// File holding the system instruction (takes precedence, `~` expanded)
    pub instruction_file: Option<String>,
    pub voice: Option<String>,
    pub modality: ResponseModality,
}

impl Default for PersonaConfig {
    fn default() -> Self {
        Self {
            instruction: None,
            instruction_file: None,
            voice: Some(DEFAULT_VOICE.to_string()),
            modality: ResponseModality::Audio,
        }
    }
}

impl PersonaConfig {
    pub fn system_instruction(&self) -> Result<String> {
        if let Some(file) = &self.instruction_file {
            let path = shellexpand::tilde(file).into_owned();
            return std::fs::read_to_string(&path)
                .with_context(|| format!("Failed to read persona file {}", path));
        }

        Ok(self
            .instruction
            .clone()
            .unwrap_or_else(|| DEFAULT_INSTRUCTION.to_string()))
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AudioConfig {
    pub capture_sample_rate: u32,
    pub playback_sample_rate: u32,
    pub frame_size: usize,
    /// `microphone` or `file:<path>`
    pub input: String,
    /// `device` or `virtual`
    pub output: String,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            capture_sample_rate: CAPTURE_SAMPLE_RATE,
            playback_sample_rate: PLAYBACK_SAMPLE_RATE,
            frame_size: CAPTURE_FRAME_SIZE,
            input: "microphone".to_string(),
            output: "device".to_string(),
        }
    }
}

impl AudioConfig {
    pub fn backend_config(&self) -> AudioBackendConfig {
        AudioBackendConfig {
            capture_sample_rate: self.capture_sample_rate,
            playback_sample_rate: self.playback_sample_rate,
            frame_size: self.frame_size,
        }
    }

    pub fn input_source(&self) -> Result<AudioSource> {
        match self.input.as_str() {
            "microphone" | "mic" => Ok(AudioSource::Microphone),
            other => match other.strip_prefix("file:") {
                Some(path) if !path.is_empty() => Ok(AudioSource::File(PathBuf::from(
                    shellexpand::tilde(path).into_owned(),
                ))),
                _ => bail!("Unknown audio input '{}' (expected microphone or file:<path>)", other),
            },
        }
    }

    pub fn output_sink(&self) -> Result<AudioSink> {
        match self.output.as_str() {
            "device" | "speaker" => Ok(AudioSink::Device),
            "virtual" | "none" => Ok(AudioSink::Virtual),
            other => bail!("Unknown audio output '{}' (expected device or virtual)", other),
        }
    }
}

impl Config {
    /// Load from an optional file layered under `LIVE_VOICE__*` variables
    pub fn load(path: &str) -> Result<Self> {
        let settings = config::Config::builder()
            .add_source(config::File::with_name(path).required(false))
            .add_source(config::Environment::with_prefix(ENV_PREFIX).separator("__"))
            .build()
            .context("Failed to load configuration")?;

        settings
            .try_deserialize()
            .context("Invalid configuration")
    }

    pub fn session_config(&self) -> Result<SessionConfig> {
        Ok(SessionConfig {
            model: self.transport.model.clone(),
            system_instruction: self.persona.system_instruction()?,
            voice: self.persona.voice.clone(),
            response_modality: self.persona.modality,
            tools: Vec::new(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let cfg = Config::default();
        assert_eq!(cfg.service.http.port, 3030);
        assert_eq!(cfg.audio.capture_sample_rate, 16000);
        assert_eq!(cfg.audio.input_source().unwrap(), AudioSource::Microphone);
        assert_eq!(cfg.audio.output_sink().unwrap(), AudioSink::Device);
        assert!(cfg.persona.system_instruction().unwrap().contains("record_interview_note"));
    }

    #[test]
    fn test_load_partial_file() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            r#"
[service.http]
port = 9100

[audio]
input = "file:/tmp/interview.wav"
output = "virtual"

[persona]
instruction = "Be brief."
modality = "text"
"#
        )
        .unwrap();

        let cfg = Config::load(file.path().to_str().unwrap()).unwrap();
        assert_eq!(cfg.service.http.port, 9100);
        assert_eq!(cfg.service.http.bind, "127.0.0.1");
        assert_eq!(
            cfg.audio.input_source().unwrap(),
            AudioSource::File(PathBuf::from("/tmp/interview.wav"))
        );
        assert_eq!(cfg.audio.output_sink().unwrap(), AudioSink::Virtual);

        let session = cfg.session_config().unwrap();
        assert_eq!(session.system_instruction, "Be brief.");
        assert_eq!(session.response_modality, ResponseModality::Text);
    }

    #[test]
    fn test_missing_file_uses_defaults() {
        let cfg = Config::load("/nonexistent/live-voice").unwrap();
        assert_eq!(cfg.transport.endpoint, GEMINI_LIVE_URL);
    }

    #[test]
    fn test_instruction_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "Persona from file").unwrap();

        let persona = PersonaConfig {
            instruction: Some("ignored".to_string()),
            instruction_file: Some(file.path().display().to_string()),
            ..PersonaConfig::default()
        };
        assert_eq!(persona.system_instruction().unwrap(), "Persona from file");
    }

    #[test]
    fn test_bad_audio_endpoints() {
        let audio = AudioConfig {
            input: "file:".to_string(),
            output: "hdmi".to_string(),
            ..AudioConfig::default()
        };
        assert!(audio.input_source().is_err());
        assert!(audio.output_sink().is_err());
    }

    #[test]
    fn test_explicit_api_key() {
        let transport = TransportConfig {
            api_key: Some("k-123".to_string()),
            ..TransportConfig::default()
        };
        assert_eq!(transport.resolve_api_key().unwrap(), "k-123");
    }
}
