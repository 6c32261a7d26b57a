//! Runtime configuration for the realtime session core
//!
//! Every timing constant the components depend on lives here so tests can shrink
//! them and deployments can override endpoints from the environment.

use crate::error::{Result, SessionError};
use crate::session::ConversationMode;
use std::path::PathBuf;
use std::time::Duration;

/// Audio playback scheduling parameters
#[derive(Debug, Clone)]
pub struct PlaybackConfig {
    /// Source sample rate assumed until the remote side announces one
    pub default_sample_rate: u32,
    /// Source channel count assumed until the remote side announces one
    pub default_channels: u16,
    /// Minimum distance between "now" and the start of a newly scheduled chunk
    pub lookahead: Duration,
    /// Silence after the last scheduled chunk before end-of-speech fires
    pub silence_grace: Duration,
}

impl Default for PlaybackConfig {
    fn default() -> Self {
        Self {
            default_sample_rate: 24_000,
            default_channels: 1,
            lookahead: Duration::from_millis(50),
            silence_grace: Duration::from_millis(350),
        }
    }
}

/// Voice socket parameters
#[derive(Debug, Clone)]
pub struct VoiceChannelConfig {
    /// Setup endpoint that assigns a port/path for a session id
    pub setup_url: Option<String>,
    /// Fixed socket URL, skips the setup call when present
    pub fixed_url: Option<String>,
    /// Host used with the port returned by the setup call
    pub host: String,
    pub secure: bool,
    pub max_reconnect_attempts: u32,
    pub reconnect_delay: Duration,
    pub connect_timeout: Duration,
}

impl Default for VoiceChannelConfig {
    fn default() -> Self {
        Self {
            setup_url: None,
            fixed_url: None,
            host: "localhost".to_string(),
            secure: false,
            max_reconnect_attempts: 3,
            reconnect_delay: Duration::from_millis(1500),
            connect_timeout: Duration::from_secs(10),
        }
    }
}

/// Peer session negotiation parameters
#[derive(Debug, Clone)]
pub struct NegotiationConfig {
    /// Candidate endpoints, tried in order
    pub endpoints: Vec<String>,
    pub attempt_timeout: Duration,
    pub data_channel_label: String,
    pub auth_token: Option<String>,
}

impl Default for NegotiationConfig {
    fn default() -> Self {
        Self {
            endpoints: Vec::new(),
            attempt_timeout: Duration::from_secs(15),
            data_channel_label: "chat".to_string(),
            auth_token: None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct DispatchConfig {
    pub no_channel_retry: Duration,
    pub send_error_retry: Duration,
    /// Per-character playback estimate, used only by the completion watchdog
    pub estimate_per_char: Duration,
    pub estimate_floor: Duration,
    /// Slack added on top of the estimate before the watchdog fires
    pub watchdog_margin: Duration,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            no_channel_retry: Duration::from_millis(300),
            send_error_retry: Duration::from_millis(600),
            estimate_per_char: Duration::from_millis(70),
            estimate_floor: Duration::from_secs(1),
            watchdog_margin: Duration::from_secs(10),
        }
    }
}

#[derive(Debug, Clone)]
pub struct InactivityConfig {
    pub tick_interval: Duration,
    pub max_ticks: u32,
    pub cost_per_tick: u64,
    /// Window after a resume during which renewed activity is watched for before re-arming
    pub resume_grace: Duration,
    /// Quiet period after typing or recording before idle metering starts again
    pub input_settle: Duration,
}

impl Default for InactivityConfig {
    fn default() -> Self {
        Self {
            tick_interval: Duration::from_secs(10),
            max_ticks: 6,
            cost_per_tick: 1,
            resume_grace: Duration::from_secs(5),
            input_settle: Duration::from_secs(5),
        }
    }
}

#[derive(Debug, Clone)]
pub struct HealthConfig {
    /// Initial buffering allowance after a stream attaches
    pub startup_grace: Duration,
    pub sample_interval: Duration,
    /// Fraction of the sampling interval the position must advance to count as fine
    pub stall_fraction: f64,
    pub window: Duration,
    pub stall_threshold: usize,
    /// Delay after a healthy sample before an intentional-disconnect flag self-clears
    pub intentional_clear_delay: Duration,
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            startup_grace: Duration::from_secs(4),
            sample_interval: Duration::from_millis(500),
            stall_fraction: 0.1,
            window: Duration::from_secs(15),
            stall_threshold: 8,
            intentional_clear_delay: Duration::from_secs(3),
        }
    }
}

/// Credit costs per conversation mode
#[derive(Debug, Clone)]
pub struct CreditConfig {
    pub text_cost: u64,
    pub voice_cost: u64,
    pub avatar_cost: u64,
}

impl Default for CreditConfig {
    fn default() -> Self {
        Self {
            text_cost: 0,
            voice_cost: 1,
            avatar_cost: 1,
        }
    }
}

impl CreditConfig {
    /// Balance needed before a mode may open or dispatch
    pub fn required_for(&self, mode: ConversationMode) -> u64 {
        match mode {
            ConversationMode::Text => self.text_cost,
            ConversationMode::TextVoice => self.voice_cost,
            ConversationMode::Avatar | ConversationMode::AvatarText => self.avatar_cost,
        }
    }
}

/// Top-level configuration
#[derive(Debug, Clone)]
pub struct RealtimeConfig {
    /// Base URL for the metering, release and voice setup REST calls
    pub api_base_url: String,
    pub auth_token: Option<String>,
    pub playback: PlaybackConfig,
    pub voice: VoiceChannelConfig,
    pub negotiation: NegotiationConfig,
    pub dispatch: DispatchConfig,
    pub inactivity: InactivityConfig,
    pub health: HealthConfig,
    pub credits: CreditConfig,
    /// Save every played utterance as WAV under this directory
    pub record_dir: Option<PathBuf>,
}

impl Default for RealtimeConfig {
    fn default() -> Self {
        Self {
            api_base_url: "http://localhost:8080".to_string(),
            auth_token: None,
            playback: PlaybackConfig::default(),
            voice: VoiceChannelConfig::default(),
            negotiation: NegotiationConfig::default(),
            dispatch: DispatchConfig::default(),
            inactivity: InactivityConfig::default(),
            health: HealthConfig::default(),
            credits: CreditConfig::default(),
            record_dir: None,
        }
    }
}

impl RealtimeConfig {
    /// Defaults overlaid with `LIVEPERSONA_*` environment variables.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(base) = lookup("LIVEPERSONA_API_BASE") {
            config.api_base_url = base.trim_end_matches('/').to_string();
        }
        config.voice.setup_url = Some(format!("{}/voice/setup", config.api_base_url));

        if let Some(token) = lookup("LIVEPERSONA_AUTH_TOKEN") {
            config.auth_token = Some(token.clone());
            config.negotiation.auth_token = Some(token);
        }
        if let Some(urls) = lookup("LIVEPERSONA_NEGOTIATION_URLS") {
            config.negotiation.endpoints = urls
                .split(',')
                .map(str::trim)
                .filter(|url| !url.is_empty())
                .map(str::to_string)
                .collect();
        }
        if let Some(url) = lookup("LIVEPERSONA_VOICE_URL") {
            config.voice.fixed_url = Some(url);
        }
        if let Some(host) = lookup("LIVEPERSONA_VOICE_HOST") {
            config.voice.host = host;
        }
        if let Some(secure) = lookup("LIVEPERSONA_VOICE_SECURE") {
            config.voice.secure = secure.parse().map_err(|_| {
                SessionError::Other(format!("LIVEPERSONA_VOICE_SECURE must be true or false, got {secure:?}"))
            })?;
        }
        if let Some(dir) = lookup("LIVEPERSONA_RECORD_DIR") {
            config.record_dir = Some(PathBuf::from(dir));
        }

        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_defaults_match_observed_design() {
        let config = RealtimeConfig::default();
        assert_eq!(config.playback.default_sample_rate, 24_000);
        assert_eq!(config.playback.default_channels, 1);
        assert_eq!(config.voice.max_reconnect_attempts, 3);
        assert_eq!(config.voice.reconnect_delay, Duration::from_millis(1500));
        assert_eq!(config.negotiation.attempt_timeout, Duration::from_secs(15));
        assert_eq!(config.dispatch.no_channel_retry, Duration::from_millis(300));
        assert_eq!(config.dispatch.send_error_retry, Duration::from_millis(600));
        assert_eq!(config.inactivity.tick_interval, Duration::from_secs(10));
        assert_eq!(config.inactivity.max_ticks, 6);
        assert_eq!(config.health.sample_interval, Duration::from_millis(500));
        assert_eq!(config.health.window, Duration::from_secs(15));
        assert_eq!(config.health.stall_threshold, 8);
    }

    #[test]
    fn test_env_overlay() {
        let vars: HashMap<&str, &str> = HashMap::from([
            ("LIVEPERSONA_API_BASE", "https://api.example.test/"),
            ("LIVEPERSONA_AUTH_TOKEN", "tok"),
            ("LIVEPERSONA_NEGOTIATION_URLS", "https://a.test/offer, https://b.test/offer,"),
            ("LIVEPERSONA_RECORD_DIR", "/tmp/rec"),
        ]);
        let config = RealtimeConfig::from_lookup(|key| vars.get(key).map(|v| v.to_string())).unwrap();

        assert_eq!(config.api_base_url, "https://api.example.test");
        assert_eq!(config.voice.setup_url.as_deref(), Some("https://api.example.test/voice/setup"));
        assert_eq!(config.negotiation.auth_token.as_deref(), Some("tok"));
        assert_eq!(
            config.negotiation.endpoints,
            vec!["https://a.test/offer".to_string(), "https://b.test/offer".to_string()]
        );
        assert_eq!(config.record_dir, Some(PathBuf::from("/tmp/rec")));
    }

    #[test]
    fn test_bad_secure_flag_is_rejected() {
        let result = RealtimeConfig::from_lookup(|key| {
            (key == "LIVEPERSONA_VOICE_SECURE").then(|| "maybe".to_string())
        });
        assert!(matches!(result, Err(SessionError::Other(_))));
    }

    #[test]
    fn test_mode_costs() {
        let credits = CreditConfig::default();
        assert_eq!(credits.required_for(ConversationMode::Text), 0);
        assert_eq!(credits.required_for(ConversationMode::Avatar), 1);
    }
}
