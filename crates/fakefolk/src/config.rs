use std::time::Duration;

use rand::Rng;
use serde::Deserialize;

use crate::error::ConfigError;
use crate::naming::NamingPool;

const DEFAULT_NAMES: &[&str] = &[
    "Ashgrove", "Birchwood", "Cinderfell", "Duskmoor", "Emberly", "Fenwick", "Galeheart",
    "Hollowell", "Ironside", "Juniper", "Kestrel", "Larkspur", "Marrow", "Nettle", "Oakhaven",
    "Pinecrest", "Quillon", "Rookwood", "Sablewind", "Thornbury", "Umberlee", "Vexley",
    "Willowby", "Yarrow",
];

/// Inclusive range of whole seconds to pick a random delay from.
#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq)]
pub struct DelayRange {
    pub min_s: u64,
    pub max_s: u64,
}

impl DelayRange {
    pub fn pick(&self) -> Duration {
        let s = if self.min_s >= self.max_s {
            self.min_s
        } else {
            rand::thread_rng().gen_range(self.min_s..=self.max_s)
        };
        Duration::from_secs(s)
    }

    fn check(&self, what: &'static str) -> Result<(), ConfigError> {
        if self.min_s > self.max_s {
            return Err(ConfigError::BadDelayRange {
                what,
                min: self.min_s,
                max: self.max_s,
            });
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct AutoQuitConfig {
    pub enabled: bool,
    pub delay: DelayRange,
}

impl Default for AutoQuitConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            delay: DelayRange {
                min_s: 300,
                max_s: 1800,
            },
        }
    }
}

#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct AutoJoinConfig {
    pub enabled: bool,
    pub startup_delay_s: u64,
    pub delay: DelayRange,
}

impl Default for AutoJoinConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            startup_delay_s: 10,
            delay: DelayRange {
                min_s: 30,
                max_s: 120,
            },
        }
    }
}

/// Flags the host applies to a promoted identity's entity.
#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct PresenceFlags {
    pub hide: bool,
    pub invisible: bool,
    pub invulnerable: bool,
    pub no_collision: bool,
    pub no_gravity: bool,
}

/// Where the host places an identity's entity when it spawns.
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct SpawnLocation {
    pub world: String,
    pub x: f64,
    pub y: f64,
    pub z: f64,
    #[serde(default)]
    pub yaw: f32,
    #[serde(default)]
    pub pitch: f32,
}

/// Refuse real players' commands that name an identity.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct BlockInteractionConfig {
    pub enabled: bool,
    /// Sent to the player whose command was refused.
    pub message: String,
}

impl Default for BlockInteractionConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            message: "You can't do that to this player.".to_string(),
        }
    }
}

/// What happens to an identity at promotion.
#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
#[serde(default)]
pub struct OnboardingConfig {
    /// Overrides the host's spawn point for identities.
    pub spawn_location: Option<SpawnLocation>,
    pub presence: PresenceFlags,
    pub permission_group: Option<String>,
    pub permissions: Vec<String>,
    /// Run by the host console; `{name}` and `{uuid}` are substituted.
    pub join_commands_console: Vec<String>,
    /// Run as the identity itself.
    pub join_commands_identity: Vec<String>,
    pub chatter: bool,
    pub auto_quit: AutoQuitConfig,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct EngineConfig {
    pub max_identities: usize,
    /// Where sessions dial. Usually the host's own listener.
    pub join_host: String,
    pub join_port: u16,
    pub promotion_timeout_s: u64,
    pub connect_timeout_s: u64,
    pub names: Vec<String>,
    pub onboarding: OnboardingConfig,
    pub auto_join: AutoJoinConfig,
    pub block_interaction: BlockInteractionConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_identities: 20,
            join_host: "127.0.0.1".to_string(),
            join_port: 25565,
            promotion_timeout_s: 30,
            connect_timeout_s: 10,
            names: DEFAULT_NAMES.iter().map(|s| s.to_string()).collect(),
            onboarding: OnboardingConfig::default(),
            auto_join: AutoJoinConfig::default(),
            block_interaction: BlockInteractionConfig::default(),
        }
    }
}

impl EngineConfig {
    /// Load from `FAKEFOLK_CONFIG` (JSON, optional), apply `FAKEFOLK_*`
    /// overrides, and validate.
    pub fn load() -> Result<Self, ConfigError> {
        let mut cfg = match std::env::var("FAKEFOLK_CONFIG") {
            Ok(path) if !path.trim().is_empty() => Self::from_file(&path)?,
            _ => Self::default(),
        };
        cfg.apply_env(|k| std::env::var(k).ok())?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn from_file(path: &str) -> Result<Self, ConfigError> {
        let s = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_string(),
            source,
        })?;
        serde_json::from_str(&s).map_err(|source| ConfigError::Parse {
            path: path.to_string(),
            source,
        })
    }

    /// Apply environment overrides. `get` is `std::env::var` outside tests.
    pub fn apply_env(&mut self, get: impl Fn(&str) -> Option<String>) -> Result<(), ConfigError> {
        fn parse<T: std::str::FromStr>(
            var: &'static str,
            v: Option<String>,
        ) -> Result<Option<T>, ConfigError> {
            match v.map(|s| s.trim().to_string()).filter(|s| !s.is_empty()) {
                None => Ok(None),
                Some(s) => s
                    .parse()
                    .map(Some)
                    .map_err(|_| ConfigError::BadEnv { var, value: s }),
            }
        }
        fn flag(var: &'static str, v: Option<String>) -> Result<Option<bool>, ConfigError> {
            match v.as_deref().map(str::trim) {
                None | Some("") => Ok(None),
                Some("1") | Some("true") => Ok(Some(true)),
                Some("0") | Some("false") => Ok(Some(false)),
                Some(other) => Err(ConfigError::BadEnv {
                    var,
                    value: other.to_string(),
                }),
            }
        }

        if let Some(v) = parse("FAKEFOLK_MAX_IDENTITIES", get("FAKEFOLK_MAX_IDENTITIES"))? {
            self.max_identities = v;
        }
        if let Some(v) = get("FAKEFOLK_JOIN_HOST").filter(|v| !v.trim().is_empty()) {
            self.join_host = v.trim().to_string();
        }
        if let Some(v) = parse("FAKEFOLK_JOIN_PORT", get("FAKEFOLK_JOIN_PORT"))? {
            self.join_port = v;
        }
        if let Some(v) = parse("FAKEFOLK_PROMOTION_TIMEOUT_S", get("FAKEFOLK_PROMOTION_TIMEOUT_S"))? {
            self.promotion_timeout_s = v;
        }
        if let Some(v) = parse("FAKEFOLK_CONNECT_TIMEOUT_S", get("FAKEFOLK_CONNECT_TIMEOUT_S"))? {
            self.connect_timeout_s = v;
        }
        if let Some(v) = get("FAKEFOLK_NAMES").filter(|v| !v.trim().is_empty()) {
            self.names = v
                .split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect();
        }
        if let Some(v) = flag("FAKEFOLK_AUTO_JOIN", get("FAKEFOLK_AUTO_JOIN"))? {
            self.auto_join.enabled = v;
        }
        if let Some(v) = flag("FAKEFOLK_AUTO_QUIT", get("FAKEFOLK_AUTO_QUIT"))? {
            self.onboarding.auto_quit.enabled = v;
        }
        if let Some(v) = flag("FAKEFOLK_HIDE", get("FAKEFOLK_HIDE"))? {
            self.onboarding.presence.hide = v;
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_identities == 0 {
            return Err(ConfigError::ZeroCapacity);
        }
        if self.promotion_timeout_s == 0 {
            return Err(ConfigError::ZeroTimeout {
                what: "promotion_timeout_s",
            });
        }
        self.auto_join.delay.check("auto_join.delay")?;
        self.onboarding.auto_quit.delay.check("onboarding.auto_quit.delay")?;
        NamingPool::new(self.names.clone(), self.max_identities)?;
        Ok(())
    }

    pub fn naming_pool(&self) -> Result<NamingPool, ConfigError> {
        NamingPool::new(self.names.clone(), self.max_identities)
    }

    pub fn promotion_timeout(&self) -> Duration {
        Duration::from_secs(self.promotion_timeout_s)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_s.max(1))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let m = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect::<HashMap<_, _>>();
        move |k| m.get(k).cloned()
    }

    #[test]
    fn defaults_validate() {
        EngineConfig::default().validate().unwrap();
    }

    #[test]
    fn json_fills_missing_fields_with_defaults() {
        let cfg: EngineConfig = serde_json::from_str(
            r#"{"max_identities": 2, "names": ["a", "b"], "onboarding": {"presence": {"hide": true}}}"#,
        )
        .unwrap();
        assert_eq!(cfg.max_identities, 2);
        assert_eq!(cfg.join_port, 25565);
        assert!(cfg.onboarding.presence.hide);
        assert!(!cfg.onboarding.presence.invisible);
        assert_eq!(cfg.onboarding.auto_quit, AutoQuitConfig::default());
        cfg.validate().unwrap();
    }

    #[test]
    fn env_overrides() {
        let mut cfg = EngineConfig::default();
        cfg.apply_env(env(&[
            ("FAKEFOLK_MAX_IDENTITIES", "3"),
            ("FAKEFOLK_JOIN_PORT", "4000"),
            ("FAKEFOLK_NAMES", "x, y ,z"),
            ("FAKEFOLK_AUTO_JOIN", "1"),
        ]))
        .unwrap();
        assert_eq!(cfg.max_identities, 3);
        assert_eq!(cfg.join_port, 4000);
        assert_eq!(cfg.names, vec!["x", "y", "z"]);
        assert!(cfg.auto_join.enabled);
        cfg.validate().unwrap();
    }

    #[test]
    fn bad_env_values_are_reported() {
        let mut cfg = EngineConfig::default();
        let err = cfg
            .apply_env(env(&[("FAKEFOLK_JOIN_PORT", "lots")]))
            .unwrap_err();
        assert!(matches!(err, ConfigError::BadEnv { var: "FAKEFOLK_JOIN_PORT", .. }));
        let err = cfg.apply_env(env(&[("FAKEFOLK_HIDE", "maybe")])).unwrap_err();
        assert!(matches!(err, ConfigError::BadEnv { var: "FAKEFOLK_HIDE", .. }));
    }

    #[test]
    fn small_pool_refuses_to_start() {
        let cfg = EngineConfig {
            max_identities: 5,
            names: vec!["a".into(), "b".into()],
            ..EngineConfig::default()
        };
        assert!(matches!(
            cfg.validate(),
            Err(ConfigError::NamePoolTooSmall { names: 2, max: 5 })
        ));
    }

    #[test]
    fn zero_promotion_timeout_refuses_to_start() {
        let cfg = EngineConfig {
            promotion_timeout_s: 0,
            ..EngineConfig::default()
        };
        assert!(matches!(
            cfg.validate(),
            Err(ConfigError::ZeroTimeout { what: "promotion_timeout_s" })
        ));
    }

    #[test]
    fn spawn_location_and_block_interaction_from_json() {
        let cfg: EngineConfig = serde_json::from_str(
            r#"{
                "onboarding": {"spawn_location": {"world": "lobby", "x": 0.5, "y": 64.0, "z": -3.5}},
                "block_interaction": {"enabled": true}
            }"#,
        )
        .unwrap();
        let loc = cfg.onboarding.spawn_location.as_ref().unwrap();
        assert_eq!(loc.world, "lobby");
        assert_eq!((loc.x, loc.y, loc.z, loc.yaw), (0.5, 64.0, -3.5, 0.0));
        assert!(cfg.block_interaction.enabled);
        assert_eq!(
            cfg.block_interaction.message,
            BlockInteractionConfig::default().message
        );
        assert!(EngineConfig::default().onboarding.spawn_location.is_none());
    }

    #[test]
    fn inverted_delay_range_refuses_to_start() {
        let mut cfg = EngineConfig::default();
        cfg.auto_join.delay = DelayRange { min_s: 9, max_s: 3 };
        assert!(matches!(
            cfg.validate(),
            Err(ConfigError::BadDelayRange { what: "auto_join.delay", .. })
        ));
    }

    #[test]
    fn delay_pick_stays_in_range() {
        let r = DelayRange { min_s: 2, max_s: 4 };
        for _ in 0..100 {
            let d = r.pick().as_secs();
            assert!((2..=4).contains(&d));
        }
        assert_eq!(DelayRange { min_s: 7, max_s: 7 }.pick().as_secs(), 7);
    }
}
