use facematch_core::{default_model_dir, DetectorOptions, MatchPolicy, ModelBase};
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

/// Session configuration, loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// V4L2 device path (default: /dev/video0).
    pub camera_device: String,
    /// Directory or http(s) URL holding the model artifacts.
    pub model_base: ModelBase,
    /// Where reference.png / overlay.png are written.
    pub output_dir: PathBuf,
    /// Give up on model loading after this many seconds; 0 waits forever.
    pub model_load_timeout_secs: u64,
    /// Live match loop period.
    pub frame_interval_ms: u64,
    /// Box is drawn as a strong match below this distance.
    pub strong_distance: f32,
    /// Frame counts as a match below this distance.
    pub match_distance: f32,
    /// Minimum detector score.
    pub detection_threshold: f32,
}

impl Config {
    /// Load configuration from `FACEMATCH_*` environment variables with defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(get: impl Fn(&str) -> Option<String>) -> Self {
        let policy = MatchPolicy::default();

        Self {
            camera_device: get("FACEMATCH_CAMERA_DEVICE")
                .unwrap_or_else(|| "/dev/video0".to_string()),
            model_base: get("FACEMATCH_MODEL_BASE")
                .map(|s| ModelBase::parse(&s))
                .unwrap_or_else(|| ModelBase::Directory(default_model_dir())),
            output_dir: get("FACEMATCH_OUTPUT_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("facematch-out")),
            model_load_timeout_secs: parse_var(&get, "FACEMATCH_MODEL_LOAD_TIMEOUT_SECS")
                .unwrap_or(120),
            frame_interval_ms: parse_var(&get, "FACEMATCH_FRAME_INTERVAL_MS").unwrap_or(33),
            strong_distance: parse_var(&get, "FACEMATCH_STRONG_DISTANCE")
                .unwrap_or(policy.strong_distance),
            match_distance: parse_var(&get, "FACEMATCH_MATCH_DISTANCE")
                .unwrap_or(policy.match_distance),
            detection_threshold: parse_var(&get, "FACEMATCH_DETECTION_THRESHOLD")
                .unwrap_or(DetectorOptions::default().score_threshold),
        }
    }

    pub fn model_load_timeout(&self) -> Option<Duration> {
        (self.model_load_timeout_secs > 0)
            .then(|| Duration::from_secs(self.model_load_timeout_secs))
    }

    pub fn frame_interval(&self) -> Duration {
        Duration::from_millis(self.frame_interval_ms.max(1))
    }

    pub fn match_policy(&self) -> MatchPolicy {
        MatchPolicy {
            strong_distance: self.strong_distance,
            match_distance: self.match_distance,
        }
    }

    pub fn detector_options(&self) -> DetectorOptions {
        DetectorOptions {
            score_threshold: self.detection_threshold,
            ..DetectorOptions::default()
        }
    }
}

fn parse_var<T: FromStr>(get: &impl Fn(&str) -> Option<String>, key: &str) -> Option<T> {
    get(key).and_then(|v| v.trim().parse().ok())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config_with(vars: &[(&str, &str)]) -> Config {
        let vars: HashMap<String, String> =
            vars.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        Config::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn test_defaults() {
        let config = config_with(&[]);
        assert_eq!(config.camera_device, "/dev/video0");
        assert_eq!(config.model_base, ModelBase::Directory(default_model_dir()));
        assert_eq!(config.output_dir, PathBuf::from("facematch-out"));
        assert_eq!(config.model_load_timeout(), Some(Duration::from_secs(120)));
        assert_eq!(config.frame_interval(), Duration::from_millis(33));
        assert_eq!(config.match_policy(), MatchPolicy::default());
        assert_eq!(config.detector_options(), DetectorOptions::default());
    }

    #[test]
    fn test_env_overrides() {
        let config = config_with(&[
            ("FACEMATCH_CAMERA_DEVICE", "/dev/video4"),
            ("FACEMATCH_MODEL_BASE", "https://models.example.org/facematch/"),
            ("FACEMATCH_MODEL_LOAD_TIMEOUT_SECS", "0"),
            ("FACEMATCH_FRAME_INTERVAL_MS", "100"),
            ("FACEMATCH_MATCH_DISTANCE", "1.1"),
            ("FACEMATCH_STRONG_DISTANCE", " 0.9 "),
        ]);
        assert_eq!(config.camera_device, "/dev/video4");
        assert_eq!(
            config.model_base,
            ModelBase::Remote("https://models.example.org/facematch".into())
        );
        assert_eq!(config.model_load_timeout(), None);
        assert_eq!(config.frame_interval(), Duration::from_millis(100));
        assert_eq!(
            config.match_policy(),
            MatchPolicy {
                strong_distance: 0.9,
                match_distance: 1.1,
            }
        );
    }

    #[test]
    fn test_unparsable_values_fall_back() {
        let config = config_with(&[
            ("FACEMATCH_FRAME_INTERVAL_MS", "fast"),
            ("FACEMATCH_MATCH_DISTANCE", ""),
        ]);
        assert_eq!(config.frame_interval_ms, 33);
        assert_eq!(config.match_distance, MatchPolicy::default().match_distance);
    }

    #[test]
    fn test_zero_interval_is_clamped() {
        let config = config_with(&[("FACEMATCH_FRAME_INTERVAL_MS", "0")]);
        assert_eq!(config.frame_interval(), Duration::from_millis(1));
    }
}
