use anyhow::{Context, Result};
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::enrollment::EnrollmentPolicy;
use crate::quality::QualityGate;
use crate::runner::{EnrollmentOptions, Pacing};
use crate::verification::VerificationParams;

pub static CONFIG_PATH: Lazy<&'static Path> = Lazy::new(|| {
    Path::new(option_env!("FACEGATE_CONFIG_PATH").unwrap_or("/usr/local/etc/facegate/config.toml"))
});

pub static PROFILE_STORE_PREFIX: Lazy<&'static Path> = Lazy::new(|| {
    Path::new(option_env!("FACEGATE_STORE_PREFIX").unwrap_or("/usr/local/etc/facegate"))
});

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub camera: String,
    pub models: ModelPaths,
    pub enrollment: EnrollmentConfig,
    pub verification: VerificationConfig,
    pub quality: QualityGate,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            camera: "/dev/video0".to_string(),
            models: ModelPaths::default(),
            enrollment: EnrollmentConfig::default(),
            verification: VerificationConfig::default(),
            quality: QualityGate::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelPaths {
    pub detector: PathBuf,
    pub recognizer: PathBuf,
}

impl Default for ModelPaths {
    fn default() -> Self {
        let prefix = PROFILE_STORE_PREFIX.join("models");
        Self {
            detector: prefix.join("face_detection_yunet_2023mar.onnx"),
            recognizer: prefix.join("face_recognition_sface_2021dec.onnx"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EnrollmentConfig {
    #[serde(flatten)]
    pub policy: EnrollmentPolicy,
    pub capture_delay_ms: u64,
    pub frame_delay_ms: u64,
}

impl Default for EnrollmentConfig {
    fn default() -> Self {
        Self {
            policy: EnrollmentPolicy::default(),
            capture_delay_ms: 800,
            frame_delay_ms: 50,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VerificationConfig {
    #[serde(flatten)]
    pub params: VerificationParams,
    pub frame_delay_ms: u64,
}

impl Default for VerificationConfig {
    fn default() -> Self {
        Self {
            params: VerificationParams::default(),
            frame_delay_ms: 100,
        }
    }
}

impl Config {
    pub fn enrollment_options(&self) -> EnrollmentOptions {
        EnrollmentOptions {
            policy: self.enrollment.policy.clone(),
            quality: self.quality,
            pacing: Pacing {
                frame_delay: Duration::from_millis(self.enrollment.frame_delay_ms),
                capture_delay: Duration::from_millis(self.enrollment.capture_delay_ms),
            },
        }
    }

    /// Verification parameters, with `tolerance` overriding the configured one.
    pub fn verification_params(&self, tolerance: Option<f64>) -> VerificationParams {
        let mut params = self.verification.params.clone();
        if let Some(tolerance) = tolerance {
            params.tolerance = tolerance;
        }
        params
    }

    pub fn verification_pacing(&self) -> Pacing {
        Pacing {
            frame_delay: Duration::from_millis(self.verification.frame_delay_ms),
            capture_delay: Duration::ZERO,
        }
    }
}

pub fn load_config(path: Option<&Path>) -> Result<Config> {
    let path = path.unwrap_or(&CONFIG_PATH);
    if !path.exists() {
        return Ok(Config::default());
    }
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("reading config at {}", path.display()))?;
    let cfg: Config =
        toml::from_str(&raw).with_context(|| format!("parsing config {}", path.display()))?;
    cfg.verification
        .params
        .validate()
        .with_context(|| format!("checking [verification] in {}", path.display()))?;
    Ok(cfg)
}

pub fn save_config(cfg: &Config, path: Option<&Path>) -> Result<()> {
    let path = path.unwrap_or(&CONFIG_PATH);
    let data = toml::to_string_pretty(cfg)?;
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, data)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = load_config(Some(&dir.path().join("absent.toml"))).unwrap();
        assert_eq!(cfg, Config::default());
        assert_eq!(cfg.verification.params.tolerance, 0.45);
        assert_eq!(cfg.enrollment.policy.max_attempts, 60);
    }

    #[test]
    fn partial_file_keeps_other_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(
            &path,
            "camera = \"/dev/video2\"\n\n[verification]\ntolerance = 0.4\n\n[enrollment]\nallow_forced_accept = false\n",
        )
        .unwrap();

        let cfg = load_config(Some(&path)).unwrap();
        assert_eq!(cfg.camera, "/dev/video2");
        assert_eq!(cfg.verification.params.tolerance, 0.4);
        assert_eq!(cfg.verification.params.required_matches, 5);
        assert!(!cfg.enrollment.policy.allow_forced_accept);
        assert_eq!(cfg.enrollment.capture_delay_ms, 800);
        assert_eq!(cfg.quality, QualityGate::default());
    }

    #[test]
    fn zero_required_matches_is_refused() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[verification]\nrequired_matches = 0\n").unwrap();

        let err = load_config(Some(&path)).unwrap_err();
        assert!(format!("{err:#}").contains("required_matches"));
    }

    #[test]
    fn save_then_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.toml");
        let mut cfg = Config::default();
        cfg.verification.params.max_attempts = 25;
        cfg.quality.max_face_percent = 55.0;
        save_config(&cfg, Some(&path)).unwrap();
        assert_eq!(load_config(Some(&path)).unwrap(), cfg);
    }

    #[test]
    fn tolerance_override() {
        let cfg = Config::default();
        assert_eq!(cfg.verification_params(None).tolerance, 0.45);
        assert_eq!(cfg.verification_params(Some(0.3)).tolerance, 0.3);
    }

    #[test]
    fn pacing_from_config() {
        let options = Config::default().enrollment_options();
        assert_eq!(options.pacing.capture_delay, Duration::from_millis(800));
        assert_eq!(options.pacing.frame_delay, Duration::from_millis(50));
    }
}
