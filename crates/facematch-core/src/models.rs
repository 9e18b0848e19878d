//! Model artifacts: resolution, integrity checks and session construction.
//!
//! Three artifacts live under a model base (a local directory or an
//! `http(s)://` URL):
//!
//! - `manifest.toml`: file name, SHA-256 digest and version of each network
//! - the SCRFD detector (default `det_10g.onnx`)
//! - the ArcFace recognizer (default `w600k_r50.onnx`)
//!
//! Remote artifacts are downloaded into the local model cache. Every network is
//! checked against its manifest digest before an ONNX session is built.

use crate::detector::{DetectorError, DetectorOptions, FaceDetector};
use crate::recognizer::{FaceRecognizer, RecognizerError};
use serde::Deserialize;
use sha2::{Digest, Sha256};
use std::fmt;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use thiserror::Error;

pub const MANIFEST_FILE: &str = "manifest.toml";
pub const DETECTOR_FILE: &str = "det_10g.onnx";
pub const RECOGNIZER_FILE: &str = "w600k_r50.onnx";

#[derive(Error, Debug)]
pub enum ModelError {
    #[error("could not determine model cache directory")]
    NoCacheDir,
    #[error("download failed for {url}: {source}")]
    Download {
        url: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("{path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid manifest: {0}")]
    Manifest(#[from] toml::de::Error),
    #[error("digest mismatch for {file}: expected {expected}, got {actual}")]
    DigestMismatch {
        file: String,
        expected: String,
        actual: String,
    },
    #[error("detector: {0}")]
    Detector(#[from] DetectorError),
    #[error("recognizer: {0}")]
    Recognizer(#[from] RecognizerError),
}

/// Where the artifacts come from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ModelBase {
    Directory(PathBuf),
    Remote(String),
}

impl ModelBase {
    pub fn parse(s: &str) -> Self {
        if s.starts_with("http://") || s.starts_with("https://") {
            Self::Remote(s.trim_end_matches('/').to_string())
        } else {
            Self::Directory(PathBuf::from(s))
        }
    }
}

impl fmt::Display for ModelBase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Directory(p) => write!(f, "{}", p.display()),
            Self::Remote(url) => f.write_str(url),
        }
    }
}

/// One network entry of `manifest.toml`.
#[derive(Debug, Clone, Deserialize)]
pub struct ArtifactEntry {
    pub file: String,
    pub sha256: String,
    pub version: String,
}

/// Parsed `manifest.toml`.
///
/// ```toml
/// [detector]
/// file = "det_10g.onnx"
/// sha256 = "…"
/// version = "scrfd_10g"
///
/// [recognizer]
/// file = "w600k_r50.onnx"
/// sha256 = "…"
/// version = "w600k_r50"
/// ```
#[derive(Debug, Clone, Deserialize)]
pub struct Manifest {
    pub detector: ArtifactEntry,
    pub recognizer: ArtifactEntry,
}

impl Manifest {
    pub fn parse(src: &str) -> Result<Self, ModelError> {
        Ok(toml::from_str(src)?)
    }
}

/// Local paths of all three artifacts, verified.
#[derive(Debug, Clone)]
pub struct ResolvedModels {
    pub manifest: Manifest,
    pub detector_path: PathBuf,
    pub recognizer_path: PathBuf,
}

/// Both inference sessions, ready to run.
pub struct LoadedModels {
    pub detector: FaceDetector,
    pub recognizer: FaceRecognizer,
    pub manifest: Manifest,
}

/// Default model directory: `$XDG_DATA_HOME/facematch/models` (or platform equivalent).
pub fn default_model_dir() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("facematch")
        .join("models")
}

/// Cache directory for downloaded artifacts.
pub fn model_cache_dir() -> Result<PathBuf, ModelError> {
    dirs::cache_dir()
        .map(|d| d.join("facematch").join("models"))
        .ok_or(ModelError::NoCacheDir)
}

/// Resolves, verifies and loads the model artifacts from one base.
#[derive(Debug, Clone)]
pub struct ModelLoader {
    base: ModelBase,
    cache_dir: Option<PathBuf>,
}

impl ModelLoader {
    pub fn new(base: ModelBase) -> Self {
        Self {
            base,
            cache_dir: None,
        }
    }

    /// Override where remote artifacts are cached.
    pub fn with_cache_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.cache_dir = Some(dir.into());
        self
    }

    pub fn base(&self) -> &ModelBase {
        &self.base
    }

    /// Locate all three artifacts locally and check network digests.
    pub fn resolve(&self) -> Result<ResolvedModels, ModelError> {
        let manifest_path = self.fetch(MANIFEST_FILE, None)?;
        let src = fs::read_to_string(&manifest_path).map_err(|e| ModelError::Io {
            path: manifest_path.clone(),
            source: e,
        })?;
        let manifest = Manifest::parse(&src)?;

        let detector_path = self.fetch(&manifest.detector.file, Some(&manifest.detector.sha256))?;
        verify_digest(&detector_path, &manifest.detector.sha256)?;

        let recognizer_path =
            self.fetch(&manifest.recognizer.file, Some(&manifest.recognizer.sha256))?;
        verify_digest(&recognizer_path, &manifest.recognizer.sha256)?;

        tracing::info!(
            base = %self.base,
            detector = %manifest.detector.version,
            recognizer = %manifest.recognizer.version,
            "model artifacts verified"
        );

        Ok(ResolvedModels {
            manifest,
            detector_path,
            recognizer_path,
        })
    }

    /// Resolve and build both ONNX sessions. Blocking; run off the interactive context.
    pub fn load(&self, options: DetectorOptions) -> Result<LoadedModels, ModelError> {
        let resolved = self.resolve()?;
        let detector = FaceDetector::load(&resolved.detector_path, options)?;
        let recognizer = FaceRecognizer::load(
            &resolved.recognizer_path,
            &resolved.manifest.recognizer.version,
        )?;
        Ok(LoadedModels {
            detector,
            recognizer,
            manifest: resolved.manifest,
        })
    }

    fn fetch(&self, name: &str, expected_sha256: Option<&str>) -> Result<PathBuf, ModelError> {
        match &self.base {
            ModelBase::Directory(dir) => {
                let path = dir.join(name);
                if path.exists() {
                    Ok(path)
                } else {
                    Err(ModelError::Io {
                        path,
                        source: std::io::Error::new(
                            std::io::ErrorKind::NotFound,
                            "artifact not found",
                        ),
                    })
                }
            }
            ModelBase::Remote(base_url) => {
                let cache_dir = match &self.cache_dir {
                    Some(dir) => dir.clone(),
                    None => model_cache_dir()?,
                };
                fetch_remote(base_url, name, &cache_dir, expected_sha256)
            }
        }
    }
}

/// Use a cached copy when its digest matches, otherwise download.
///
/// Without an expected digest (the manifest) the artifact is refreshed, and
/// the cached copy is only used when the download fails.
fn fetch_remote(
    base_url: &str,
    name: &str,
    cache_dir: &Path,
    expected_sha256: Option<&str>,
) -> Result<PathBuf, ModelError> {
    let dest = cache_dir.join(name);
    if let Some(expected) = expected_sha256 {
        if dest.exists() && sha256_file(&dest)?.eq_ignore_ascii_case(expected) {
            tracing::debug!(path = %dest.display(), "using cached artifact");
            return Ok(dest);
        }
    }

    fs::create_dir_all(cache_dir).map_err(|e| ModelError::Io {
        path: cache_dir.to_path_buf(),
        source: e,
    })?;
    let url = format!("{base_url}/{name}");
    tracing::info!(%url, "downloading model artifact");
    match download(&url, &dest) {
        Ok(()) => Ok(dest),
        Err(e) if expected_sha256.is_none() && dest.exists() => {
            tracing::warn!(
                error = %e,
                path = %dest.display(),
                "download failed, using cached copy"
            );
            Ok(dest)
        }
        Err(e) => Err(e),
    }
}

/// Download to `<dest>.part`, then rename into place.
fn download(url: &str, dest: &Path) -> Result<(), ModelError> {
    let download_err = |e| ModelError::Download {
        url: url.to_string(),
        source: e,
    };
    let bytes = reqwest::blocking::get(url)
        .and_then(|r| r.error_for_status())
        .and_then(|r| r.bytes())
        .map_err(download_err)?;

    let part = dest.with_extension("part");
    let io_err = |path: &Path| {
        let path = path.to_path_buf();
        move |e| ModelError::Io { path, source: e }
    };

    let mut file = fs::File::create(&part).map_err(io_err(&part))?;
    file.write_all(&bytes).map_err(io_err(&part))?;
    file.flush().map_err(io_err(&part))?;
    drop(file);

    fs::rename(&part, dest).map_err(io_err(dest))?;
    tracing::debug!(%url, bytes = bytes.len(), "download complete");
    Ok(())
}

fn sha256_file(path: &Path) -> Result<String, ModelError> {
    let bytes = fs::read(path).map_err(|e| ModelError::Io {
        path: path.to_path_buf(),
        source: e,
    })?;
    Ok(format!("{:x}", Sha256::digest(&bytes)))
}

fn verify_digest(path: &Path, expected: &str) -> Result<(), ModelError> {
    let actual = sha256_file(path)?;
    if actual.eq_ignore_ascii_case(expected.trim()) {
        Ok(())
    } else {
        Err(ModelError::DigestMismatch {
            file: path.display().to_string(),
            expected: expected.to_string(),
            actual,
        })
    }
}
