//! Background model loading.
//!
//! Inference sessions are built on a dedicated OS thread so the interactive
//! loop keeps running; the outcome arrives on a oneshot channel.

use facematch_core::{DetectorOptions, ModelError, ModelLoader, OnnxPipeline};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::oneshot;

#[derive(Error, Debug)]
pub enum LoadError {
    #[error("{0}")]
    Model(#[from] ModelError),
    #[error("model loading timed out after {0:?}")]
    TimedOut(Duration),
    #[error("model loader thread exited")]
    LoaderExited,
}

/// Start loading on a named thread. Fails only if the thread cannot be spawned.
pub fn spawn_model_load(
    loader: ModelLoader,
    options: DetectorOptions,
) -> std::io::Result<oneshot::Receiver<Result<OnnxPipeline, ModelError>>> {
    let (tx, rx) = oneshot::channel();

    std::thread::Builder::new()
        .name("facematch-loader".into())
        .spawn(move || {
            tracing::info!(base = %loader.base(), "loading models");
            let result = loader.load(options).map(OnnxPipeline::from);
            if tx.send(result).is_err() {
                tracing::debug!("model load finished after the session went away");
            }
        })?;

    Ok(rx)
}

/// Wait for the loader, optionally bounded by `timeout`.
pub async fn await_models<T>(
    rx: oneshot::Receiver<Result<T, ModelError>>,
    timeout: Option<Duration>,
) -> Result<T, LoadError> {
    let received = match timeout {
        Some(limit) => tokio::time::timeout(limit, rx)
            .await
            .map_err(|_| LoadError::TimedOut(limit))?,
        None => rx.await,
    };
    Ok(received.map_err(|_| LoadError::LoaderExited)??)
}

#[cfg(test)]
mod tests {
    use super::*;
    use facematch_core::ModelBase;

    #[tokio::test]
    async fn test_await_models_ready() {
        let (tx, rx) = oneshot::channel::<Result<u32, ModelError>>();
        tx.send(Ok(7)).unwrap();
        assert_eq!(await_models(rx, Some(Duration::from_secs(1))).await.unwrap(), 7);
    }

    #[tokio::test]
    async fn test_await_models_failure_is_reported() {
        let (tx, rx) = oneshot::channel::<Result<u32, ModelError>>();
        tx.send(Err(ModelError::NoCacheDir)).unwrap();
        let err = await_models(rx, None).await.unwrap_err();
        assert!(matches!(err, LoadError::Model(ModelError::NoCacheDir)));
    }

    #[tokio::test]
    async fn test_await_models_times_out() {
        let (_tx, rx) = oneshot::channel::<Result<u32, ModelError>>();
        let err = await_models(rx, Some(Duration::from_millis(10))).await.unwrap_err();
        assert!(matches!(err, LoadError::TimedOut(_)));
    }

    #[tokio::test]
    async fn test_await_models_loader_gone() {
        let (tx, rx) = oneshot::channel::<Result<u32, ModelError>>();
        drop(tx);
        let err = await_models(rx, None).await.unwrap_err();
        assert!(matches!(err, LoadError::LoaderExited));
    }

    #[tokio::test]
    async fn test_spawn_model_load_missing_directory() {
        let base = ModelBase::Directory("/nonexistent/facematch-models".into());
        let rx = spawn_model_load(ModelLoader::new(base), DetectorOptions::default()).unwrap();
        let Err(err) = await_models(rx, Some(Duration::from_secs(10))).await else {
            panic!("loading from a missing directory succeeded");
        };
        assert!(matches!(err, LoadError::Model(ModelError::Io { .. })), "got {err}");
    }
}
