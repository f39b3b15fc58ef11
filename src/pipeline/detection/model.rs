use crate::error::{BoxError, DetectorError};
use std::sync::Arc;
use tokio::sync::Mutex;

type Loader<M> = Box<dyn Fn() -> Result<Arc<M>, BoxError> + Send + Sync>;

enum ModelState<M: ?Sized> {
    Unloaded,
    Ready(Arc<M>),
    Closed,
}

/// Model state that is loaded on first use and released on close.
pub struct LazyModel<M: ?Sized> {
    detector: &'static str,
    loader: Loader<M>,
    state: Mutex<ModelState<M>>,
}

impl<M: ?Sized + Send + Sync> LazyModel<M> {
    pub fn new<F>(detector: &'static str, loader: F) -> Self
    where
        F: Fn() -> Result<Arc<M>, BoxError> + Send + Sync + 'static,
    {
        Self {
            detector,
            loader: Box::new(loader),
            state: Mutex::new(ModelState::Unloaded),
        }
    }

    pub async fn get(&self) -> Result<Arc<M>, DetectorError> {
        let mut state = self.state.lock().await;
        match &*state {
            ModelState::Ready(model) => return Ok(model.clone()),
            ModelState::Closed => {
                return Err(DetectorError::Closed {
                    detector: self.detector,
                });
            }
            ModelState::Unloaded => {}
        }

        let model = (self.loader)().map_err(|source| DetectorError::Init {
            detector: self.detector,
            source,
        })?;
        tracing::debug!(detector = self.detector, "Model loaded");
        *state = ModelState::Ready(model.clone());
        Ok(model)
    }

    pub async fn is_loaded(&self) -> bool {
        matches!(&*self.state.lock().await, ModelState::Ready(_))
    }

    /// Drops the model. Returns `true` if a loaded model was released.
    pub async fn close(&self) -> bool {
        let mut state = self.state.lock().await;
        matches!(
            std::mem::replace(&mut *state, ModelState::Closed),
            ModelState::Ready(_)
        )
    }
}
