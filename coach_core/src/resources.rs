//! Scoped presentation resources.
//!
//! Process-wide resources such as an audio context or a display-stay-awake
//! lock are acquired on the first user gesture (the first timer start) and
//! released when the guard is dropped, on every exit path.

use crate::Result;
use std::sync::Arc;

/// A resource held while a session is on screen
pub trait PresentationResource: Send + Sync {
    fn name(&self) -> &str;
    fn acquire(&self) -> Result<()>;
    fn release(&self);
}

/// Holds an acquired resource and releases it on drop
pub struct ResourceGuard {
    resource: Arc<dyn PresentationResource>,
}

impl ResourceGuard {
    pub fn acquire(resource: Arc<dyn PresentationResource>) -> Result<Self> {
        resource.acquire()?;
        tracing::debug!("Acquired presentation resource {}", resource.name());
        Ok(Self { resource })
    }

    pub fn name(&self) -> &str {
        self.resource.name()
    }
}

impl Drop for ResourceGuard {
    fn drop(&mut self) {
        self.resource.release();
        tracing::debug!("Released presentation resource {}", self.resource.name());
    }
}

impl std::fmt::Debug for ResourceGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResourceGuard")
            .field("resource", &self.resource.name())
            .finish()
    }
}

/// Headless stand-in
#[derive(Clone, Debug)]
pub struct NoopResource {
    name: String,
}

impl NoopResource {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

impl PresentationResource for NoopResource {
    fn name(&self) -> &str {
        &self.name
    }

    fn acquire(&self) -> Result<()> {
        Ok(())
    }

    fn release(&self) {}
}
