//! Process-wide convenience accessor.
//!
//! The installed container is an ordinary [`Container`] owned by the
//! application; this module only keeps one clone of it reachable without
//! passing it around. Code that can take a `&Container` should.

use std::sync::OnceLock;

use tracing::info;

use crate::container::ioc_container::Container;
use crate::errors::CoreError;

static GLOBAL: OnceLock<Container> = OnceLock::new();

/// Install `container` as the process-wide instance. Only the first call succeeds.
pub fn set_global(container: Container) -> Result<(), CoreError> {
    let id = container.id();
    GLOBAL.set(container).map_err(|_| CoreError::GlobalAlreadySet)?;
    info!(target: "beanstalk::container", container = %id, "Global container installed");
    Ok(())
}

/// The process-wide container, if one was installed
pub fn global() -> Option<&'static Container> {
    GLOBAL.get()
}

/// The process-wide container, or `ContainerShutDown` when none is installed
/// or it has been shut down
pub fn try_global() -> Result<&'static Container, CoreError> {
    match GLOBAL.get() {
        Some(container) if !container.is_shut_down() => Ok(container),
        _ => Err(CoreError::ContainerShutDown),
    }
}
