//! Commands every bridge ships with.

mod session;
mod system;

pub use self::session::{Initialize, Remove};
pub use self::system::{Sleep, Version};

use super::CommandCatalog;

/// Name of [`Version`].
pub const SYSTEM_VERSION: &str = "palava.system.version";
/// Name of [`Sleep`].
pub const SYSTEM_SLEEP: &str = "palava.system.sleep";
/// Name of [`Initialize`].
pub const SESSION_INITIALIZE: &str = "palava.session.initialize";
/// Name of [`Remove`].
pub const SESSION_REMOVE: &str = "palava.session.remove";

/// Adds the built-in commands to `catalog`.
pub fn register(catalog: &mut CommandCatalog) {
    catalog
        .register(SYSTEM_VERSION, || Version)
        .register_job(SYSTEM_SLEEP, || Sleep)
        .register_job(SESSION_INITIALIZE, || Initialize)
        .register_job(SESSION_REMOVE, || Remove);
}
