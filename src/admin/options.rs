use crate::counts::{CountsConfig, DEFAULT_VERSION_TAG};

/// Common options used when opening a counts store for administrative commands.
#[derive(Clone, Debug)]
pub struct AdminOpenOptions {
    /// Version tag the store must carry (and that `init` stamps).
    pub version_tag: String,
    /// Whether to checksum and order-check the whole body.
    pub verify_body: bool,
    /// Whether to create missing parent directories on `init`.
    pub create_dirs: bool,
}

impl Default for AdminOpenOptions {
    fn default() -> Self {
        Self {
            version_tag: DEFAULT_VERSION_TAG.to_owned(),
            verify_body: true,
            create_dirs: true,
        }
    }
}

impl From<&CountsConfig> for AdminOpenOptions {
    fn from(config: &CountsConfig) -> Self {
        Self {
            version_tag: config.version_tag.clone(),
            verify_body: config.verify_on_open,
            ..Self::default()
        }
    }
}
