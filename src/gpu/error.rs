use thiserror::Error;

#[derive(Debug, Error)]
pub enum GPUError {
    #[error("Failed to find GPUs with Vulkan support")]
    NoAdapter,
    #[error("Failed to find a suitable GPU")]
    NoSuitableAdapter,
    #[error("Failed to create {0}")]
    ContextCreation(&'static str),
    #[cfg(feature = "gfxdev-vulkan")]
    #[error("Vulkan Error: {0}")]
    VulkanError(#[from] ash::vk::Result),
    #[cfg(feature = "gfxdev-vulkan")]
    #[error("Failed to load the Vulkan library: {0}")]
    LoadingError(#[from] ash::LoadingError),
    #[error("Out of device memory allocating {0} bytes")]
    OutOfMemory(usize),
    #[error("No shader registered as {0:?} for this stage")]
    UnknownShader(super::state::ShaderId),
    #[error("Source data missing or malformed: {0}")]
    InvalidSource(&'static str),
    #[error("Drawing from a {0} ref that has no GPU object")]
    RefNotBuilt(&'static str),
    #[error("Swap surfaces are not supported on a headless device")]
    HeadlessDisplayNotSupported,
    #[error("Not implemented: {0}")]
    Unimplemented(&'static str),
}

/// Convenient crate-wide result type.
pub type Result<T, E = GPUError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn init_failures_have_readable_messages() {
        assert_eq!(
            GPUError::NoAdapter.to_string(),
            "Failed to find GPUs with Vulkan support"
        );
        assert_eq!(
            GPUError::NoSuitableAdapter.to_string(),
            "Failed to find a suitable GPU"
        );
        assert_eq!(
            GPUError::ContextCreation("command pool").to_string(),
            "Failed to create command pool"
        );
    }
}
