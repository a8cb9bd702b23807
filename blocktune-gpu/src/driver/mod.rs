//! CUDA Driver API (Minimal FFI)
//!
//! Bindings to the CUDA driver API for module loading, memory, streams,
//! events and kernel launch. The safe wrappers are only compiled with the
//! `cuda` feature; [`LaunchConfig`] and the raw FFI table are always present.

pub mod sys;

#[cfg(feature = "cuda")]
mod context;
#[cfg(feature = "cuda")]
mod event;
#[cfg(feature = "cuda")]
mod memory;
#[cfg(feature = "cuda")]
mod module;
#[cfg(feature = "cuda")]
mod stream;

mod types;
pub use types::*;

#[cfg(feature = "cuda")]
pub use context::{device_count, get_driver, CudaContext, DeviceAttributes};
#[cfg(feature = "cuda")]
pub use event::CudaEvent;
#[cfg(feature = "cuda")]
pub use memory::GpuBuffer;
#[cfg(feature = "cuda")]
pub use module::CudaModule;
#[cfg(feature = "cuda")]
pub use stream::CudaStream;

/// Check if CUDA is available at runtime
///
/// True only when the `cuda` feature is enabled, the driver library loads,
/// `cuInit` succeeds and at least one device is present.
#[must_use]
pub fn cuda_available() -> bool {
    #[cfg(feature = "cuda")]
    {
        context::cuda_available()
    }
    #[cfg(not(feature = "cuda"))]
    {
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cuda_available_without_feature() {
        #[cfg(not(feature = "cuda"))]
        assert!(!cuda_available());
    }
}
