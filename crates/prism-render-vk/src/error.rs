// SPDX-License-Identifier: CEPL-1.0
use ash::vk;
use thiserror::Error;

/// Failure of a call into the driver or its surroundings.
///
/// Everything that reaches this type is treated as fatal by the renderer; recoverable
/// conditions (no suitable GPU, a shader that does not compile) are reported as `None`
/// by the functions that can produce them instead.
#[derive(Debug, Error)]
pub enum DriverError {
    #[error("{call} failed: {result}")]
    Vulkan {
        call: &'static str,
        result: vk::Result,
    },

    #[error("GPU allocator error: {0}")]
    Allocation(#[from] gpu_allocator::AllocationError),

    #[error("Vulkan library could not be loaded: {0}")]
    Loading(#[from] ash::LoadingError),

    #[error("window handle unavailable: {0}")]
    WindowHandle(#[from] raw_window_handle::HandleError),

    #[error(transparent)]
    Schedule(#[from] crate::frame::SchedulerError),

    #[error("device context has no presentation surface")]
    NoSurface,

    #[error("{0} buffer of zero bytes requested")]
    EmptyBuffer(String),

    #[error("buffer memory is not host-visible")]
    NotMapped,

    #[error("access of {len} bytes at offset {offset} exceeds buffer size {size}")]
    OutOfBounds { offset: u64, len: u64, size: u64 },
}

impl DriverError {
    pub fn vulkan(call: &'static str, result: vk::Result) -> Self {
        DriverError::Vulkan { call, result }
    }
}

/// Attaches the name of the failing call to a raw `VkResult`.
pub trait VkResultExt<T> {
    fn during(self, call: &'static str) -> Result<T, DriverError>;
}

impl<T> VkResultExt<T> for Result<T, vk::Result> {
    fn during(self, call: &'static str) -> Result<T, DriverError> {
        self.map_err(|result| DriverError::vulkan(call, result))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn during_names_the_failing_call() {
        let res: Result<(), vk::Result> = Err(vk::Result::ERROR_OUT_OF_DEVICE_MEMORY);
        let err = res.during("create_buffer").unwrap_err();
        assert!(matches!(
            err,
            DriverError::Vulkan {
                call: "create_buffer",
                result: vk::Result::ERROR_OUT_OF_DEVICE_MEMORY
            }
        ));
        assert!(err.to_string().starts_with("create_buffer failed"));
    }
}
