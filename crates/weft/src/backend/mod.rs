//! Target backends, the runtime handle, and device buffers.

pub mod buffer;
pub mod handle;

pub use buffer::{Buffer, Element};
pub use handle::Handle;

/// Target backend the compiled module runs on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Backend {
    Cpu,
    Amdgpu,
}

impl Backend {
    /// The HAL driver string used to create a device for this backend.
    pub fn hal_driver(self) -> &'static str {
        match self {
            Backend::Cpu => "local-task",
            Backend::Amdgpu => "hip",
        }
    }

    /// The fixed compiler flag list for this backend.
    pub fn compile_flags(self) -> &'static [&'static str] {
        match self {
            Backend::Cpu => &[
                "--iree-hal-target-backends=llvm-cpu",
                "--iree-llvmcpu-target-cpu=host",
            ],
            Backend::Amdgpu => &[
                "--iree-hal-target-backends=rocm",
                "--iree-hip-target=gfx942",
                "--iree-opt-level=O3",
            ],
        }
    }
}

impl std::fmt::Display for Backend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Backend::Cpu => write!(f, "CPU"),
            Backend::Amdgpu => write!(f, "AMDGPU"),
        }
    }
}
