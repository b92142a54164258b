//! Device selection.
//!
//! Resolved once when the networks are built and handed to every
//! `VarBuilder`; layers allocate scratch tensors (RNN zero state, Gumbel
//! noise, dropout masks) on the device of their input.

use candle_core::Device;

use crate::Result;

/// Where the networks should live.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DevicePolicy {
    /// Always run on the host.
    Cpu,
    /// CUDA device 0 when compiled in and present, else the host.
    #[default]
    PreferCuda,
}

impl DevicePolicy {
    pub fn resolve(self) -> Result<Device> {
        let device = match self {
            DevicePolicy::Cpu => Device::Cpu,
            DevicePolicy::PreferCuda => Device::cuda_if_available(0)?,
        };
        tracing::debug!(?self, ?device, "resolved device");
        Ok(device)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cpu_policy_is_host() {
        assert!(DevicePolicy::Cpu.resolve().unwrap().is_cpu());
    }

    #[test]
    fn prefer_cuda_always_resolves() {
        // Falls back to the host on machines without CUDA.
        DevicePolicy::PreferCuda.resolve().unwrap();
    }
}
