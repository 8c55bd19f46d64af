//! GPU capability probing.
//!
//! The daemon depends on an injected [`GpuOracle`] rather than a global
//! probe, so tests and probe-less deployments can substitute a fixed answer.
//! The NVML-backed oracle probes once and caches the result for the process
//! lifetime; any probe failure degrades to "no GPU" instead of erroring.

use nvml_wrapper::Nvml;
use std::sync::OnceLock;

// Fallback reasons reported to workers. Part of the result.json contract.
pub const GPU_REASON_NO_GPU: &str = "no_gpu_detected";
pub const GPU_REASON_SLOT_UNAVAILABLE: &str = "gpu_slot_unavailable";
pub const GPU_REASON_USER_REQUESTED_CPU: &str = "user_requested_cpu";

#[derive(Debug, Clone, PartialEq)]
pub struct GpuDevice {
    pub index: u32,
    pub name: String,
    pub memory_mb: u64,
}

/// Outcome of a capability probe.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GpuProbe {
    pub available: bool,
    pub devices: Vec<GpuDevice>,
    pub error: Option<String>,
}

impl GpuProbe {
    pub fn device_count(&self) -> usize {
        self.devices.len()
    }

    /// Human-readable summary for startup logging.
    pub fn summary(&self) -> String {
        if !self.available {
            return format!(
                "No GPU available ({})",
                self.error.as_deref().unwrap_or("unknown reason")
            );
        }
        let mut lines = vec![format!("GPU available ({} device(s)):", self.devices.len())];
        for d in &self.devices {
            lines.push(format!("  [{}] {} ({} MB)", d.index, d.name, d.memory_mb));
        }
        lines.join("\n")
    }
}

pub trait GpuOracle: Send + Sync {
    /// Probe device availability. Implementations must be bounded in time and
    /// return `available = false` on any error rather than failing.
    fn detect(&self) -> GpuProbe;
}

/// NVML-backed oracle. The probe runs once; later calls return the cached
/// result.
#[derive(Default)]
pub struct NvmlOracle {
    cache: OnceLock<GpuProbe>,
}

impl NvmlOracle {
    pub fn new() -> Self {
        Self::default()
    }

    fn probe() -> GpuProbe {
        let nvml = match Nvml::init() {
            Ok(nvml) => nvml,
            Err(err) => {
                return GpuProbe {
                    available: false,
                    devices: Vec::new(),
                    error: Some(format!("NVML init failed: {err}")),
                }
            }
        };

        let count = match nvml.device_count() {
            Ok(count) => count,
            Err(err) => {
                return GpuProbe {
                    available: false,
                    devices: Vec::new(),
                    error: Some(format!("NVML device enumeration failed: {err}")),
                }
            }
        };

        let mut devices = Vec::new();
        for index in 0..count {
            let Ok(device) = nvml.device_by_index(index) else {
                continue;
            };
            let name = device.name().unwrap_or_else(|_| "unknown".to_string());
            let memory_mb = device
                .memory_info()
                .map(|m| m.total / (1024 * 1024))
                .unwrap_or(0);
            devices.push(GpuDevice {
                index,
                name,
                memory_mb,
            });
        }

        GpuProbe {
            available: !devices.is_empty(),
            error: if devices.is_empty() {
                Some("no CUDA-capable GPU detected".to_string())
            } else {
                None
            },
            devices,
        }
    }
}

impl GpuOracle for NvmlOracle {
    fn detect(&self) -> GpuProbe {
        self.cache.get_or_init(Self::probe).clone()
    }
}

/// Oracle with a fixed answer: deterministic tests, probe-less deployments.
pub struct StaticOracle(pub GpuProbe);

impl GpuOracle for StaticOracle {
    fn detect(&self) -> GpuProbe {
        self.0.clone()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceKind {
    Cpu,
    Gpu,
}

/// Resolve the device a run should actually use.
///
/// | requested | gpu available | slot granted | actual | reason |
/// |---|---|---|---|---|
/// | cpu | yes | – | cpu | `user_requested_cpu` |
/// | cpu | no | – | cpu | – |
/// | gpu | no | – | cpu | `no_gpu_detected` |
/// | gpu | yes | no | cpu | `gpu_slot_unavailable` |
/// | gpu | yes | yes | gpu | – |
pub fn select_device(
    requested: DeviceKind,
    gpu_available: bool,
    slot_granted: bool,
) -> (DeviceKind, Option<&'static str>) {
    match requested {
        DeviceKind::Cpu => (
            DeviceKind::Cpu,
            gpu_available.then_some(GPU_REASON_USER_REQUESTED_CPU),
        ),
        DeviceKind::Gpu if !gpu_available => (DeviceKind::Cpu, Some(GPU_REASON_NO_GPU)),
        DeviceKind::Gpu if !slot_granted => {
            (DeviceKind::Cpu, Some(GPU_REASON_SLOT_UNAVAILABLE))
        }
        DeviceKind::Gpu => (DeviceKind::Gpu, None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cpu_request_is_always_honored() {
        assert_eq!(
            select_device(DeviceKind::Cpu, false, true),
            (DeviceKind::Cpu, None)
        );
        assert_eq!(
            select_device(DeviceKind::Cpu, true, true),
            (DeviceKind::Cpu, Some(GPU_REASON_USER_REQUESTED_CPU))
        );
    }

    #[test]
    fn gpu_request_falls_back_without_a_device() {
        assert_eq!(
            select_device(DeviceKind::Gpu, false, true),
            (DeviceKind::Cpu, Some(GPU_REASON_NO_GPU))
        );
    }

    #[test]
    fn gpu_request_falls_back_without_a_slot() {
        assert_eq!(
            select_device(DeviceKind::Gpu, true, false),
            (DeviceKind::Cpu, Some(GPU_REASON_SLOT_UNAVAILABLE))
        );
    }

    #[test]
    fn gpu_request_with_slot_uses_the_gpu() {
        assert_eq!(
            select_device(DeviceKind::Gpu, true, true),
            (DeviceKind::Gpu, None)
        );
    }

    #[test]
    fn static_oracle_reports_its_fixture() {
        let oracle = StaticOracle(GpuProbe {
            available: true,
            devices: vec![GpuDevice {
                index: 0,
                name: "Test GPU".into(),
                memory_mb: 8192,
            }],
            error: None,
        });
        let probe = oracle.detect();
        assert!(probe.available);
        assert_eq!(probe.device_count(), 1);
        assert!(probe.summary().contains("Test GPU"));
    }

    #[test]
    fn unavailable_probe_summarizes_the_error() {
        let probe = GpuProbe {
            available: false,
            devices: Vec::new(),
            error: Some("NVML init failed".into()),
        };
        assert!(probe.summary().contains("No GPU available"));
    }
}
