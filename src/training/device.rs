//! Device selection for training and evaluation

use anyhow::Result;
use candle_core::Device;
use serde::{Deserialize, Serialize};

/// Where tensors and the model should live
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DevicePreference {
    Cuda,
    Metal,
    Cpu,
    #[default]
    Auto,
}

impl std::str::FromStr for DevicePreference {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "cuda" | "gpu" => Ok(Self::Cuda),
            "metal" => Ok(Self::Metal),
            "cpu" => Ok(Self::Cpu),
            "auto" => Ok(Self::Auto),
            _ => Err(anyhow::anyhow!(
                "Invalid device preference: {}. Valid options: cuda, metal, cpu, auto",
                s
            )),
        }
    }
}

impl std::fmt::Display for DevicePreference {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Cuda => write!(f, "cuda"),
            Self::Metal => write!(f, "metal"),
            Self::Cpu => write!(f, "cpu"),
            Self::Auto => write!(f, "auto"),
        }
    }
}

/// Resolve a preference to a concrete device.
///
/// GPU backends that were not compiled in, or that fail to initialise,
/// fall back to the CPU with a warning.
pub fn select_device(preference: DevicePreference) -> Result<Device> {
    match preference {
        DevicePreference::Cuda => {
            #[cfg(feature = "cuda")]
            {
                match Device::new_cuda(0) {
                    Ok(device) => {
                        tracing::info!("Using CUDA device 0");
                        return Ok(device);
                    }
                    Err(e) => tracing::warn!("CUDA initialization failed: {}", e),
                }
            }
            #[cfg(not(feature = "cuda"))]
            tracing::warn!("CUDA requested but not compiled with the 'cuda' feature");

            tracing::warn!("Falling back to CPU");
            Ok(Device::Cpu)
        }

        DevicePreference::Metal => {
            #[cfg(feature = "metal")]
            {
                match Device::new_metal(0) {
                    Ok(device) => {
                        tracing::info!("Using Metal device 0");
                        return Ok(device);
                    }
                    Err(e) => tracing::warn!("Metal initialization failed: {}", e),
                }
            }
            #[cfg(not(feature = "metal"))]
            tracing::warn!("Metal requested but not compiled with the 'metal' feature");

            tracing::warn!("Falling back to CPU");
            Ok(Device::Cpu)
        }

        DevicePreference::Cpu => {
            tracing::info!("Using CPU");
            Ok(Device::Cpu)
        }

        DevicePreference::Auto => {
            #[cfg(feature = "cuda")]
            {
                if let Ok(device) = Device::new_cuda(0) {
                    tracing::info!("Auto-selected CUDA device 0");
                    return Ok(device);
                }
            }

            #[cfg(feature = "metal")]
            {
                if let Ok(device) = Device::new_metal(0) {
                    tracing::info!("Auto-selected Metal device 0");
                    return Ok(device);
                }
            }

            tracing::info!("Auto-selected CPU");
            Ok(Device::Cpu)
        }
    }
}

/// Short human-readable name for a device
pub fn device_label(device: &Device) -> &'static str {
    match device {
        Device::Cpu => "cpu",
        Device::Cuda(_) => "cuda",
        Device::Metal(_) => "metal",
    }
}

/// Print which backends this build can use
pub fn print_available_devices() {
    println!("Available devices:");
    println!("  cpu:   yes");

    #[cfg(feature = "cuda")]
    println!(
        "  cuda:  {}",
        if Device::new_cuda(0).is_ok() { "yes" } else { "compiled, not available" }
    );
    #[cfg(not(feature = "cuda"))]
    println!("  cuda:  not compiled (use --features cuda)");

    #[cfg(feature = "metal")]
    println!(
        "  metal: {}",
        if Device::new_metal(0).is_ok() { "yes" } else { "compiled, not available" }
    );
    #[cfg(not(feature = "metal"))]
    println!("  metal: not compiled (use --features metal)");
}
