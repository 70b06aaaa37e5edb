//! Shared setup for the command-line binaries

use anyhow::Result;
use candle_core::Device;
use tracing::Level;
use tracing_subscriber::FmtSubscriber;

use crate::error::PipelineError;

/// Install the global tracing subscriber (`verbose` switches INFO to DEBUG)
pub fn init_tracing(verbose: bool) -> Result<()> {
    let level = if verbose { Level::DEBUG } else { Level::INFO };
    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;
    Ok(())
}

/// Parse `cpu`, `cuda`, `cuda:N` or `metal`
pub fn parse_device(spec: &str) -> Result<Device> {
    let spec = spec.trim().to_lowercase();
    let invalid = || PipelineError::InvalidDevice(spec.clone());

    match spec.as_str() {
        "cpu" => Ok(Device::Cpu),
        "cuda" => Ok(Device::new_cuda(0)?),
        "metal" | "mps" => Ok(Device::new_metal(0)?),
        other => {
            let ordinal = other
                .strip_prefix("cuda:")
                .ok_or_else(invalid)?
                .parse::<usize>()
                .map_err(|_| invalid())?;
            Ok(Device::new_cuda(ordinal)?)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_cpu() {
        assert!(matches!(parse_device("cpu").unwrap(), Device::Cpu));
        assert!(matches!(parse_device(" CPU ").unwrap(), Device::Cpu));
    }

    #[test]
    fn test_parse_invalid() {
        for spec in ["gpu", "cuda:x", "tpu:0"] {
            let err = parse_device(spec).unwrap_err();
            assert!(err.downcast_ref::<PipelineError>().is_some(), "{spec}");
        }
    }
}
