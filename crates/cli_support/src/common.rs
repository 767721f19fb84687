use clap::{Args, ValueEnum};
use std::path::PathBuf;

/// Compute backend requested on the command line.
#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendKind {
    NdArray,
    Wgpu,
}

/// Backend and device selection shared by the train/remove binaries.
#[derive(Debug, Clone, Args)]
pub struct DeviceArgs {
    /// Backend to use (ndarray or wgpu if enabled).
    #[arg(long, value_enum, default_value_t = BackendKind::NdArray)]
    pub backend: BackendKind,
    /// Discrete GPU index (wgpu backend only).
    #[arg(long, default_value_t = 0)]
    pub gpu: usize,
}

#[derive(Debug, Clone, Copy)]
pub struct DeviceOpts {
    pub backend: BackendKind,
    pub gpu: usize,
}

impl From<&DeviceArgs> for DeviceOpts {
    fn from(args: &DeviceArgs) -> Self {
        DeviceOpts {
            backend: args.backend,
            gpu: args.gpu,
        }
    }
}

impl DeviceOpts {
    /// Fail when the requested backend was not compiled in.
    pub fn validate(&self, built_wgpu: bool) -> Result<(), String> {
        match (self.backend, built_wgpu) {
            (BackendKind::Wgpu, false) => Err(
                "backend-wgpu feature not enabled; rebuild with --features backend-wgpu or choose ndarray backend"
                    .to_string(),
            ),
            (BackendKind::NdArray, true) => {
                tracing::info!(
                    "built with backend-wgpu; training will still use the WGPU backend despite --backend ndarray"
                );
                Ok(())
            }
            _ => Ok(()),
        }
    }
}

/// Optional TOML config path, falling back to an environment variable.
#[derive(Debug, Clone, Args)]
pub struct ConfigArgs {
    /// TOML file with training hyperparameters.
    #[arg(long)]
    pub config: Option<PathBuf>,
}

impl ConfigArgs {
    pub fn resolve(&self, env_key: &str) -> Option<PathBuf> {
        self.config
            .clone()
            .or_else(|| std::env::var(env_key).ok().map(PathBuf::from))
    }
}

/// Install a `tracing` subscriber honoring `RUST_LOG` (default `info`).
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .with_target(false)
        .try_init();
}
