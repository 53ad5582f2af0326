use clap::Parser;
use std::{
    path::PathBuf,
    process,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
};
use stem_splitter_web::{
    set_download_progress_callback, start_server, AppConfig, AppState, Device, DummyModel,
    ModelGateway, SecretKey, SeparationConfig,
};
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "stem-splitter-web")]
#[command(about = "Web front-end for AI-powered audio stem separation", long_about = None)]
#[command(version)]
struct Cli {
    /// Address to listen on
    #[arg(long, env = "STEM_SPLITTER_ADDR", default_value = "127.0.0.1:5000")]
    addr: String,

    /// Where uploaded files are stored
    #[arg(long, env = "STEM_SPLITTER_INPUT_DIR", default_value = "./input_audio")]
    input_dir: PathBuf,

    /// Where separated stems are written
    #[arg(long, env = "STEM_SPLITTER_OUTPUT_DIR", default_value = "./output")]
    output_dir: PathBuf,

    #[arg(short, long, env = "STEM_SPLITTER_MODEL", default_value = "htdemucs_ort_v1")]
    model: String,

    #[arg(long, env = "STEM_SPLITTER_MANIFEST_URL")]
    manifest_url: Option<String>,

    /// Run on the CPU even when an accelerator is available
    #[arg(long)]
    cpu: bool,

    /// Serve with a passthrough model instead of loading weights
    #[arg(long)]
    dummy_model: bool,

    /// Largest accepted upload, in MiB
    #[arg(long, env = "STEM_SPLITTER_MAX_UPLOAD_MB", default_value_t = 512)]
    max_upload_mb: usize,

    /// Refuse to start without a SECRET_KEY
    #[arg(long, env = "STEM_SPLITTER_HARDENED")]
    hardened: bool,
}

impl Cli {
    fn config(&self) -> AppConfig {
        AppConfig {
            addr: self.addr.clone(),
            input_dir: self.input_dir.clone(),
            output_dir: self.output_dir.clone(),
            max_upload_bytes: self.max_upload_mb.saturating_mul(1024 * 1024),
            secret_key: SecretKey::from_env(),
            separation: SeparationConfig {
                model_name: self.model.clone(),
                manifest_url_override: self.manifest_url.clone(),
                device: if self.cpu { Device::Cpu } else { Device::Auto },
                ..SeparationConfig::default()
            },
        }
    }
}

fn main() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "stem_splitter_web=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();

    if let Err(e) = run(&cli) {
        error!("{e}");
        process::exit(1);
    }
}

fn log_download_progress() {
    let last_decile = AtomicU64::new(u64::MAX);
    set_download_progress_callback(move |done, total| {
        if total == 0 {
            return;
        }
        let decile = done * 10 / total;
        if last_decile.swap(decile, Ordering::Relaxed) != decile {
            info!(
                "downloading model: {:>3}% ({:.2} MB / {:.2} MB)",
                decile * 10,
                done as f64 / 1_000_000.0,
                total as f64 / 1_000_000.0
            );
        }
    });
}

fn run(cli: &Cli) -> Result<(), Box<dyn std::error::Error>> {
    let config = cli.config();
    config.secret_key.check(cli.hardened)?;

    // The model is resolved before the runtime starts: the download client is blocking.
    let gateway = if cli.dummy_model {
        info!("using the passthrough model, output stems are scaled copies of the input");
        ModelGateway::new(Arc::new(DummyModel::default()))
    } else {
        log_download_progress();
        ModelGateway::load(&config.separation)
    };

    let state = AppState::new(Arc::new(gateway), &config);
    let runtime = tokio::runtime::Runtime::new()?;
    runtime.block_on(start_server(&config.addr, state, config.max_upload_bytes))?;
    Ok(())
}
