use anyhow::Result;
use clap::Parser;

fn main() -> Result<()> {
    let cfg = glitchviz::config::Config::parse();
    match cfg.log_file.as_deref() {
        Some(path) => glitchviz::logging::init(Some(path))?,
        None => {
            let fallback = glitchviz::logging::default_log_path();
            if glitchviz::logging::init(fallback.as_deref()).is_err() {
                glitchviz::logging::init(None)?;
            }
        }
    }
    tracing::info!(version = env!("CARGO_PKG_VERSION"), "glitchviz starting");
    glitchviz::app::run(cfg)
}
