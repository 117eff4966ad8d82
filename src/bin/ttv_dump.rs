use anyhow::Context;
use clap::Parser;
use precfg::TtvBox;
use std::path::PathBuf;
use tracing::info;

/// Deserialize a TTV box and log every value it holds
#[derive(Parser)]
#[command(name = "ttv_dump", version = env!("CARGO_PKG_VERSION"))]
struct Args {
    /// Serialized TTV file, as written by `precfg --ttv`
    file: PathBuf,
}

fn main() -> anyhow::Result<()> {
    precfg::init_tracing();
    let args = Args::parse();

    let ttv_box = TtvBox::read_file(&args.file)
        .with_context(|| format!("failed to deserialize '{}'", args.file.display()))?;

    let tags = ttv_box.tags();
    info!("The deserialized ttv box contains {} ttv objects", tags.len());
    for (index, tag) in tags.iter().enumerate() {
        info!("index = {index}, tag = 0x{tag:X}");
    }
    ttv_box.log_values();
    Ok(())
}
