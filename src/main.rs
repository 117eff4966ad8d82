//! Generates the preprocessing configuration file for a model from its YAML
//! parameter file.
//!
//! ```bash
//! precfg resnet50.yaml                      # writes ./resnet50.txt
//! precfg resnet50.yaml --ttv resnet50.bin   # also serializes it as a TTV box
//! ```

use anyhow::Context;
use clap::Parser;
use precfg::{Pipeline, PipelineConfig};
use std::path::PathBuf;
use tracing::info;

#[derive(Parser)]
#[command(name = "precfg")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Generate an image preprocessing configuration file from YAML", long_about = None)]
struct Cli {
    /// YAML parameter file; its name must contain `.yaml`
    #[arg(value_parser = parse_yaml_path)]
    input: PathBuf,

    /// Directory the generated `.txt` file is written to
    #[arg(long = "out-dir", default_value = ".")]
    out_dir: PathBuf,

    /// Also serialize the generated configuration into a TTV binary at this path
    #[arg(long)]
    ttv: Option<PathBuf>,
}

fn parse_yaml_path(arg: &str) -> Result<PathBuf, String> {
    if arg.contains(".yaml") {
        Ok(PathBuf::from(arg))
    } else {
        Err("the input file is not a valid yaml file! Its name must contain the extension .yaml".to_string())
    }
}

fn main() -> anyhow::Result<()> {
    precfg::init_tracing();

    let cli = Cli::parse();
    let config = PipelineConfig {
        input: cli.input,
        output_dir: cli.out_dir,
        ttv_output: cli.ttv,
    };

    let pipeline = Pipeline::new(config);
    let report = pipeline
        .run()
        .with_context(|| format!("failed to generate a configuration from '{}'", pipeline.config().input.display()))?;

    info!(path = %report.text_output.display(), "preprocessing configuration written");
    if let Some(ttv) = &report.ttv {
        info!(
            path = %ttv.path.display(),
            records = ttv.records,
            bytes = ttv.storage_bytes,
            "TTV box written"
        );
    }
    Ok(())
}
