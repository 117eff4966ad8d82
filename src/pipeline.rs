// THEORY:
// The `pipeline` module is the top-level API of the crate. It strings the loader,
// the generator and (optionally) the TTV serializer into one run:
//
//     YAML stream -> first document -> <stem>.txt -> <ttv_output>.bin
//
// A run is a single synchronous pass. Every stage either succeeds or aborts the run
// with a `PrecfgError`; there is no partial recovery and no retry.

use crate::core_modules::config_loader::ConfigLoader;
use crate::core_modules::errors::{PrecfgError, Result};
use crate::core_modules::preprocess_config;
use crate::core_modules::ttv::TtvBox;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Extension given to the generated text configuration file.
pub const TEXT_EXTENSION: &str = "txt";

/// Configuration for a single generator run.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// The YAML parameter file.
    pub input: PathBuf,
    /// Directory the text file is written to. The file name is derived from `input`.
    pub output_dir: PathBuf,
    /// When set, the generated file is also serialized as a TTV box to this path.
    pub ttv_output: Option<PathBuf>,
}

impl PipelineConfig {
    /// A run that writes `<stem>.txt` into the current working directory.
    pub fn new(input: impl Into<PathBuf>) -> Self {
        Self {
            input: input.into(),
            output_dir: PathBuf::from("."),
            ttv_output: None,
        }
    }

    /// `output_dir/<input stem>.txt`, e.g. `models/resnet.yaml` -> `./resnet.txt`.
    pub fn text_output_path(&self) -> Result<PathBuf> {
        let stem = self.input.file_stem().ok_or_else(|| {
            PrecfgError::io(
                &self.input,
                std::io::Error::new(std::io::ErrorKind::InvalidInput, "input path has no file name"),
            )
        })?;
        // Not `set_extension`: `model.v2` must become `model.v2.txt`, not `model.txt`.
        let mut file_name = stem.to_os_string();
        file_name.push(".");
        file_name.push(TEXT_EXTENSION);
        Ok(self.output_dir.join(file_name))
    }
}

/// Outcome of the optional TTV serialization stage.
#[derive(Debug, Clone, PartialEq)]
pub struct TtvSummary {
    pub path: PathBuf,
    /// Records in the box, start and end markers included.
    pub records: usize,
    /// Bytes written, length prefix included.
    pub storage_bytes: usize,
}

/// What a successful run produced.
#[derive(Debug, Clone, PartialEq)]
pub struct Report {
    /// Number of YAML documents found in the input stream.
    pub documents: usize,
    pub text_output: PathBuf,
    pub ttv: Option<TtvSummary>,
}

/// The main, top-level struct for generating a preprocessing configuration.
pub struct Pipeline {
    config: PipelineConfig,
}

impl Pipeline {
    pub fn new(config: PipelineConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn run(&self) -> Result<Report> {
        // Stage 1: Load
        let documents = ConfigLoader::read(&self.config.input)?;
        info!(path = %self.config.input.display(), documents = documents.len(), "loaded parameter file");
        for (index, document) in documents.iter() {
            info!(index, ?document, "parameter document");
        }

        // Stage 2: Validate and generate from the first document only
        let first = documents.first().ok_or_else(|| PrecfgError::NoDocuments {
            path: self.config.input.clone(),
        })?;
        let text_output = self.config.text_output_path()?;
        preprocess_config::create(first, &text_output)?;

        // Stage 3: Optional TTV serialization of the generated file
        let ttv = match &self.config.ttv_output {
            Some(path) => Some(serialize(&text_output, path)?),
            None => None,
        };

        Ok(Report {
            documents: documents.len(),
            text_output,
            ttv,
        })
    }
}

fn serialize(text_file: &Path, ttv_output: &Path) -> Result<TtvSummary> {
    let ttv_box = TtvBox::parse_file(text_file)?;
    debug!(tags = ?ttv_box.tags(), "parsed generated configuration");
    let storage_bytes = ttv_box.write_file(ttv_output)?;

    Ok(TtvSummary {
        path: ttv_output.to_path_buf(),
        records: ttv_box.len(),
        storage_bytes,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    const PARAMS: &str = "\
input_channel: [uint32, 3]
input_h: [uint32, 224]
input_w: [uint32, 224]
mean_type: [uint32, 1]
scale_value: [float, 0.017]
";

    fn config_in(dir: &Path, yaml: &str) -> PipelineConfig {
        let input = dir.join("resnet50.yaml");
        std::fs::write(&input, yaml).expect("write input");
        PipelineConfig {
            input,
            output_dir: dir.to_path_buf(),
            ttv_output: None,
        }
    }

    #[test]
    fn text_output_replaces_the_extension_in_output_dir() {
        let mut config = PipelineConfig::new("configs/model.v2.yaml");
        assert_eq!(config.text_output_path().unwrap(), Path::new("./model.v2.txt"));

        config.output_dir = PathBuf::from("out");
        assert_eq!(config.text_output_path().unwrap(), Path::new("out/model.v2.txt"));
    }

    #[test]
    fn run_generates_text_and_ttv_outputs() {
        let dir = tempdir().expect("tempdir");
        let mut config = config_in(dir.path(), PARAMS);
        let bin = dir.path().join("resnet50.bin");
        config.ttv_output = Some(bin.clone());

        let report = Pipeline::new(config).run().expect("run");

        assert_eq!(report.documents, 1);
        assert_eq!(report.text_output, dir.path().join("resnet50.txt"));
        let text = std::fs::read_to_string(&report.text_output).expect("text output");
        assert!(text.starts_with("1 uint32 3 input_channel\n"));

        let ttv = report.ttv.expect("ttv summary");
        assert_eq!(ttv.records, 11);
        let restored = TtvBox::read_file(&bin).expect("read bin");
        assert_eq!(restored.storage_len(), ttv.storage_bytes);
        assert_eq!(restored.get_u32(2).unwrap(), 224);
        assert_eq!(restored.get_string(8).unwrap(), "./mean.txt");
    }

    #[test]
    fn only_the_first_document_is_used() {
        let dir = tempdir().expect("tempdir");
        let yaml = format!("{PARAMS}---\ninput_channel: [uint32, 1]\n");
        let config = config_in(dir.path(), &yaml);

        let report = Pipeline::new(config).run().expect("run");

        assert_eq!(report.documents, 2);
        assert!(report.ttv.is_none());
        let text = std::fs::read_to_string(&report.text_output).unwrap();
        assert!(text.starts_with("1 uint32 3 input_channel\n"));
    }

    #[test]
    fn invalid_parameters_leave_no_output() {
        let dir = tempdir().expect("tempdir");
        let config = config_in(dir.path(), &PARAMS.replace("[float, 0.017]", "[float, 1.5]"));
        let text_output = config.text_output_path().unwrap();

        let err = Pipeline::new(config).run().unwrap_err();

        assert!(matches!(err, PrecfgError::InvalidParameter { field: "scale_value", .. }));
        assert!(!text_output.exists());
    }

    #[test]
    fn comment_only_input_reports_no_documents() {
        let dir = tempdir().expect("tempdir");
        let config = config_in(dir.path(), "# parameters go here\n");
        let text_output = config.text_output_path().unwrap();

        let err = Pipeline::new(config).run().unwrap_err();

        assert!(matches!(err, PrecfgError::NoDocuments { .. }));
        assert!(!text_output.exists());
    }
}
