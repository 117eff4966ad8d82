// THEORY:
// The `preprocess_config` module turns a loosely typed parameter document into the
// fixed, nine-line text file that the TTV serializer consumes. It works in two
// strictly separated stages:
//
// 1.  **Validation**: `PreprocessParams::from_mapping` pulls the five required fields
//     out of the document, checks them in a fixed order, and either returns a fully
//     typed `PreprocessParams` or the first `InvalidParameter` error. Nothing touches
//     the filesystem in this stage, so a bad document never leaves a partial file.
// 2.  **Serialization**: `PreprocessParams::entries` expands the typed struct into the
//     nine `ParamEntry` records of the output schema, filling in the mean values and
//     the mean map path, which are fixed and never read from the input.
//
// Each field in the input document is a two-element sequence `[raw, value]`. Only
// `value` is meaningful; `raw` is part of the externally imposed input shape and is
// carried along untouched.

use crate::core_modules::errors::{PrecfgError, Result};
use serde::{Deserialize, Serialize};
use serde_yaml::{Mapping, Value};
use std::fmt;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;
use tracing::{debug, info};

pub const MEAN_VALUE_R: f64 = 103.94;
pub const MEAN_VALUE_G: f64 = 116.78;
pub const MEAN_VALUE_B: f64 = 123.68;
pub const MEAN_MAP: &str = "./mean.txt";

/// Number of records in every generated file.
pub const ENTRY_COUNT: usize = 9;

/// One input parameter as it appears in the YAML document: `[raw, value]`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParamField {
    /// Ignored by validation.
    pub raw: Value,
    pub value: Value,
}

/// How the downstream preprocessing step subtracts the mean.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MeanType {
    Zero = 0,
    One = 1,
    Two = 2,
}

impl MeanType {
    pub fn as_u32(self) -> u32 {
        self as u32
    }
}

impl TryFrom<i64> for MeanType {
    type Error = i64;

    fn try_from(value: i64) -> std::result::Result<Self, Self::Error> {
        match value {
            0 => Ok(MeanType::Zero),
            1 => Ok(MeanType::One),
            2 => Ok(MeanType::Two),
            other => Err(other),
        }
    }
}

/// The type column of an output record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TypeTag {
    Uint32,
    Float,
    String,
}

impl TypeTag {
    pub fn as_str(self) -> &'static str {
        match self {
            TypeTag::Uint32 => "uint32",
            TypeTag::Float => "float",
            TypeTag::String => "string",
        }
    }
}

impl fmt::Display for TypeTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The value column of an output record.
#[derive(Debug, Clone, PartialEq)]
pub enum EntryValue {
    Int(i64),
    Float(f64),
    Text(&'static str),
}

impl fmt::Display for EntryValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EntryValue::Int(v) => write!(f, "{v}"),
            EntryValue::Float(v) => f.write_str(&format_float(*v)),
            EntryValue::Text(v) => f.write_str(v),
        }
    }
}

/// One line of the generated file: `<ordinal> <type_tag> <value> <name>`.
#[derive(Debug, Clone, PartialEq)]
pub struct ParamEntry {
    pub ordinal: u8,
    pub type_tag: TypeTag,
    pub value: EntryValue,
    pub name: &'static str,
}

impl ParamEntry {
    fn new(ordinal: u8, type_tag: TypeTag, value: EntryValue, name: &'static str) -> Self {
        Self {
            ordinal,
            type_tag,
            value,
            name,
        }
    }
}

impl fmt::Display for ParamEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} {} {}", self.ordinal, self.type_tag, self.value, self.name)
    }
}

/// Validated preprocessing parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct PreprocessParams {
    pub input_channel: i64,
    pub input_h: i64,
    pub input_w: i64,
    pub mean_type: MeanType,
    /// Always within (0.0, 1.0].
    pub scale_value: f64,
}

impl PreprocessParams {
    /// Validates the required fields of a parameter document, in schema order.
    pub fn from_mapping(params: &Mapping) -> Result<Self> {
        let input_channel = field_value(params, "input_channel")
            .and_then(|v| v.as_i64())
            .ok_or(PrecfgError::InvalidParameter {
                field: "input_channel",
                message: "it must be an integer",
            })?;

        let input_h = field_value(params, "input_h")
            .and_then(|v| v.as_i64())
            .ok_or(PrecfgError::InvalidParameter {
                field: "input_h",
                message: "it must be an integer",
            })?;

        let input_w = field_value(params, "input_w")
            .and_then(|v| v.as_i64())
            .filter(|w| *w > 0)
            .ok_or(PrecfgError::InvalidParameter {
                field: "input_w",
                message: "it must be a positive integer",
            })?;

        // A whole-number float such as `1.0` selects the same mean type as `1`.
        let mean_type = field_value(params, "mean_type")
            .and_then(|v| v.as_i64().or_else(|| whole_number(&v)))
            .and_then(|v| MeanType::try_from(v).ok())
            .ok_or(PrecfgError::InvalidParameter {
                field: "mean_type",
                message: "it must be either 0 or 1 or 2",
            })?;

        // `as_f64` also accepts integers, so `scale_value: [x, 1]` is coerced to 1.0.
        let scale_value = field_value(params, "scale_value")
            .and_then(|v| v.as_f64())
            .filter(|s| *s > 0.0 && *s <= 1.0)
            .ok_or(PrecfgError::InvalidParameter {
                field: "scale_value",
                message: "it must be float with range (0.0, 1.0]",
            })?;

        Ok(Self {
            input_channel,
            input_h,
            input_w,
            mean_type,
            scale_value,
        })
    }

    /// Expands the parameters into the fixed output schema.
    pub fn entries(&self) -> [ParamEntry; ENTRY_COUNT] {
        use EntryValue::{Float, Int, Text};
        use TypeTag as T;

        [
            ParamEntry::new(1, T::Uint32, Int(self.input_channel), "input_channel"),
            ParamEntry::new(2, T::Uint32, Int(self.input_h), "input_h"),
            ParamEntry::new(3, T::Uint32, Int(self.input_w), "input_w"),
            ParamEntry::new(4, T::Uint32, Int(self.mean_type as i64), "mean_type"),
            ParamEntry::new(5, T::Float, Float(MEAN_VALUE_R), "mean_value_r"),
            ParamEntry::new(6, T::Float, Float(MEAN_VALUE_G), "mean_value_g"),
            ParamEntry::new(7, T::Float, Float(MEAN_VALUE_B), "mean_value_b"),
            ParamEntry::new(8, T::String, Text(MEAN_MAP), "mean_map"),
            ParamEntry::new(9, T::Float, Float(self.scale_value), "scale_value"),
        ]
    }

    /// Renders the whole file in memory.
    pub fn render(&self) -> String {
        self.entries().iter().map(|entry| format!("{entry}\n")).collect()
    }

    /// Writes the nine records to `path`, replacing any existing file.
    pub fn write_to(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let file = File::create(path).map_err(|e| PrecfgError::io(path, e))?;
        let mut writer = BufWriter::new(file);
        for entry in self.entries() {
            writeln!(writer, "{entry}").map_err(|e| PrecfgError::io(path, e))?;
        }
        writer.flush().map_err(|e| PrecfgError::io(path, e))
    }
}

fn whole_number(value: &Value) -> Option<i64> {
    value
        .as_f64()
        .filter(|f| f.is_finite() && f.fract() == 0.0)
        .map(|f| f as i64)
}

/// Formats a float the way the downstream tooling has always received it:
/// shortest round-trip digits, positional for exponents in `[-4, 16)` with a
/// trailing `.0` on whole numbers, otherwise scientific with a signed two-digit
/// exponent (`1e-05`, `1.5e+16`).
pub fn format_float(v: f64) -> String {
    if v.is_nan() {
        return "nan".to_string();
    }
    if v.is_infinite() {
        return if v > 0.0 { "inf" } else { "-inf" }.to_string();
    }

    let scientific = format!("{v:e}");
    let (mantissa, exponent) = scientific.split_once('e').unwrap_or((scientific.as_str(), "0"));
    let exponent: i32 = exponent.parse().unwrap_or(0);

    if v == 0.0 || (-4..16).contains(&exponent) {
        let positional = format!("{v}");
        if positional.contains('.') {
            positional
        } else {
            format!("{positional}.0")
        }
    } else {
        let sign = if exponent < 0 { '-' } else { '+' };
        format!("{mantissa}e{sign}{:02}", exponent.abs())
    }
}

/// Looks up `name` and returns the `value` half of its `[raw, value]` pair.
fn field_value(params: &Mapping, name: &str) -> Option<Value> {
    let field = param_field(params, name);
    if field.is_none() {
        debug!(field = name, "parameter is missing or not a [raw, value] pair");
    }
    field.map(|f| f.value)
}

/// Reads a `[raw, value]` field as a typed `ParamField`, if it has that shape.
/// A `{raw: .., value: ..}` mapping is accepted as well.
pub fn param_field(params: &Mapping, name: &str) -> Option<ParamField> {
    match params.get(name)? {
        Value::Sequence(items) => match items.as_slice() {
            [raw, value] => Some(ParamField {
                raw: raw.clone(),
                value: value.clone(),
            }),
            _ => None,
        },
        mapping @ Value::Mapping(_) => serde_yaml::from_value(mapping.clone()).ok(),
        _ => None,
    }
}

/// Validates `parsed_params` and writes the preprocessing configuration file to
/// `output_path`. Returns the input mapping unchanged.
///
/// Validation completes before the output file is opened, so on error nothing is
/// created or modified.
pub fn create<'a>(parsed_params: &'a Mapping, output_path: impl AsRef<Path>) -> Result<&'a Mapping> {
    let output_path = output_path.as_ref();
    let params = PreprocessParams::from_mapping(parsed_params)?;
    debug!(?params, "preprocessing parameters validated");

    params.write_to(output_path)?;
    info!(
        path = %output_path.display(),
        "Generate preprocessing configuration file succeeded, now you can serialize preprocessing configuration parameters using TTV."
    );

    Ok(parsed_params)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core_modules::config_loader::ConfigLoader;
    use tempfile::tempdir;

    const EXPECTED: &str = "\
1 uint32 3 input_channel
2 uint32 224 input_h
3 uint32 224 input_w
4 uint32 1 mean_type
5 float 103.94 mean_value_r
6 float 116.78 mean_value_g
7 float 123.68 mean_value_b
8 string ./mean.txt mean_map
9 float 0.017 scale_value
";

    fn params_yaml(channel: &str, h: &str, w: &str, mean_type: &str, scale: &str) -> Mapping {
        let yaml = format!(
            "input_channel: [uint32, {channel}]\n\
             input_h: [uint32, {h}]\n\
             input_w: [uint32, {w}]\n\
             mean_type: [uint32, {mean_type}]\n\
             scale_value: [float, {scale}]\n"
        );
        let documents = ConfigLoader::parse(&yaml, "test.yaml").expect("parse");
        documents.first().cloned().expect("one document")
    }

    fn default_params() -> Mapping {
        params_yaml("3", "224", "224", "1", "0.017")
    }

    fn invalid_field(result: Result<PreprocessParams>) -> &'static str {
        match result {
            Err(PrecfgError::InvalidParameter { field, .. }) => field,
            other => panic!("expected InvalidParameter, got {other:?}"),
        }
    }

    #[test]
    fn writes_the_fixed_nine_line_block() {
        let dir = tempdir().expect("tempdir");
        let path = dir.path().join("model.txt");
        let params = default_params();

        let returned = create(&params, &path).expect("create");

        assert_eq!(returned, &params);
        let written = std::fs::read_to_string(&path).expect("read output");
        assert_eq!(written, EXPECTED);
        assert_eq!(written.lines().count(), ENTRY_COUNT);
    }

    #[test]
    fn zero_or_negative_width_is_rejected_without_touching_the_file() {
        let dir = tempdir().expect("tempdir");

        let fresh = dir.path().join("fresh.txt");
        let err = create(&params_yaml("3", "224", "0", "1", "0.017"), &fresh).unwrap_err();
        assert!(matches!(err, PrecfgError::InvalidParameter { field: "input_w", .. }));
        assert!(!fresh.exists());

        let existing = dir.path().join("existing.txt");
        std::fs::write(&existing, "previous contents\n").expect("seed file");
        let err = create(&params_yaml("3", "224", "-5", "1", "0.017"), &existing).unwrap_err();
        assert!(matches!(err, PrecfgError::InvalidParameter { field: "input_w", .. }));
        assert_eq!(std::fs::read_to_string(&existing).expect("read"), "previous contents\n");
    }

    #[test]
    fn scale_must_lie_in_the_half_open_unit_interval() {
        for scale in ["1.5", "0", "0.0", "-0.1"] {
            let result = PreprocessParams::from_mapping(&params_yaml("3", "224", "224", "1", scale));
            assert_eq!(invalid_field(result), "scale_value", "scale {scale}");
        }

        let params = PreprocessParams::from_mapping(&params_yaml("3", "224", "224", "1", "1.0")).expect("1.0 is valid");
        assert_eq!(params.scale_value, 1.0);
    }

    #[test]
    fn integer_scale_is_written_as_float() {
        let params = PreprocessParams::from_mapping(&params_yaml("3", "224", "224", "1", "1")).expect("valid");
        assert!(params.render().ends_with("9 float 1.0 scale_value\n"));
    }

    #[test]
    fn mean_type_accepts_only_zero_one_two() {
        for mean_type in ["0", "1", "2"] {
            let params =
                PreprocessParams::from_mapping(&params_yaml("3", "224", "224", mean_type, "0.017")).expect("valid");
            assert_eq!(params.mean_type.as_u32().to_string(), mean_type);
        }

        let result = PreprocessParams::from_mapping(&params_yaml("3", "224", "224", "3", "0.017"));
        assert_eq!(invalid_field(result), "mean_type");
    }

    #[test]
    fn non_integer_dimensions_are_rejected() {
        let result = PreprocessParams::from_mapping(&params_yaml("three", "224", "224", "1", "0.017"));
        assert_eq!(invalid_field(result), "input_channel");

        let result = PreprocessParams::from_mapping(&params_yaml("3", "22.4", "224", "1", "0.017"));
        assert_eq!(invalid_field(result), "input_h");
    }

    #[test]
    fn validation_runs_in_schema_order() {
        let mut params = default_params();
        params.remove("input_h");
        params.remove("scale_value");

        let result = PreprocessParams::from_mapping(&params);
        assert_eq!(invalid_field(result), "input_h");
    }

    #[test]
    fn field_that_is_not_a_pair_counts_as_missing() {
        let mut params = default_params();
        params.insert("input_channel".into(), 3.into());

        let result = PreprocessParams::from_mapping(&params);
        assert_eq!(invalid_field(result), "input_channel");
    }

    #[test]
    fn raw_half_of_a_field_is_ignored() {
        let mut params = default_params();
        params.insert(
            "input_w".into(),
            Value::Sequence(vec![Value::Null, 640.into()]),
        );

        let field = param_field(&params, "input_w").expect("pair");
        assert_eq!(field.raw, Value::Null);
        let params = PreprocessParams::from_mapping(&params).expect("valid");
        assert_eq!(params.input_w, 640);
    }

    #[test]
    fn yaml_pair_reads_as_a_param_field() {
        let documents = ConfigLoader::parse("input_channel: [uint32, 3]\n", "pair.yaml").expect("parse");
        let params = documents.first().expect("one document");

        let field = param_field(params, "input_channel").expect("[raw, value] pair");
        assert_eq!(field.raw, Value::from("uint32"));
        assert_eq!(field.value, Value::from(3));
    }

    #[test]
    fn raw_value_mapping_reads_as_a_param_field() {
        let documents =
            ConfigLoader::parse("input_h: {raw: uint32, value: 224}\n", "mapping.yaml").expect("parse");
        let field = param_field(documents.first().expect("document"), "input_h").expect("mapping form");
        assert_eq!(field.value, Value::from(224));
    }

    #[test]
    fn wrong_sized_sequences_are_not_fields() {
        let documents = ConfigLoader::parse("a: [uint32]\nb: [uint32, 1, 2]\n", "sizes.yaml").expect("parse");
        let params = documents.first().expect("document");
        assert!(param_field(params, "a").is_none());
        assert!(param_field(params, "b").is_none());
    }

    #[test]
    fn whole_number_float_mean_type_is_written_as_integer() {
        let params = PreprocessParams::from_mapping(&params_yaml("3", "224", "224", "1.0", "0.017")).expect("valid");
        assert_eq!(params.mean_type, MeanType::One);
        assert!(params.render().contains("4 uint32 1 mean_type\n"));

        let result = PreprocessParams::from_mapping(&params_yaml("3", "224", "224", "1.5", "0.017"));
        assert_eq!(invalid_field(result), "mean_type");
    }

    #[test]
    fn floats_use_the_established_text_form() {
        assert_eq!(format_float(0.017), "0.017");
        assert_eq!(format_float(1.0), "1.0");
        assert_eq!(format_float(103.94), "103.94");
        assert_eq!(format_float(0.0001), "0.0001");
        assert_eq!(format_float(0.00001), "1e-05");
        assert_eq!(format_float(0.000015), "1.5e-05");
        assert_eq!(format_float(1.5e16), "1.5e+16");

        let params = PreprocessParams::from_mapping(&params_yaml("3", "224", "224", "1", "0.00001")).expect("valid");
        assert!(params.render().ends_with("9 float 1e-05 scale_value\n"));
    }

    #[test]
    fn readme_parameter_file_generates_the_expected_block() {
        let dir = tempdir().expect("tempdir");
        let input = dir.path().join("resnet50.yaml");
        let output = dir.path().join("resnet50.txt");
        std::fs::write(
            &input,
            "input_channel: [uint32, 3]\n\
             input_h: [uint32, 224]\n\
             input_w: [uint32, 224]\n\
             mean_type: [uint32, 1]\n\
             scale_value: [float, 0.017]\n",
        )
        .expect("write input");

        let documents = ConfigLoader::read(&input).expect("read");
        let first = documents.first().expect("one document");
        create(first, &output).expect("create");

        assert_eq!(std::fs::read_to_string(&output).expect("output"), EXPECTED);
    }

    #[test]
    fn error_message_names_the_field() {
        let err = PreprocessParams::from_mapping(&Mapping::new()).unwrap_err();
        assert_eq!(
            err.to_string(),
            "Error: missing or invalid input_channel: it must be an integer, please check the preprocess file!"
        );
    }
}
