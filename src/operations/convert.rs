//! Built-in operations backed by an external converter program.

use super::{Operation, OperationError, OperationRegistry, Params, parse_params};
use serde::Deserialize;
use serde_json::{Value, json};
use std::ffi::OsString;
use std::io::Write;
use std::path::PathBuf;
use std::process::{Command, Output, Stdio};
use std::sync::Arc;

/// Converter program the built-in operations run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConverterConfig {
    pub program: PathBuf,
    /// Arguments placed before the operation's own arguments.
    pub leading_args: Vec<OsString>,
}

impl ConverterConfig {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            leading_args: Vec::new(),
        }
    }

    fn run(&self, args: &[String], input: Option<&str>) -> Result<Output, OperationError> {
        let spawn_error = |source| OperationError::Spawn {
            program: self.program.display().to_string(),
            source,
        };

        let mut child = Command::new(&self.program)
            .args(&self.leading_args)
            .args(args)
            .stdin(if input.is_some() {
                Stdio::piped()
            } else {
                Stdio::null()
            })
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(spawn_error)?;

        // Feed stdin from a separate thread so a converter that fills its
        // stdout pipe before reading all input cannot deadlock us.
        let feeder = match (child.stdin.take(), input) {
            (Some(mut stdin), Some(data)) => {
                let data = data.to_owned();
                Some(std::thread::spawn(move || {
                    // A converter may exit without reading everything.
                    let _ = stdin.write_all(data.as_bytes());
                }))
            }
            _ => None,
        };

        let output = child.wait_with_output().map_err(spawn_error)?;
        if let Some(feeder) = feeder {
            let _ = feeder.join();
        }

        if !output.status.success() {
            return Err(OperationError::ConverterFailed {
                status: output.status.to_string(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        Ok(output)
    }
}

impl Default for ConverterConfig {
    fn default() -> Self {
        Self::new("obabel")
    }
}

/// Register `convert`, `formats` and `version`.
pub fn register_conversions(
    registry: &mut OperationRegistry,
    converter: ConverterConfig,
) -> Result<(), OperationError> {
    let converter = Arc::new(converter);
    registry.register(Convert(Arc::clone(&converter)))?;
    registry.register(Formats(Arc::clone(&converter)))?;
    registry.register(Version(converter))?;
    Ok(())
}

fn validate_format(code: &str) -> Result<&str, OperationError> {
    let valid = !code.is_empty()
        && code
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'_');
    if valid {
        Ok(code)
    } else {
        Err(OperationError::InvalidFormat(code.to_string()))
    }
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct ConvertParams {
    from: String,
    to: String,
    data: String,
}

struct Convert(Arc<ConverterConfig>);

impl Operation for Convert {
    fn name(&self) -> &'static str {
        "convert"
    }

    fn invoke(&self, params: Params) -> Result<Value, OperationError> {
        let p: ConvertParams = parse_params(self.name(), params)?;
        let args = [
            format!("-i{}", validate_format(&p.from)?),
            format!("-o{}", validate_format(&p.to)?),
        ];
        let output = self.0.run(&args, Some(&p.data))?;
        Ok(Value::String(
            String::from_utf8_lossy(&output.stdout).into_owned(),
        ))
    }
}

#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(rename_all = "lowercase")]
enum Direction {
    Read,
    Write,
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct FormatsParams {
    #[serde(default)]
    direction: Option<Direction>,
}

/// One supported file format.
#[derive(Debug, Clone, PartialEq, Eq)]
struct FormatInfo {
    code: String,
    description: String,
}

/// Parse `code -- description` lines, skipping anything else.
fn parse_formats(listing: &str) -> Vec<FormatInfo> {
    listing
        .lines()
        .filter_map(|line| {
            let (code, description) = line.split_once(" -- ")?;
            let code = code.trim();
            if code.is_empty() {
                return None;
            }
            Some(FormatInfo {
                code: code.to_string(),
                description: description.trim().to_string(),
            })
        })
        .collect()
}

struct Formats(Arc<ConverterConfig>);

impl Operation for Formats {
    fn name(&self) -> &'static str {
        "formats"
    }

    fn invoke(&self, params: Params) -> Result<Value, OperationError> {
        let p: FormatsParams = parse_params(self.name(), params)?;
        let mut args = vec!["-L".to_string(), "formats".to_string()];
        match p.direction {
            Some(Direction::Read) => args.push("read".to_string()),
            Some(Direction::Write) => args.push("write".to_string()),
            None => {}
        }
        let output = self.0.run(&args, None)?;
        let formats = parse_formats(&String::from_utf8_lossy(&output.stdout))
            .into_iter()
            .map(|f| json!({"code": f.code, "description": f.description}))
            .collect();
        Ok(Value::Array(formats))
    }
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct VersionParams {}

struct Version(Arc<ConverterConfig>);

impl Operation for Version {
    fn name(&self) -> &'static str {
        "version"
    }

    fn invoke(&self, params: Params) -> Result<Value, OperationError> {
        let _: VersionParams = parse_params(self.name(), params)?;
        let output = self.0.run(&["-V".to_string()], None)?;
        let stdout = String::from_utf8_lossy(&output.stdout);
        let first = stdout
            .lines()
            .map(str::trim)
            .find(|line| !line.is_empty())
            .unwrap_or_default();
        Ok(Value::String(first.to_string()))
    }
}
