//! Pack serialized traces into a VTRC file
//!
//! Input is a description of one direction's traces:
//!
//! ```json
//! { "dt": 0.0001,
//!   "variables": [ { "name": "V", "uids": ["a", "b"], "data": [[1, 2], [3, 4]] } ] }
//! ```
//!
//! `data` holds one row per time step, one value per uid. The same structure
//! is accepted bincode-encoded.
//!
//! Example:
//!   neugraph pack traces.json -o output.vtrc

use clap::{Args, ValueEnum};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

use neugraph_storage::TraceFileWriter;

use crate::config::CliConfig;
use crate::error::{CliError, CliResult};

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub enum PackFormat {
    Json,
    Bincode,
}

impl PackFormat {
    /// `.json` files are JSON, anything else is bincode
    fn from_path(path: &Path) -> Self {
        match path.extension().and_then(|e| e.to_str()) {
            Some(ext) if ext.eq_ignore_ascii_case("json") => Self::Json,
            _ => Self::Bincode,
        }
    }
}

#[derive(Args, Debug)]
pub struct PackCommand {
    /// Trace description file
    pub input: PathBuf,

    /// Output VTRC file
    #[arg(short, long)]
    pub out: PathBuf,

    /// Input format (inferred from the extension if omitted)
    #[arg(long, value_enum)]
    pub format: Option<PackFormat>,

    /// Step size to record, overriding the one in the description
    #[arg(long)]
    pub dt: Option<f64>,
}

/// Serialized traces of one direction
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TraceDescription {
    /// Step size in seconds
    #[serde(default)]
    pub dt: Option<f64>,
    /// Recorded variables
    pub variables: Vec<VariableDescription>,
}

/// One recorded variable
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VariableDescription {
    /// Variable name
    pub name: String,
    /// Node id of every column
    pub uids: Vec<String>,
    /// One row per time step
    pub data: Vec<Vec<f64>>,
}

impl TraceDescription {
    /// Build the VTRC writer for this description
    pub fn to_writer(&self, dt: Option<f64>) -> CliResult<TraceFileWriter> {
        let mut writer = TraceFileWriter::new();
        if let Some(dt) = dt.or(self.dt) {
            writer = writer.dt(dt);
        }
        for var in &self.variables {
            writer = writer.variable_rows(&var.name, var.uids.iter().cloned(), &var.data)?;
        }
        Ok(writer)
    }
}

impl PackCommand {
    pub async fn execute(self, config: &CliConfig) -> CliResult<()> {
        if !self.input.exists() {
            return Err(CliError::missing_resource(format!(
                "trace description {}",
                self.input.display()
            )));
        }

        let format = self.format.unwrap_or_else(|| PackFormat::from_path(&self.input));
        let description: TraceDescription = match format {
            PackFormat::Json => {
                let text = std::fs::read_to_string(&self.input)?;
                serde_json::from_str(&text)?
            }
            PackFormat::Bincode => {
                let bytes = std::fs::read(&self.input)?;
                bincode::deserialize(&bytes)?
            }
        };

        let dt = self.dt.or(description.dt).or(config.default_dt);
        if dt.is_none() {
            warn!("No dt recorded; the file can only be opened as an output with --dt");
        }
        let writer = description.to_writer(dt)?;

        if let Some(parent) = self.out.parent() {
            std::fs::create_dir_all(parent)?;
        }
        writer.write_to(&self.out)?;

        info!(
            "Packed {} variables into {}",
            description.variables.len(),
            self.out.display()
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_from_extension() {
        assert_eq!(PackFormat::from_path(Path::new("t.JSON")), PackFormat::Json);
        assert_eq!(PackFormat::from_path(Path::new("t.bin")), PackFormat::Bincode);
        assert_eq!(PackFormat::from_path(Path::new("t")), PackFormat::Bincode);
    }

    #[test]
    fn test_description_to_writer() {
        let json = r#"{ "dt": 0.5, "variables": [
            { "name": "V", "uids": ["a", "b"], "data": [[1, 2], [3, 4]] } ] }"#;
        let description: TraceDescription = serde_json::from_str(json).unwrap();
        let bytes = description.to_writer(None).unwrap().to_bytes().unwrap();

        let file = neugraph_storage::TraceFile::from_bytes(bytes).unwrap();
        assert_eq!(file.metadata_attr("dt"), Some(0.5));
        assert_eq!(file.variable("V").unwrap().steps(), 2);
    }

    #[test]
    fn test_ragged_rows_rejected() {
        let description = TraceDescription {
            dt: None,
            variables: vec![VariableDescription {
                name: "V".into(),
                uids: vec!["a".into(), "b".into()],
                data: vec![vec![1.0, 2.0], vec![3.0]],
            }],
        };
        assert!(matches!(
            description.to_writer(Some(1.0)),
            Err(CliError::Storage(_))
        ));
    }
}
