//! VTRC (Trace) format implementation
//!
//! One VTRC file holds every variable recorded for one direction of a
//! simulation. Each variable is a `[steps × columns]` block of `f64` values
//! (row-major) plus the node ids naming its columns. An optional reserved
//! `metadata` section carries scalar attributes such as `dt`.
//!
//! Node ids are decoded when the file is opened; sample data is read one
//! column at a time, on demand.

use crate::{
    error::{Result, StorageError},
    file::TraceBytes,
    ids::{NodeId, OpenMode, VariableName},
    magic,
    schemas::{byte_range, calculate_checksum, put_short_str, validate_checksum, validate_magic, ByteReader},
};

use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::Path;

/// Current VTRC schema version
pub const VTRC_VERSION: u32 = 1;

/// Size of the fixed header in bytes
pub const HEADER_LEN: usize = 64;

/// Name of the reserved metadata section
pub const METADATA_SECTION: &str = "metadata";

/// Metadata attribute holding the step size in seconds
pub const DT_ATTR: &str = "dt";

const KIND_VARIABLE: u8 = 0;
const KIND_METADATA: u8 = 1;

/// Bytes covered by the header checksum
const HEADER_CHECKSUM_SPAN: usize = 36;

/// VTRC format header
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VTRCHeader {
    /// Magic number "VTRC"
    pub magic: [u8; 4],
    /// Schema version (current: 1)
    pub version: u32,
    /// Number of directory entries (variables plus metadata)
    pub section_count: u32,
    /// Reserved flags
    pub flags: u32,
    /// Offset to the section directory
    pub directory_offset: u64,
    /// Length of the section directory
    pub directory_len: u64,
    /// CRC32 of the section directory
    pub directory_checksum: u32,
    /// CRC32 of header bytes 0..36
    pub header_checksum: u32,
}

impl VTRCHeader {
    /// Create a new VTRC header
    pub fn new(section_count: u32, directory_offset: u64, directory: &[u8]) -> Self {
        let mut header = Self {
            magic: magic::VTRC,
            version: VTRC_VERSION,
            section_count,
            flags: 0,
            directory_offset,
            directory_len: directory.len() as u64,
            directory_checksum: calculate_checksum(directory),
            header_checksum: 0,
        };
        header.header_checksum = calculate_checksum(&header.encode()[..HEADER_CHECKSUM_SPAN]);
        header
    }

    /// Encode to the fixed 64-byte layout
    pub fn encode(&self) -> [u8; HEADER_LEN] {
        let mut out = [0u8; HEADER_LEN];
        out[0..4].copy_from_slice(&self.magic);
        out[4..8].copy_from_slice(&self.version.to_le_bytes());
        out[8..12].copy_from_slice(&self.section_count.to_le_bytes());
        out[12..16].copy_from_slice(&self.flags.to_le_bytes());
        out[16..24].copy_from_slice(&self.directory_offset.to_le_bytes());
        out[24..32].copy_from_slice(&self.directory_len.to_le_bytes());
        out[32..36].copy_from_slice(&self.directory_checksum.to_le_bytes());
        out[36..40].copy_from_slice(&self.header_checksum.to_le_bytes());
        out
    }

    /// Decode and validate a header from the start of `bytes`
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        validate_magic(bytes, magic::VTRC)?;
        if bytes.len() < HEADER_LEN {
            return Err(StorageError::invalid_format("VTRC too small"));
        }

        let mut r = ByteReader::new(&bytes[..HEADER_LEN]);
        let mut magic_bytes = [0u8; 4];
        magic_bytes.copy_from_slice(r.take(4)?);
        let header = Self {
            magic: magic_bytes,
            version: r.u32()?,
            section_count: r.u32()?,
            flags: r.u32()?,
            directory_offset: r.u64()?,
            directory_len: r.u64()?,
            directory_checksum: r.u32()?,
            header_checksum: r.u32()?,
        };
        header.validate()?;
        validate_checksum(&bytes[..HEADER_CHECKSUM_SPAN], header.header_checksum)?;
        Ok(header)
    }

    /// Validate this header
    pub fn validate(&self) -> Result<()> {
        validate_magic(&self.magic, magic::VTRC)?;

        if self.version != VTRC_VERSION {
            return Err(StorageError::UnsupportedVersion {
                version: self.version,
                supported: VTRC_VERSION,
            });
        }

        Ok(())
    }
}

/// Directory entry describing one variable
#[derive(Debug, Clone)]
pub struct VariableSection {
    name: VariableName,
    steps: usize,
    uids: Vec<NodeId>,
    index: HashMap<NodeId, usize>,
    data_offset: u64,
}

impl VariableSection {
    /// Variable name
    pub fn name(&self) -> &VariableName {
        &self.name
    }

    /// Number of time steps (rows)
    pub fn steps(&self) -> usize {
        self.steps
    }

    /// Number of nodes (columns)
    pub fn columns(&self) -> usize {
        self.uids.len()
    }

    /// Column-to-node mapping
    pub fn uids(&self) -> &[NodeId] {
        &self.uids
    }

    /// Column holding `node`, if the variable covers it
    pub fn column_of(&self, node: &str) -> Option<usize> {
        self.index.get(node).copied()
    }

    fn data_len(&self) -> u64 {
        (self.steps as u64) * (self.uids.len() as u64) * 8
    }
}

/// An opened VTRC file
#[derive(Debug)]
pub struct TraceFile {
    bytes: TraceBytes,
    mode: OpenMode,
    header: VTRCHeader,
    metadata: Option<BTreeMap<String, f64>>,
    variables: Vec<VariableSection>,
    by_name: HashMap<VariableName, usize>,
}

impl TraceFile {
    /// Memory-map and parse the file at `path`
    pub fn open<P: AsRef<Path>>(path: P, mode: OpenMode) -> Result<Self> {
        let bytes = TraceBytes::map(path, mode, HEADER_LEN)?;
        Self::parse(bytes, mode)
    }

    /// Parse an in-memory VTRC image
    pub fn from_bytes(bytes: Vec<u8>) -> Result<Self> {
        Self::parse(TraceBytes::Owned(bytes), OpenMode::ReadOnly)
    }

    fn parse(bytes: TraceBytes, mode: OpenMode) -> Result<Self> {
        let header = VTRCHeader::decode(&bytes)?;
        let directory = byte_range(&bytes, header.directory_offset, header.directory_len)?;
        validate_checksum(directory, header.directory_checksum)?;

        let mut r = ByteReader::new(directory);
        let mut metadata = None;
        let mut variables = Vec::new();
        let mut by_name = HashMap::new();

        for _ in 0..header.section_count {
            let kind = r.u8()?;
            let name = r.short_str()?.to_string();
            match kind {
                KIND_METADATA => {
                    if metadata.is_some() {
                        return Err(StorageError::invalid_format("duplicate metadata section"));
                    }
                    let count = r.u16()?;
                    let mut attrs = BTreeMap::new();
                    for _ in 0..count {
                        let key = r.short_str()?.to_string();
                        let value = r.f64()?;
                        attrs.insert(key, value);
                    }
                    metadata = Some(attrs);
                }
                KIND_VARIABLE => {
                    if name == METADATA_SECTION {
                        return Err(StorageError::invalid_format(
                            "variable may not use the reserved name 'metadata'",
                        ));
                    }
                    let section = parse_variable(&bytes, &mut r, &name)?;
                    if by_name
                        .insert(section.name.clone(), variables.len())
                        .is_some()
                    {
                        return Err(StorageError::invalid_format(format!(
                            "duplicate variable '{}'",
                            name
                        )));
                    }
                    variables.push(section);
                }
                other => {
                    return Err(StorageError::invalid_format(format!(
                        "unknown section kind {} for '{}'",
                        other, name
                    )));
                }
            }
        }

        if r.remaining() != 0 {
            return Err(StorageError::invalid_format(format!(
                "{} trailing bytes in directory",
                r.remaining()
            )));
        }

        Ok(Self {
            bytes,
            mode,
            header,
            metadata,
            variables,
            by_name,
        })
    }

    /// Parsed header
    pub fn header(&self) -> &VTRCHeader {
        &self.header
    }

    /// Mode the file was opened with
    pub fn mode(&self) -> OpenMode {
        self.mode
    }

    /// True if the file is backed by a memory mapping
    pub fn is_mapped(&self) -> bool {
        self.bytes.is_mapped()
    }

    /// True if the file carries the reserved metadata section
    pub fn has_metadata(&self) -> bool {
        self.metadata.is_some()
    }

    /// Attribute from the reserved metadata section
    pub fn metadata_attr(&self, name: &str) -> Option<f64> {
        self.metadata.as_ref()?.get(name).copied()
    }

    /// Every metadata attribute, sorted by name
    pub fn metadata_attrs(&self) -> impl Iterator<Item = (&str, f64)> + '_ {
        self.metadata
            .iter()
            .flat_map(|attrs| attrs.iter().map(|(k, v)| (k.as_str(), *v)))
    }

    /// All variables, in file order (the metadata section is not included)
    pub fn variables(&self) -> &[VariableSection] {
        &self.variables
    }

    /// Variable by name
    pub fn variable(&self, name: &str) -> Option<&VariableSection> {
        self.by_name.get(name).map(|&i| &self.variables[i])
    }

    /// Read column `column` of `section`, one value per time step
    pub fn read_column(&self, section: &VariableSection, column: usize) -> Result<Vec<f64>> {
        let columns = section.columns();
        if column >= columns {
            return Err(StorageError::OutOfBounds {
                index: column,
                max: columns,
            });
        }

        let block = byte_range(&self.bytes, section.data_offset, section.data_len())?;
        let row_len = columns * 8;
        let start = column * 8;
        let values = block
            .chunks_exact(row_len)
            .map(|row| {
                let mut raw = [0u8; 8];
                raw.copy_from_slice(&row[start..start + 8]);
                f64::from_le_bytes(raw)
            })
            .collect();
        Ok(values)
    }
}

fn parse_variable(bytes: &[u8], r: &mut ByteReader<'_>, name: &str) -> Result<VariableSection> {
    let steps = r.u64()?;
    let columns = r.u64()?;
    let uids_offset = r.u64()?;
    let uids_len = r.u64()?;
    let data_offset = r.u64()?;

    let steps = usize::try_from(steps)
        .map_err(|_| StorageError::invalid_format(format!("'{}': step count too large", name)))?;
    let columns = usize::try_from(columns)
        .map_err(|_| StorageError::invalid_format(format!("'{}': column count too large", name)))?;

    let mut uid_reader = ByteReader::new(byte_range(bytes, uids_offset, uids_len)?);
    let mut uids = Vec::with_capacity(columns);
    let mut index = HashMap::with_capacity(columns);
    for column in 0..columns {
        let uid = NodeId::new(uid_reader.short_str()?);
        if index.insert(uid.clone(), column).is_some() {
            return Err(StorageError::invalid_format(format!(
                "'{}': duplicate uid '{}'",
                name, uid
            )));
        }
        uids.push(uid);
    }
    if uid_reader.remaining() != 0 {
        return Err(StorageError::invalid_format(format!(
            "'{}': uids block has {} trailing bytes",
            name,
            uid_reader.remaining()
        )));
    }

    let section = VariableSection {
        name: VariableName::new(name),
        steps,
        uids,
        index,
        data_offset,
    };

    let data_len = (steps as u64)
        .checked_mul(columns as u64)
        .and_then(|cells| cells.checked_mul(8))
        .ok_or_else(|| StorageError::invalid_format(format!("'{}': data size overflows", name)))?;
    byte_range(bytes, data_offset, data_len)?;

    Ok(section)
}

struct PendingVariable {
    name: VariableName,
    uids: Vec<NodeId>,
    steps: usize,
    data: Vec<f64>,
}

/// Builder for VTRC files
#[derive(Default)]
pub struct TraceFileWriter {
    metadata: Option<BTreeMap<String, f64>>,
    variables: Vec<PendingVariable>,
}

impl TraceFileWriter {
    /// Create an empty writer (no metadata section, no variables)
    pub fn new() -> Self {
        Self::default()
    }

    /// Set an attribute of the reserved metadata section, creating it
    pub fn metadata_attr(mut self, name: impl Into<String>, value: f64) -> Self {
        self.metadata
            .get_or_insert_with(BTreeMap::new)
            .insert(name.into(), value);
        self
    }

    /// Set the `dt` metadata attribute
    pub fn dt(self, dt: f64) -> Self {
        self.metadata_attr(DT_ATTR, dt)
    }

    /// Add a variable. `data` is row-major `[steps][uids.len()]`.
    pub fn variable<I, S>(mut self, name: &str, uids: I, steps: usize, data: Vec<f64>) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<NodeId>,
    {
        if name.is_empty() || name == METADATA_SECTION {
            return Err(StorageError::invalid_format(format!(
                "invalid variable name '{}'",
                name
            )));
        }
        if self.variables.iter().any(|v| v.name.as_str() == name) {
            return Err(StorageError::invalid_format(format!(
                "duplicate variable '{}'",
                name
            )));
        }

        let uids: Vec<NodeId> = uids.into_iter().map(Into::into).collect();
        let mut seen = HashSet::with_capacity(uids.len());
        if let Some(dup) = uids.iter().find(|uid| !seen.insert(uid.as_str())) {
            return Err(StorageError::invalid_format(format!(
                "'{}': duplicate uid '{}'",
                name, dup
            )));
        }

        if data.len() != steps * uids.len() {
            return Err(StorageError::invalid_format(format!(
                "'{}': data has {} values, expected {} steps x {} columns",
                name,
                data.len(),
                steps,
                uids.len()
            )));
        }

        self.variables.push(PendingVariable {
            name: VariableName::new(name),
            uids,
            steps,
            data,
        });
        Ok(self)
    }

    /// Add a variable from per-step rows
    pub fn variable_rows<I, S>(self, name: &str, uids: I, rows: &[Vec<f64>]) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<NodeId>,
    {
        let uids: Vec<NodeId> = uids.into_iter().map(Into::into).collect();
        if let Some((step, row)) = rows.iter().enumerate().find(|(_, r)| r.len() != uids.len()) {
            return Err(StorageError::invalid_format(format!(
                "'{}': row {} has {} values, expected {}",
                name,
                step,
                row.len(),
                uids.len()
            )));
        }
        let data = rows.iter().flatten().copied().collect();
        self.variable(name, uids, rows.len(), data)
    }

    /// Serialize to a VTRC image
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        let mut out = vec![0u8; HEADER_LEN];
        let mut directory = Vec::new();
        let mut section_count = 0u32;

        if let Some(attrs) = &self.metadata {
            directory.push(KIND_METADATA);
            put_short_str(&mut directory, METADATA_SECTION)?;
            let count = u16::try_from(attrs.len())
                .map_err(|_| StorageError::invalid_format("too many metadata attributes"))?;
            directory.extend_from_slice(&count.to_le_bytes());
            for (key, value) in attrs {
                put_short_str(&mut directory, key)?;
                directory.extend_from_slice(&value.to_le_bytes());
            }
            section_count += 1;
        }

        for var in &self.variables {
            let uids_offset = out.len() as u64;
            for uid in &var.uids {
                put_short_str(&mut out, uid.as_str())?;
            }
            let uids_len = out.len() as u64 - uids_offset;

            let data_offset = out.len() as u64;
            for value in &var.data {
                out.extend_from_slice(&value.to_le_bytes());
            }

            directory.push(KIND_VARIABLE);
            put_short_str(&mut directory, var.name.as_str())?;
            directory.extend_from_slice(&(var.steps as u64).to_le_bytes());
            directory.extend_from_slice(&(var.uids.len() as u64).to_le_bytes());
            directory.extend_from_slice(&uids_offset.to_le_bytes());
            directory.extend_from_slice(&uids_len.to_le_bytes());
            directory.extend_from_slice(&data_offset.to_le_bytes());
            section_count += 1;
        }

        let directory_offset = out.len() as u64;
        out.extend_from_slice(&directory);

        let header = VTRCHeader::new(section_count, directory_offset, &directory);
        out[..HEADER_LEN].copy_from_slice(&header.encode());
        Ok(out)
    }

    /// Serialize and write to `path`
    pub fn write_to<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let bytes = self.to_bytes()?;
        if let Some(parent) = path.as_ref().parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        std::fs::write(path, bytes)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> TraceFileWriter {
        TraceFileWriter::new()
            .dt(0.5)
            .variable(
                "V",
                ["a", "b"],
                4,
                vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0, 7.0, 8.0],
            )
            .unwrap()
            .variable("spike_state", ["b"], 4, vec![0.0, 1.0, 0.0, 1.0])
            .unwrap()
    }

    #[test]
    fn test_header_encode_decode() {
        let header = VTRCHeader::new(3, 128, b"directory");
        let bytes = header.encode();
        let decoded = VTRCHeader::decode(&bytes).unwrap();
        assert_eq!(decoded, header);
    }

    #[test]
    fn test_header_corruption_detected() {
        let mut bytes = VTRCHeader::new(1, 64, b"x").encode();
        bytes[9] ^= 0xFF;
        assert!(matches!(
            VTRCHeader::decode(&bytes),
            Err(StorageError::ChecksumMismatch { .. })
        ));
    }

    #[test]
    fn test_bad_version() {
        let mut header = VTRCHeader::new(0, 64, b"");
        header.version = 9;
        assert!(matches!(
            header.validate(),
            Err(StorageError::UnsupportedVersion { version: 9, .. })
        ));
    }

    #[test]
    fn test_read_columns() {
        let file = TraceFile::from_bytes(sample().to_bytes().unwrap()).unwrap();
        assert!(file.has_metadata());
        assert_eq!(file.metadata_attr(DT_ATTR), Some(0.5));
        assert_eq!(file.variables().len(), 2);

        let v = file.variable("V").unwrap();
        assert_eq!(v.steps(), 4);
        assert_eq!(v.columns(), 2);
        assert_eq!(v.column_of("b"), Some(1));
        assert_eq!(v.column_of("x"), None);
        assert_eq!(file.read_column(v, 1).unwrap(), vec![2.0, 4.0, 6.0, 8.0]);
        assert_eq!(file.read_column(v, 0).unwrap(), vec![1.0, 3.0, 5.0, 7.0]);
        assert!(matches!(
            file.read_column(v, 2),
            Err(StorageError::OutOfBounds { index: 2, max: 2 })
        ));
    }

    #[test]
    fn test_no_metadata_section() {
        let bytes = TraceFileWriter::new()
            .variable("I", ["a"], 2, vec![0.1, 0.2])
            .unwrap()
            .to_bytes()
            .unwrap();
        let file = TraceFile::from_bytes(bytes).unwrap();
        assert!(!file.has_metadata());
        assert_eq!(file.metadata_attr(DT_ATTR), None);
    }

    #[test]
    fn test_writer_rejects_bad_shapes() {
        let err = TraceFileWriter::new()
            .variable("V", ["a", "b"], 3, vec![1.0; 5])
            .err()
            .unwrap();
        assert!(matches!(err, StorageError::InvalidFormat { .. }));

        assert!(TraceFileWriter::new()
            .variable("metadata", ["a"], 1, vec![1.0])
            .is_err());
        assert!(TraceFileWriter::new()
            .variable("V", ["a", "a"], 1, vec![1.0, 2.0])
            .is_err());
        assert!(TraceFileWriter::new()
            .variable_rows("V", ["a", "b"], &[vec![1.0, 2.0], vec![3.0]])
            .is_err());
    }

    #[test]
    fn test_truncated_file_rejected() {
        let mut bytes = sample().to_bytes().unwrap();
        bytes.truncate(bytes.len() - 3);
        assert!(TraceFile::from_bytes(bytes).is_err());
    }

    #[test]
    fn test_directory_corruption_detected() {
        let mut bytes = sample().to_bytes().unwrap();
        let last = bytes.len() - 1;
        bytes[last] ^= 0x01;
        assert!(matches!(
            TraceFile::from_bytes(bytes),
            Err(StorageError::ChecksumMismatch { .. })
        ));
    }

    #[test]
    fn test_open_mapped() {
        let temp_dir = tempfile::tempdir().unwrap();
        let path = temp_dir.path().join("out.vtrc");
        sample().write_to(&path).unwrap();

        let file = TraceFile::open(&path, OpenMode::ReadOnly).unwrap();
        assert!(file.is_mapped());
        assert_eq!(file.mode(), OpenMode::ReadOnly);
        let spikes = file.variable("spike_state").unwrap();
        assert_eq!(file.read_column(spikes, 0).unwrap(), vec![0.0, 1.0, 0.0, 1.0]);
    }
}
