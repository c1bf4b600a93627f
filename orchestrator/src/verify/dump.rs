//! Raw little-endian `f32` tensor dumps and the info log that indexes them.

use std::{
    borrow::Cow,
    fmt, fs, io,
    path::{Path, PathBuf},
};

/// What a dump holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum DumpRole {
    /// A layer's first output after its forward step.
    Forward,
    /// A layer's first input gradient after its backward step.
    Backward,
    /// A parameter gradient.
    Gradient,
    /// A parameter value.
    Weight,
}

impl DumpRole {
    pub const ALL: [DumpRole; 4] = [Self::Forward, Self::Backward, Self::Gradient, Self::Weight];

    /// The four letter tag used in file names and info logs.
    pub fn tag(self) -> &'static str {
        match self {
            Self::Forward => "Fwrd",
            Self::Backward => "Bwrd",
            Self::Gradient => "Grad",
            Self::Weight => "Wght",
        }
    }

    pub fn from_tag(tag: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|role| role.tag() == tag)
    }
}

/// Which pass wrote a dump.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DumpSide {
    /// Written by `collect`.
    Reference,
    /// Written by `compare`.
    Target,
}

impl DumpSide {
    fn prefix(self) -> &'static str {
        match self {
            Self::Reference => "REF",
            Self::Target => "TGT",
        }
    }
}

/// Identifies one dump file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DumpId {
    pub role: DumpRole,
    pub side: DumpSide,
    pub index: usize,
}

impl DumpId {
    pub fn new(role: DumpRole, side: DumpSide, index: usize) -> Self {
        Self { role, side, index }
    }

    /// The file name of this dump, e.g. `REFFwrd0004.bin`.
    pub fn file_name(&self) -> String {
        format!("{}{}.bin", self.side.prefix(), key(self.role, self.index))
    }

    pub fn path(&self, dir: &Path) -> PathBuf {
        dir.join(self.file_name())
    }
}

/// The join key of a dump in the info log, e.g. `Fwrd0004`.
pub fn key(role: DumpRole, index: usize) -> String {
    format!("{}{index:04}", role.tag())
}

fn le_bytes(data: &[f32]) -> Cow<'_, [u8]> {
    if cfg!(target_endian = "little") {
        Cow::Borrowed(bytemuck::cast_slice(data))
    } else {
        Cow::Owned(data.iter().flat_map(|x| x.to_le_bytes()).collect())
    }
}

/// Writes `data` as the dump `id` inside `dir`.
///
/// # Returns
/// The path of the written file.
pub fn write(dir: &Path, id: DumpId, data: &[f32]) -> io::Result<PathBuf> {
    let path = id.path(dir);
    fs::write(&path, le_bytes(data))?;
    Ok(path)
}

/// Reads a whole dump file.
pub fn read(path: &Path) -> io::Result<Vec<f32>> {
    let bytes = fs::read(path)?;
    if bytes.len() % size_of::<f32>() != 0 {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("{} holds {} bytes, not a whole amount of f32", path.display(), bytes.len()),
        ));
    }

    Ok(bytes
        .chunks_exact(size_of::<f32>())
        .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
        .collect())
}

/// Reads a dump file into `out`, its length must match exactly.
pub fn read_into(path: &Path, out: &mut [f32]) -> io::Result<()> {
    let bytes = fs::read(path)?;
    let expected = out.len() * size_of::<f32>();
    if bytes.len() != expected {
        return Err(io::Error::new(
            io::ErrorKind::UnexpectedEof,
            format!("{} holds {} bytes, expected {expected}", path.display(), bytes.len()),
        ));
    }

    for (x, b) in out.iter_mut().zip(bytes.chunks_exact(size_of::<f32>())) {
        *x = f32::from_le_bytes([b[0], b[1], b[2], b[3]]);
    }

    Ok(())
}

/// One line of an info log: a traversal step and the kind of its layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InfoEntry {
    pub role: DumpRole,
    pub index: usize,
    pub kind: String,
}

impl fmt::Display for InfoEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", key(self.role, self.index), self.kind)
    }
}

/// The name of the info log of a pass run on the host or on a device.
pub fn info_file_name(on_device: bool) -> &'static str {
    match on_device {
        true => "DeviceInfo.txt",
        false => "HostInfo.txt",
    }
}

/// Parses an info log, one `<tag><index:04> <kind>` entry per line.
pub fn parse_info(text: &str) -> io::Result<Vec<InfoEntry>> {
    text.lines()
        .filter(|line| !line.trim().is_empty())
        .map(|line| {
            let invalid = || {
                io::Error::new(io::ErrorKind::InvalidData, format!("malformed info line {line:?}"))
            };

            let (key, kind) = line.split_once(' ').ok_or_else(invalid)?;
            let (tag, index) = key.split_at_checked(4).ok_or_else(invalid)?;
            Ok(InfoEntry {
                role: DumpRole::from_tag(tag).ok_or_else(invalid)?,
                index: index.parse().map_err(|_| invalid())?,
                kind: kind.trim().to_string(),
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn file_names_encode_side_role_and_index() {
        let id = DumpId::new(DumpRole::Forward, DumpSide::Reference, 4);
        assert_eq!(id.file_name(), "REFFwrd0004.bin");

        let id = DumpId::new(DumpRole::Weight, DumpSide::Target, 12);
        assert_eq!(id.file_name(), "TGTWght0012.bin");
    }

    #[test]
    fn file_names_are_unique_per_triple() {
        let mut names = std::collections::HashSet::new();
        for role in DumpRole::ALL {
            for side in [DumpSide::Reference, DumpSide::Target] {
                for index in 0..20 {
                    assert!(names.insert(DumpId::new(role, side, index).file_name()));
                }
            }
        }
    }

    #[test]
    fn read_into_rejects_short_dump() {
        let dir = tempfile::tempdir().unwrap();
        let id = DumpId::new(DumpRole::Backward, DumpSide::Reference, 1);
        let path = write(dir.path(), id, &[1.0, 2.0]).unwrap();

        let mut out = [0.0; 3];
        assert!(read_into(&path, &mut out).is_err());

        let mut out = [0.0; 2];
        read_into(&path, &mut out).unwrap();
        assert_eq!(out, [1.0, 2.0]);
        assert_eq!(fs::read(&path).unwrap(), [1.0f32.to_le_bytes(), 2.0f32.to_le_bytes()].concat());
    }

    #[test]
    fn info_lines_parse_back() {
        let entry = InfoEntry {
            role: DumpRole::Backward,
            index: 3,
            kind: "InnerProduct".into(),
        };
        let text = format!("{entry}\nFwrd0000 Data\n");

        let parsed = parse_info(&text).unwrap();
        assert_eq!(parsed[0], entry);
        assert_eq!(parsed[1].role, DumpRole::Forward);
        assert!(parse_info("Xxxx0001 Data").is_err());
    }
}
