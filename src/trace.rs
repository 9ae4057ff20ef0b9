//! Workload traces
//!
//! A trace is a line-oriented list of operations:
//!
//! ```text
//! c:<length_bytes>           create the next file
//! e:<file_id>:<blocks>       extend
//! a:<file_id>:<byte_offset>  access
//! sh:<file_id>:<blocks>      shrink
//! ```
//!
//! File ids are not written for creates; the replaying harness assigns them
//! sequentially from 1, advancing only when a create succeeds.

use crate::core::FileId;
use crate::error::{AllocError, HarnessError, HarnessResult};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::Path;
use std::str::FromStr;

/// One trace line
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "lowercase")]
pub enum Operation {
    Create { length: u64 },
    Extend { file: FileId, blocks: usize },
    Access { file: FileId, offset: u64 },
    Shrink { file: FileId, blocks: usize },
}

fn parse_field<T: FromStr>(field: Option<&str>, name: &str) -> Result<T, String> {
    let field = field.ok_or_else(|| format!("missing {}", name))?;
    field
        .trim()
        .parse()
        .map_err(|_| format!("invalid {} '{}'", name, field.trim()))
}

impl FromStr for Operation {
    type Err = String;

    fn from_str(line: &str) -> Result<Self, Self::Err> {
        let mut fields = line.trim().split(':');
        let tag = fields.next().unwrap_or_default().trim();

        let op = match tag {
            "c" => Operation::Create {
                length: parse_field(fields.next(), "length")?,
            },
            "e" => Operation::Extend {
                file: parse_field(fields.next(), "file id")?,
                blocks: parse_field(fields.next(), "block count")?,
            },
            "a" => Operation::Access {
                file: parse_field(fields.next(), "file id")?,
                offset: parse_field(fields.next(), "byte offset")?,
            },
            "sh" => Operation::Shrink {
                file: parse_field(fields.next(), "file id")?,
                blocks: parse_field(fields.next(), "block count")?,
            },
            other => return Err(format!("unknown operation '{}'", other)),
        };

        if let Some(extra) = fields.next() {
            return Err(format!("unexpected field '{}'", extra));
        }
        Ok(op)
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Operation::Create { length } => write!(f, "c:{}", length),
            Operation::Extend { file, blocks } => write!(f, "e:{}:{}", file, blocks),
            Operation::Access { file, offset } => write!(f, "a:{}:{}", file, offset),
            Operation::Shrink { file, blocks } => write!(f, "sh:{}:{}", file, blocks),
        }
    }
}

/// A named sequence of operations
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Trace {
    pub name: String,
    operations: Vec<Operation>,
}

impl Trace {
    pub fn new(name: impl Into<String>, operations: Vec<Operation>) -> Self {
        Trace {
            name: name.into(),
            operations,
        }
    }

    /// Parse a trace, skipping blank lines
    pub fn from_reader<R: BufRead>(name: impl Into<String>, reader: R) -> HarnessResult<Self> {
        let mut operations = Vec::new();

        for (idx, line) in reader.lines().enumerate() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            let op = line.parse::<Operation>().map_err(|reason| HarnessError::Malformed {
                line: idx + 1,
                reason,
            })?;
            operations.push(op);
        }

        Ok(Trace::new(name, operations))
    }

    pub fn parse(name: impl Into<String>, text: &str) -> HarnessResult<Self> {
        Self::from_reader(name, text.as_bytes())
    }

    /// Read a trace file, naming it after the file
    pub fn open<P: AsRef<Path>>(path: P) -> HarnessResult<Self> {
        let path = path.as_ref();
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());
        let file = File::open(path)?;
        Self::from_reader(name, BufReader::new(file))
    }

    pub fn write_to<W: Write>(&self, mut writer: W) -> HarnessResult<()> {
        for op in &self.operations {
            writeln!(writer, "{}", op)?;
        }
        writer.flush()?;
        Ok(())
    }

    pub fn save<P: AsRef<Path>>(&self, path: P) -> HarnessResult<()> {
        self.write_to(BufWriter::new(File::create(path)?))
    }

    pub fn operations(&self) -> &[Operation] {
        &self.operations
    }

    pub fn len(&self) -> usize {
        self.operations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.operations.is_empty()
    }
}

/// Block size encoded in a trace file name like `input_1024_200_5_9_9.txt`
pub fn block_size_from_path<P: AsRef<Path>>(path: P) -> Option<u64> {
    let stem = path.as_ref().file_stem()?.to_str()?;
    stem.split('_').nth(1)?.parse().ok().filter(|&size| size > 0)
}

/// Shape of a synthetic workload
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkloadSpec {
    /// Create operations in the trace
    pub creates: usize,
    /// Extend, access and shrink operations in the trace
    pub operations: usize,
    /// Largest file length a create asks for
    pub max_length: u64,
    /// Largest block count an extend or shrink asks for
    pub max_blocks: usize,
    pub extend_weight: u32,
    pub access_weight: u32,
    pub shrink_weight: u32,
}

impl Default for WorkloadSpec {
    fn default() -> Self {
        WorkloadSpec {
            creates: 200,
            operations: 800,
            max_length: 4096,
            max_blocks: 8,
            extend_weight: 5,
            access_weight: 9,
            shrink_weight: 5,
        }
    }
}

/// Seeded generator of traces in the on-disk format
pub struct WorkloadGenerator {
    rng: StdRng,
}

impl WorkloadGenerator {
    pub fn new(seed: u64) -> Self {
        WorkloadGenerator {
            rng: StdRng::seed_from_u64(seed),
        }
    }

    /// Generate a trace
    ///
    /// Creates are spread through the trace; other operations target ids
    /// of creates issued so far, so some of them hit rejected creates.
    pub fn generate(&mut self, name: impl Into<String>, spec: &WorkloadSpec) -> HarnessResult<Trace> {
        let total_weight = spec.extend_weight + spec.access_weight + spec.shrink_weight;
        if spec.operations > 0 && total_weight == 0 {
            return Err(AllocError::InvalidArgument(
                "operation weights must not all be zero".to_string(),
            )
            .into());
        }
        if spec.max_length == 0 || spec.max_blocks == 0 {
            return Err(AllocError::InvalidArgument(
                "max length and max blocks must be at least 1".to_string(),
            )
            .into());
        }

        let steps = spec.creates + spec.operations;
        let mut ops = Vec::with_capacity(steps);
        let mut issued: FileId = 0;
        let mut remaining_ops = spec.operations;

        for step in 0..steps {
            let remaining_creates = spec.creates - issued as usize;
            let remaining_steps = steps - step;
            let create = issued == 0 && remaining_creates > 0
                || remaining_ops == 0
                || (remaining_creates > 0
                    && self
                        .rng
                        .gen_bool(remaining_creates as f64 / remaining_steps as f64));

            if create {
                issued += 1;
                ops.push(Operation::Create {
                    length: self.rng.gen_range(1..=spec.max_length),
                });
                continue;
            }

            // Only reached once at least one create was issued, or when
            // the trace has no creates at all
            let file = self.rng.gen_range(1..=issued.max(1));
            let roll = self.rng.gen_range(0..total_weight);
            let op = if roll < spec.extend_weight {
                Operation::Extend {
                    file,
                    blocks: self.rng.gen_range(1..=spec.max_blocks),
                }
            } else if roll < spec.extend_weight + spec.access_weight {
                Operation::Access {
                    file,
                    offset: self.rng.gen_range(1..=spec.max_length),
                }
            } else {
                Operation::Shrink {
                    file,
                    blocks: self.rng.gen_range(1..=spec.max_blocks),
                }
            };
            ops.push(op);
            remaining_ops -= 1;
        }

        Ok(Trace::new(name, ops))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_each_operation() {
        assert_eq!("c:120".parse::<Operation>(), Ok(Operation::Create { length: 120 }));
        assert_eq!(
            "e:3:4".parse::<Operation>(),
            Ok(Operation::Extend { file: 3, blocks: 4 })
        );
        assert_eq!(
            "a:2:4097".parse::<Operation>(),
            Ok(Operation::Access {
                file: 2,
                offset: 4097
            })
        );
        assert_eq!(
            " sh:7:1 \r".parse::<Operation>(),
            Ok(Operation::Shrink { file: 7, blocks: 1 })
        );
    }

    #[test]
    fn test_parse_errors() {
        assert!("x:1".parse::<Operation>().is_err());
        assert!("c".parse::<Operation>().is_err());
        assert!("c:-5".parse::<Operation>().is_err());
        assert!("e:1".parse::<Operation>().is_err());
        assert!("a:1:2:3".parse::<Operation>().is_err());
        assert!("sh:one:2".parse::<Operation>().is_err());
    }

    #[test]
    fn test_display_matches_format() {
        let text = "c:10\ne:1:2\na:1:5\nsh:1:1\n";
        let trace = Trace::parse("t", text).unwrap();
        let mut out = Vec::new();
        trace.write_to(&mut out).unwrap();
        assert_eq!(String::from_utf8(out).unwrap(), text);
    }

    #[test]
    fn test_from_reader_reports_line() {
        let err = Trace::parse("t", "c:10\n\nc:oops\n").unwrap_err();
        match err {
            HarnessError::Malformed { line, .. } => assert_eq!(line, 3),
            other => panic!("unexpected error: {}", other),
        }
    }

    #[test]
    fn test_open_and_save() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("input_8_3_1_1_0.txt");
        std::fs::write(&path, "c:16\ne:1:1\n\na:1:9\n").unwrap();

        let trace = Trace::open(&path).unwrap();
        assert_eq!(trace.name, "input_8_3_1_1_0.txt");
        assert_eq!(trace.len(), 3);

        let copy = dir.path().join("copy.txt");
        trace.save(&copy).unwrap();
        assert_eq!(Trace::open(&copy).unwrap().operations(), trace.operations());
    }

    #[test]
    fn test_block_size_from_path() {
        assert_eq!(block_size_from_path("io/input_1024_200_5_9_9.txt"), Some(1024));
        assert_eq!(block_size_from_path("input_8_600_5_5_0.txt"), Some(8));
        assert_eq!(block_size_from_path("trace.txt"), None);
        assert_eq!(block_size_from_path("input_0_1.txt"), None);
    }

    #[test]
    fn test_generator_is_deterministic() {
        let spec = WorkloadSpec::default();
        let a = WorkloadGenerator::new(7).generate("a", &spec).unwrap();
        let b = WorkloadGenerator::new(7).generate("b", &spec).unwrap();
        assert_eq!(a.operations(), b.operations());
        assert_eq!(a.len(), spec.creates + spec.operations);
    }

    #[test]
    fn test_generator_counts_and_ids() {
        let spec = WorkloadSpec {
            creates: 20,
            operations: 50,
            ..WorkloadSpec::default()
        };
        let trace = WorkloadGenerator::new(1).generate("g", &spec).unwrap();

        let mut created = 0u64;
        for op in trace.operations() {
            match *op {
                Operation::Create { length } => {
                    assert!(length >= 1 && length <= spec.max_length);
                    created += 1;
                }
                Operation::Extend { file, .. }
                | Operation::Access { file, .. }
                | Operation::Shrink { file, .. } => {
                    assert!(file >= 1 && file <= created);
                }
            }
        }
        assert_eq!(created, 20);
        assert!(matches!(trace.operations()[0], Operation::Create { .. }));
    }

    #[test]
    fn test_generator_rejects_zero_weights() {
        let spec = WorkloadSpec {
            extend_weight: 0,
            access_weight: 0,
            shrink_weight: 0,
            ..WorkloadSpec::default()
        };
        assert!(WorkloadGenerator::new(0).generate("g", &spec).is_err());
    }
}
