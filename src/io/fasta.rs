// Random-access reference source.
//
// When a faidx index (<file>.fai) is present the bio indexed reader is
// used and only the requested windows are pulled off disk. Without an
// index the contigs are loaded into memory up front, which is fine for
// the bacterial-scale references the tests use.

use std::collections::HashMap;
use std::fs::File;
use std::io::{BufReader, Read};
use std::path::{Path, PathBuf};

use bio::io::fasta;
use flate2::read::GzDecoder;

use crate::error::{Error, Result};

enum Source {
    Indexed(fasta::IndexedReader<File>),
    Memory {
        seqs: HashMap<String, Vec<u8>>,
        names: Vec<(String, u64)>,
    },
}

/// Reference reader with per-contig random access.
pub struct FastaSource {
    path: PathBuf,
    source: Source,
}

impl FastaSource {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<FastaSource> {
        let path = path.as_ref().to_path_buf();
        let fai = PathBuf::from(format!("{}.fai", path.display()));
        let source = if fai.exists() {
            log::debug!("using faidx index {}", fai.display());
            let reader = fasta::IndexedReader::from_file(&path)
                .map_err(|e| Error::InvalidInput(format!("{}: {}", path.display(), e)))?;
            Source::Indexed(reader)
        } else {
            log::debug!("no faidx index for {}, loading contigs", path.display());
            let file = File::open(&path)?;
            let reader: Box<dyn Read> = if path.extension().is_some_and(|e| e == "gz") {
                Box::new(GzDecoder::new(file))
            } else {
                Box::new(file)
            };
            let mut seqs = HashMap::new();
            let mut names = Vec::new();
            for record in fasta::Reader::new(BufReader::new(reader)).records() {
                let record =
                    record.map_err(|e| Error::InvalidInput(format!("{}: {}", path.display(), e)))?;
                names.push((record.id().to_string(), record.seq().len() as u64));
                seqs.insert(record.id().to_string(), record.seq().to_ascii_uppercase());
            }
            if names.is_empty() {
                return Err(Error::InvalidInput(format!(
                    "no sequences in {}",
                    path.display()
                )));
            }
            Source::Memory { seqs, names }
        };
        Ok(FastaSource { path, source })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Contig names with lengths, in file order.
    pub fn sequences(&self) -> Vec<(String, u64)> {
        match &self.source {
            Source::Indexed(reader) => reader
                .index
                .sequences()
                .iter()
                .map(|s| (s.name.clone(), s.len))
                .collect(),
            Source::Memory { names, .. } => names.clone(),
        }
    }

    pub fn contig_len(&self, name: &str) -> Option<u64> {
        self.sequences()
            .into_iter()
            .find(|(n, _)| n == name)
            .map(|(_, len)| len)
    }

    /// Fetch `[start, end)` (0-based, end exclusive) of a contig, uppercased.
    pub fn fetch(&mut self, name: &str, start: u64, end: u64) -> Result<Vec<u8>> {
        if end < start {
            return Err(Error::InvalidInput(format!(
                "bad window {}:{}-{}",
                name, start, end
            )));
        }
        match &mut self.source {
            Source::Indexed(reader) => {
                reader
                    .fetch(name, start, end)
                    .map_err(|e| Error::InvalidInput(format!("fetch {}: {}", name, e)))?;
                let mut seq = Vec::with_capacity((end - start) as usize);
                reader.read(&mut seq)?;
                seq.make_ascii_uppercase();
                Ok(seq)
            }
            Source::Memory { seqs, .. } => {
                let contig = seqs
                    .get(name)
                    .ok_or_else(|| Error::InvalidInput(format!("unknown contig \"{}\"", name)))?;
                let start = start as usize;
                let end = (end as usize).min(contig.len());
                if start > end {
                    return Err(Error::InvalidInput(format!(
                        "window {}:{} past end of contig {}",
                        start, end, name
                    )));
                }
                Ok(contig[start..end].to_vec())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn memory_fallback_fetch() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ref.fa");
        let mut f = File::create(&path).unwrap();
        writeln!(f, ">x\nACGTacgtAC\n>y\nTTTT").unwrap();
        drop(f);

        let mut src = FastaSource::open(&path).unwrap();
        assert_eq!(
            src.sequences(),
            vec![("x".to_string(), 10), ("y".to_string(), 4)]
        );
        assert_eq!(src.fetch("x", 2, 6).unwrap(), b"GTAC".to_vec());
        assert_eq!(src.fetch("x", 4, 8).unwrap(), b"ACGT".to_vec());
        assert_eq!(src.fetch("y", 0, 4).unwrap(), b"TTTT".to_vec());
        assert!(src.fetch("z", 0, 1).is_err());
    }
}
