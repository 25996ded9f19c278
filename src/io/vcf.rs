// Variant catalog reader.
//
// Wraps the noodles lazy VCF reader into the flat records the graph
// builder consumes: position, reference allele, alternates, per-alt
// frequencies, and per-haplotype genotype indices. Gzipped input goes
// through the bgzf reader.
//
// Genotype values are recovered from the field's debug rendering rather
// than the typed accessors; the typed genotype API changes shape between
// format versions while the rendered value is stable.

use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};

use noodles_bgzf as bgzf;
use noodles_vcf::{
    self as vcf,
    variant::record::samples::keys::key::GENOTYPE as GT_KEY,
    variant::record::samples::Sample,
    variant::record::AlternateBases,
};

use crate::error::{Error, Result};

/// One flattened variant record.
#[derive(Clone, Debug, PartialEq)]
pub struct VariantRecord {
    /// 1-based position of the first reference-allele base.
    pub pos: u64,
    pub ref_allele: String,
    /// Alternate allele tokens, possibly symbolic (`<CN0>`, `<DUP>`, ...).
    pub alts: Vec<String>,
    /// Allele frequency per alternate, parallel to `alts`.
    pub af: Vec<f32>,
    /// Allele index per haplotype (two per retained sample), 0 = reference.
    pub genotypes: Vec<u8>,
}

/// Streaming reader over one VCF file, with an optional sample subset.
pub struct VariantSource {
    reader: vcf::io::Reader<Box<dyn BufRead>>,
    header: vcf::Header,
    path: PathBuf,
    /// All sample names, in file order.
    samples: Vec<String>,
    /// Column indices of the retained samples.
    keep: Vec<usize>,
}

impl VariantSource {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<VariantSource> {
        let path = path.as_ref().to_path_buf();
        let file = File::open(&path)?;
        let inner: Box<dyn BufRead> = if path.extension().is_some_and(|e| e == "gz" || e == "bgz") {
            Box::new(BufReader::new(bgzf::Reader::new(file)))
        } else {
            Box::new(BufReader::new(file))
        };
        let mut reader = vcf::io::Reader::new(inner);
        let header = reader
            .read_header()
            .map_err(|e| Error::InvalidInput(format!("{}: {}", path.display(), e)))?;
        let samples: Vec<String> = header.sample_names().iter().cloned().collect();
        let keep = (0..samples.len()).collect();
        Ok(VariantSource {
            reader,
            header,
            path,
            samples,
            keep,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Retained sample names, in file order.
    pub fn samples(&self) -> Vec<String> {
        self.keep.iter().map(|&i| self.samples[i].clone()).collect()
    }

    /// Two haplotypes per retained sample.
    pub fn num_haplotypes(&self) -> usize {
        2 * self.keep.len()
    }

    /// Restrict to the named samples. Unknown names are an error.
    pub fn set_sample_filter(&mut self, names: &[String]) -> Result<()> {
        if names.is_empty() {
            return Ok(());
        }
        let mut keep = Vec::new();
        for name in names {
            match self.samples.iter().position(|s| s == name) {
                Some(i) => keep.push(i),
                None => {
                    return Err(Error::InvalidInput(format!(
                        "sample \"{}\" not present in {}",
                        name,
                        self.path.display()
                    )))
                }
            }
        }
        keep.sort_unstable();
        keep.dedup();
        self.keep = keep;
        Ok(())
    }

    /// Collect the records of `contig` whose position falls in `[lo, hi]`
    /// (1-based, inclusive; `hi == 0` means the whole contig). At most
    /// `limit` records are returned when `limit > 0`.
    pub fn fetch(
        &mut self,
        contig: &str,
        lo: u64,
        hi: u64,
        limit: usize,
    ) -> Result<Vec<VariantRecord>> {
        let mut out = Vec::new();
        let path = self.path.clone();
        for result in self.reader.records() {
            let record =
                result.map_err(|e| Error::InvalidInput(format!("{}: {}", path.display(), e)))?;
            if record.reference_sequence_name() != contig {
                continue;
            }
            let pos = match record.variant_start() {
                Some(Ok(p)) => p.get() as u64,
                _ => continue,
            };
            if pos < lo.max(1) || (hi > 0 && pos > hi) {
                continue;
            }
            out.push(flatten(
                &record,
                &self.header,
                self.samples.len(),
                &self.keep,
                pos,
            )?);
            if limit > 0 && out.len() >= limit {
                break;
            }
        }
        Ok(out)
    }
}

fn flatten(
    record: &vcf::Record,
    header: &vcf::Header,
    num_samples: usize,
    keep: &[usize],
    pos: u64,
) -> Result<VariantRecord> {
    let ref_allele = record.reference_bases().to_string().to_ascii_uppercase();

    let mut alts = Vec::new();
    for alt in record.alternate_bases().iter() {
        let alt = alt.map_err(|e| Error::InvalidInput(format!("bad ALT at pos {}: {}", pos, e)))?;
        alts.push(alt.to_string().to_ascii_uppercase());
    }

    let genotypes = extract_genotypes(record, header, num_samples, keep, alts.len());
    let af = extract_frequencies(record, header, &alts, &genotypes);

    Ok(VariantRecord {
        pos,
        ref_allele,
        alts,
        af,
        genotypes,
    })
}

/// Allele index per haplotype of the retained samples. Missing calls
/// count as reference.
fn extract_genotypes(
    record: &vcf::Record,
    header: &vcf::Header,
    num_samples: usize,
    keep: &[usize],
    num_alts: usize,
) -> Vec<u8> {
    let samples = record.samples();
    let mut by_column: Vec<Option<(u8, u8)>> = vec![None; num_samples];
    for (col, sample) in samples.iter().enumerate().take(num_samples) {
        let value = match sample.get(header, GT_KEY) {
            Some(Ok(Some(v))) => format!("{:?}", v),
            _ => continue,
        };
        by_column[col] = parse_genotype(&value, num_alts);
    }
    let mut out = Vec::with_capacity(2 * keep.len());
    for &col in keep {
        let (a, b) = by_column[col].unwrap_or((0, 0));
        out.push(a);
        out.push(b);
    }
    out
}

/// Per-alt allele frequency: the `AF` INFO values when present, otherwise
/// derived from the genotype counts.
fn extract_frequencies(
    record: &vcf::Record,
    header: &vcf::Header,
    alts: &[String],
    genotypes: &[u8],
) -> Vec<f32> {
    let info = record.info();
    if let Some(Ok(Some(value))) = info.get(header, "AF") {
        let vals = parse_floats(&format!("{:?}", value));
        if vals.len() == alts.len() {
            return vals;
        }
    }
    if !genotypes.is_empty() {
        let total = genotypes.len() as f32;
        return (1..=alts.len())
            .map(|a| genotypes.iter().filter(|&&g| g as usize == a).count() as f32 / total)
            .collect();
    }
    vec![0.0; alts.len()]
}

/// Parse a genotype out of a rendered field value such as
/// `Genotype(Genotype("0|1"))`. Returns the two haplotype allele indices;
/// indices past the ALT count and missing calls collapse to reference.
fn parse_genotype(rendered: &str, num_alts: usize) -> Option<(u8, u8)> {
    let inner = extract_quoted(rendered)?;
    let mut alleles = inner
        .split(|c| c == '|' || c == '/')
        .map(|tok| match tok.trim().parse::<usize>() {
            Ok(a) if a <= num_alts => a as u8,
            _ => 0,
        });
    let a = alleles.next()?;
    let b = alleles.next().unwrap_or(a);
    Some((a, b))
}

/// Innermost double-quoted substring of a debug rendering, or the raw
/// string when it carries no quotes.
fn extract_quoted(s: &str) -> Option<&str> {
    match (s.rfind('"'), s.find('"')) {
        (Some(last), Some(first)) if first < last => {
            let inner = &s[..last];
            inner.rfind('"').map(|start| &inner[start + 1..])
        }
        _ => Some(s),
    }
}

/// Every parseable float in a rendered value, in order.
fn parse_floats(s: &str) -> Vec<f32> {
    s.split(|c: char| {
        !(c.is_ascii_digit() || c == '.' || c == '-' || c == '+' || c == 'e' || c == 'E')
    })
    .filter(|tok| tok.chars().any(|c| c.is_ascii_digit()))
    .filter_map(|tok| tok.parse::<f32>().ok())
    .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const VCF_BODY: &str = "\
##fileformat=VCFv4.1
##contig=<ID=x>
##contig=<ID=y>
##INFO=<ID=AF,Number=A,Type=Float,Description=\"Allele Frequency\">
##FORMAT=<ID=GT,Number=1,Type=String,Description=\"Genotype\">
#CHROM\tPOS\tID\tREF\tALT\tQUAL\tFILTER\tINFO\tFORMAT\ts1\ts2
x\t9\t.\tG\tA,T\t99\t.\tAF=0.6,0.1\tGT\t0|1\t2|0
x\t14\t.\tC\t<CN2>\t99\t.\tAF=0.01\tGT\t1|0\t0|0
y\t4\t.\tT\tG\t99\t.\t.\tGT\t1|1\t0|.
";

    fn write_vcf() -> (tempfile::TempDir, std::path::PathBuf) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("vars.vcf");
        let mut f = File::create(&path).unwrap();
        f.write_all(VCF_BODY.as_bytes()).unwrap();
        (dir, path)
    }

    #[test]
    fn reads_samples_and_records() {
        let (_dir, path) = write_vcf();
        let mut src = VariantSource::open(&path).unwrap();
        assert_eq!(src.samples(), vec!["s1".to_string(), "s2".to_string()]);
        assert_eq!(src.num_haplotypes(), 4);

        let recs = src.fetch("x", 1, 0, 0).unwrap();
        assert_eq!(recs.len(), 2);
        assert_eq!(recs[0].pos, 9);
        assert_eq!(recs[0].ref_allele, "G");
        assert_eq!(recs[0].alts, vec!["A".to_string(), "T".to_string()]);
        assert_eq!(recs[0].af, vec![0.6, 0.1]);
        assert_eq!(recs[0].genotypes, vec![0, 1, 2, 0]);
        assert_eq!(recs[1].alts, vec!["<CN2>".to_string()]);
    }

    #[test]
    fn region_and_limit() {
        let (_dir, path) = write_vcf();
        let mut src = VariantSource::open(&path).unwrap();
        let recs = src.fetch("x", 10, 20, 0).unwrap();
        assert_eq!(recs.len(), 1);
        assert_eq!(recs[0].pos, 14);

        let mut src = VariantSource::open(&path).unwrap();
        let recs = src.fetch("x", 1, 0, 1).unwrap();
        assert_eq!(recs.len(), 1);
    }

    #[test]
    fn sample_filter_and_derived_af() {
        let (_dir, path) = write_vcf();
        let mut src = VariantSource::open(&path).unwrap();
        src.set_sample_filter(&["s2".to_string()]).unwrap();
        assert_eq!(src.num_haplotypes(), 2);
        let recs = src.fetch("y", 1, 0, 0).unwrap();
        // No AF in INFO: derived from genotype counts over kept haplotypes.
        // s2 is "0|." so both haplotypes collapse to reference.
        assert_eq!(recs[0].genotypes, vec![0, 0]);
        assert_eq!(recs[0].af, vec![0.0]);

        let mut src = VariantSource::open(&path).unwrap();
        assert!(src.set_sample_filter(&["nope".to_string()]).is_err());
    }

    #[test]
    fn genotype_rendering_parse() {
        assert_eq!(parse_genotype("Genotype(Genotype(\"0|1\"))", 2), Some((0, 1)));
        assert_eq!(parse_genotype("String(\"1/1\")", 1), Some((1, 1)));
        assert_eq!(parse_genotype("\".|.\"", 2), Some((0, 0)));
        assert_eq!(parse_genotype("2|3", 3), Some((2, 3)));
        // Allele index beyond the ALT count collapses to reference.
        assert_eq!(parse_genotype("0|9", 2), Some((0, 0)));
    }

    #[test]
    fn float_rendering_parse() {
        assert_eq!(
            parse_floats("Array(Float([Some(0.6), Some(0.1)]))"),
            vec![0.6, 0.1]
        );
        assert_eq!(parse_floats("Float(0.25)"), vec![0.25]);
        assert!(parse_floats("Value(None)").is_empty());
    }
}
