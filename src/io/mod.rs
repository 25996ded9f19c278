//! Readers and writers for the collaborator formats: indexed FASTA,
//! VCF variant catalogs, and SAM-like read/alignment records.

pub mod fasta;
pub mod sam;
pub mod vcf;
