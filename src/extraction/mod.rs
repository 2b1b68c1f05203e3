//! Region text extraction and transcript assembly.

pub mod assembler;
pub mod extractor;
pub mod formula;
pub mod reader;

pub use assembler::{DocumentTranscript, PageTranscript, assemble_document, assemble_page};
pub use extractor::{
    ExtractionError, ExtractionMethod, FORMULA_FALLBACK_MARKER, RegionExtractor, RegionText,
    TABLE_MARKER, UNKNOWN_BLOCK_MARKER, UNREADABLE_MARKER, crop_region,
};
pub use formula::{
    FormulaProviderError, FormulaRecognizer, HttpFormulaRecognizer, UnconfiguredFormulaRecognizer,
};
pub use reader::{DocumentReader, PageError};
