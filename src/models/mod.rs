//! Data model for the extraction pipeline.

mod outcome;
mod transaction;

pub use outcome::{ExtractionMethod, ExtractionOutcome};
pub use transaction::{
    BoundingBox, NormalizedTransaction, RawTransaction, SignedType, SourceLocation,
};
