//! The barcode catalogue, matcher, and sample resolver.

pub mod catalogue;
pub mod matcher;
pub mod resolver;

pub use catalogue::BarcodeCatalogue;
pub use matcher::{BarcodeMatch, match_barcode};
pub use resolver::{SampleMatch, UNASSIGNED, resolve_sample};
