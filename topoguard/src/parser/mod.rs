pub mod netlist;
pub mod sexp;

// Re-export for convenience
pub use netlist::{extract_code_block, parse_voltage, ExtractError, Extraction, NetlistExtractor};
pub use sexp::{SExp, SExpError, SExpParser};
