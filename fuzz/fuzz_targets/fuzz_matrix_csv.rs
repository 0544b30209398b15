//! Fuzz target for wide matrix CSV parsing.
//!
//! Tests that `parse_matrix` handles arbitrary input without panicking.

#![no_main]

use bd_core::matrix::parse_matrix;
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    // Malformed headers, cells, and encodings must surface as errors
    let _ = parse_matrix(data);
});
