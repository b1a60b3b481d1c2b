//! Fuzz target for model formula parsing.
//!
//! A formula that parses must print back to text that parses to the same
//! terms.

#![no_main]

use libfuzzer_sys::fuzz_target;
use zi_core::engine::ModelFormula;

fuzz_target!(|data: &[u8]| {
    let Ok(text) = std::str::from_utf8(data) else {
        return;
    };
    if let Ok(formula) = ModelFormula::parse(text) {
        let printed = formula.to_string();
        let reparsed = ModelFormula::parse(&printed).expect("printed formula should parse");
        assert_eq!(formula, reparsed);
    }
});
