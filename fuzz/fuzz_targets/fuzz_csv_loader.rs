//! Fuzz target for CSV loading and presence labelling.
//!
//! Arbitrary bytes must produce either observations or an error, and any
//! series that validates must hold only finite, non-negative values.

#![no_main]

use libfuzzer_sys::fuzz_target;
use zi_core::data::{build_series, load_csv_reader, DataColumns};

fuzz_target!(|data: &[u8]| {
    let Ok(observations) = load_csv_reader(data, &DataColumns::default()) else {
        return;
    };
    if let Ok(series) = build_series(observations) {
        for obs in series.rows() {
            assert!(obs.value.is_finite() && obs.value >= 0.0);
        }
        assert!(series.present_only().rows().iter().all(|o| o.value > 0.0));
    }
});
