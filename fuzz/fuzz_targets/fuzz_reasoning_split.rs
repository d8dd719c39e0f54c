//! Fuzz target for reasoning/answer splitting.

#![no_main]

use gg_stream::engine::ReasoningSplitter;
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &str| {
    let Ok(splitter) = ReasoningSplitter::new() else {
        return;
    };
    let split = splitter.split(data);
    assert!(split.reasoning.len() + split.answer.len() <= data.len());
});
