//! Fuzz target for incremental text assembly.
//!
//! Arbitrary byte pieces must never panic the assembler, and with tag
//! stripping off the emitted text must equal a lossy decode of the input.

#![no_main]

use arbitrary::Arbitrary;
use gg_stream::engine::{Assembled, FilterConfig, TextAssembler};
use libfuzzer_sys::fuzz_target;

#[derive(Debug, Arbitrary)]
struct Input {
    strip_think: bool,
    pieces: Vec<Vec<u8>>,
}

fuzz_target!(|input: Input| {
    let config = FilterConfig {
        strip_think: input.strip_think,
        loop_markers: vec!["\u{0}\u{0}\u{0}\u{0}".into()],
        ..Default::default()
    };
    let Ok(mut assembler) = TextAssembler::new(&config) else {
        return;
    };

    let mut out = String::new();
    let mut discarded = false;
    for piece in &input.pieces {
        match assembler.assemble(piece) {
            Assembled::Emit(text) => out.push_str(&text),
            Assembled::Hold => {}
            Assembled::Discard => {
                discarded = true;
                break;
            }
        }
    }
    out.push_str(&assembler.finish());

    if !input.strip_think && !discarded {
        let joined: Vec<u8> = input.pieces.concat();
        let lossy = String::from_utf8_lossy(&joined);
        assert!(lossy.starts_with(&out), "assembled text diverged from input");
    }
});
