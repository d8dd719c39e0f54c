//! Output filtering: think-tag stripping, reasoning split, loop detection.

use gg_stream::engine::{
    Assembled, FilterConfig, HintReasoningClassifier, ReasoningClassifier, ReasoningSplit,
    ReasoningSplitter, TextAssembler, ThinkTagStripper,
};

fn feed(assembler: &mut TextAssembler, pieces: &[&[u8]]) -> String {
    let mut out = String::new();
    for piece in pieces {
        if let Assembled::Emit(text) = assembler.assemble(piece) {
            out.push_str(&text);
        }
    }
    out.push_str(&assembler.finish());
    out
}

#[test]
fn filter_strips_tags_split_mid_name() {
    let mut stripper = ThinkTagStripper::new().unwrap();
    let mut out = String::new();
    for piece in ["before <thi", "nk>hidden</th", "ink> after"] {
        out.push_str(&stripper.push(piece));
    }
    out.push_str(&stripper.finish());
    assert_eq!(out, "before  after");
}

#[test]
fn filter_strips_multiple_spans() {
    let mut stripper = ThinkTagStripper::new().unwrap();
    let out = stripper.push("a<think>1</think>b<THINK>2</Think>c");
    assert_eq!(out, "abc");
    assert!(!stripper.in_think());
}

#[test]
fn filter_assembler_strips_across_utf8_boundaries() {
    let config = FilterConfig { strip_think: true, ..Default::default() };
    let mut assembler = TextAssembler::new(&config).unwrap();
    let out = feed(
        &mut assembler,
        &[b"<think>caf", &[0xC3], &[0xA9], b"</think>na", &[0xC3], &[0xAF], b"ve"],
    );
    assert_eq!(out, "na\u{EF}ve");
}

#[test]
fn filter_assembler_passes_tags_when_disabled() {
    let mut assembler = TextAssembler::new(&FilterConfig::default()).unwrap();
    let out = feed(&mut assembler, &[b"<think>", b"x", b"</think>"]);
    assert_eq!(out, "<think>x</think>");
}

#[test]
fn filter_custom_loop_markers() {
    let config = FilterConfig {
        loop_markers: vec!["again and again".into()],
        ..Default::default()
    };
    let mut assembler = TextAssembler::new(&config).unwrap();
    assert_eq!(assembler.assemble(b"again and "), Assembled::Emit("again and ".into()));
    assert_eq!(assembler.assemble(b"again"), Assembled::Discard);
    assert_eq!(assembler.assemble(b"more"), Assembled::Discard);
    assert!(assembler.is_discarded());
}

#[test]
fn filter_split_reasoning_and_answer() {
    let splitter = ReasoningSplitter::new().unwrap();
    assert_eq!(
        splitter.split("<think> weigh options </think>\nPick B."),
        ReasoningSplit { reasoning: "weigh options".into(), answer: "Pick B.".into() }
    );
    assert_eq!(
        splitter.split("Two plus two. The answer is: 4"),
        ReasoningSplit { reasoning: "Two plus two.".into(), answer: "4".into() }
    );
    assert_eq!(splitter.split("Just text").answer, "Just text");
}

#[test]
fn filter_reasoning_classifier() {
    let classifier = HintReasoningClassifier::new().unwrap();
    assert!(classifier.looks_like_reasoning("Let me think about this"));
    assert!(classifier.looks_like_reasoning("<think>"));
    assert!(!classifier.looks_like_reasoning("Paris is the capital of France."));
}

#[test]
fn filter_config_from_json() {
    let config: FilterConfig =
        serde_json::from_str(r#"{"strip_think":true,"loop_window_chars":40}"#).unwrap();
    assert!(config.strip_think);
    assert_eq!(config.loop_window_chars, 40);
    assert!(!config.loop_markers.is_empty());
}
