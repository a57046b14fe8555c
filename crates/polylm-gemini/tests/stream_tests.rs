//! Scripted-stream tests for the Gemini dialect driver.

use std::sync::{Arc, Mutex};

use bytes::Bytes;
use tokio_util::sync::CancellationToken;

use polylm_core::sink::NullRenderSink;
use polylm_core::{
    ByteStream, ContentPart, MessageSink, ParseOutcome, StreamDriver, Turn, TurnAssembler,
};
use polylm_gemini::{GeminiDriver, dialect_config};

#[derive(Default)]
struct MemSink {
    stored: Mutex<Vec<Turn>>,
}

impl MessageSink for MemSink {
    fn store_turn(&self, _session: &str, turn: &Turn) -> usize {
        let mut stored = self.stored.lock().unwrap();
        stored.push(turn.clone());
        stored.len() - 1
    }
}

fn assembler(sink: &Arc<MemSink>) -> TurnAssembler {
    TurnAssembler::new(
        "s1",
        Arc::new(NullRenderSink),
        Arc::clone(sink) as Arc<dyn MessageSink>,
        dialect_config(),
    )
}

fn stream_of(lines: Vec<String>) -> ByteStream {
    Box::pin(futures::stream::iter(lines.into_iter().map(|l| {
        Ok(Bytes::from(format!("data: {l}\n\n").into_bytes()))
    })))
}

async fn drive(lines: Vec<String>, asm: &mut TurnAssembler) -> ParseOutcome {
    GeminiDriver
        .drive(stream_of(lines), asm, CancellationToken::new())
        .await
        .unwrap()
}

fn text_chunk(text: &str) -> String {
    format!(
        r#"{{"candidates":[{{"content":{{"parts":[{{"text":{}}}],"role":"model"}}}}]}}"#,
        serde_json::to_string(text).unwrap()
    )
}

#[tokio::test]
async fn text_parts_assemble_in_order() {
    let sink = Arc::new(MemSink::default());
    let mut asm = assembler(&sink);
    let outcome = drive(
        vec![text_chunk("The capital "), text_chunk("is Oslo.")],
        &mut asm,
    )
    .await;
    assert!(matches!(outcome, ParseOutcome::Completed(f) if !f.errored));
    let stored = sink.stored.lock().unwrap();
    assert_eq!(stored[0].display_text, "The capital is Oslo.");
}

#[tokio::test]
async fn thought_parts_route_to_thinking() {
    let sink = Arc::new(MemSink::default());
    let mut asm = assembler(&sink);
    let lines = vec![
        r#"{"candidates":[{"content":{"parts":[{"text":"pondering","thought":true}]}}]}"#.to_string(),
        text_chunk("the answer"),
    ];
    let _ = drive(lines, &mut asm).await;
    let stored = sink.stored.lock().unwrap();
    assert_eq!(stored[0].thinking_text, "pondering");
    assert_eq!(stored[0].display_text, "the answer");
}

#[tokio::test]
async fn thought_signature_most_recent_wins() {
    let sink = Arc::new(MemSink::default());
    let mut asm = assembler(&sink);
    let lines = vec![
        r#"{"candidates":[{"content":{"parts":[{"text":"a","thought":true,"thoughtSignature":"first"}]}}]}"#.to_string(),
        r#"{"candidates":[{"content":{"parts":[{"text":"b","thought":true,"thoughtSignature":"second"}]}}]}"#.to_string(),
    ];
    let _ = drive(lines, &mut asm).await;
    let stored = sink.stored.lock().unwrap();
    assert_eq!(stored[0].signature.as_ref().unwrap().data, "second");
}

#[tokio::test]
async fn whole_function_calls_suspend_with_empty_ids() {
    let sink = Arc::new(MemSink::default());
    let mut asm = assembler(&sink);
    let lines = vec![
        r#"{"candidates":[{"content":{"parts":[{"functionCall":{"name":"search","args":{"q":"rust"}}}]}}]}"#.to_string(),
        r#"{"candidates":[{"content":{"parts":[{"functionCall":{"name":"fetch","args":{"url":"x"}}}]}}]}"#.to_string(),
    ];
    let outcome = drive(lines, &mut asm).await;
    let ParseOutcome::AwaitingTools(calls) = outcome else {
        panic!("expected tool suspension");
    };
    assert_eq!(calls.len(), 2);
    assert_eq!(calls[0].name, "search");
    assert_eq!(calls[1].name, "fetch");
    assert!(calls.iter().all(|c| c.id.is_empty()), "IDs are minted by the engine");
}

#[tokio::test]
async fn function_call_without_args_defaults_to_object() {
    let sink = Arc::new(MemSink::default());
    let mut asm = assembler(&sink);
    let lines =
        vec![r#"{"candidates":[{"content":{"parts":[{"functionCall":{"name":"ping"}}]}}]}"#.to_string()];
    let ParseOutcome::AwaitingTools(calls) = drive(lines, &mut asm).await else {
        panic!("expected tool suspension");
    };
    assert_eq!(calls[0].arguments, serde_json::json!({}));
}

#[tokio::test]
async fn inline_data_becomes_image_part() {
    let sink = Arc::new(MemSink::default());
    let mut asm = assembler(&sink);
    let lines = vec![
        text_chunk("here: "),
        r#"{"candidates":[{"content":{"parts":[{"inlineData":{"mimeType":"image/jpeg","data":"Zm9v"}}]}}]}"#.to_string(),
    ];
    let _ = drive(lines, &mut asm).await;
    let stored = sink.stored.lock().unwrap();
    let uri = stored[0]
        .parts
        .iter()
        .find_map(|p| match p {
            ContentPart::Image { uri, .. } => Some(uri.clone()),
            _ => None,
        })
        .unwrap();
    assert_eq!(uri, "data:image/jpeg;base64,Zm9v");
}

#[tokio::test]
async fn in_band_error_uses_status_for_classification() {
    let sink = Arc::new(MemSink::default());
    let mut asm = assembler(&sink);
    let lines = vec![
        text_chunk("partial"),
        r#"{"error":{"code":429,"message":"quota exhausted","status":"RESOURCE_EXHAUSTED"}}"#.to_string(),
    ];
    let outcome = drive(lines, &mut asm).await;
    assert!(matches!(outcome, ParseOutcome::Completed(f) if f.errored));
    let stored = sink.stored.lock().unwrap();
    assert!(stored[0].is_error);
    assert!(stored[0].display_text.starts_with("partial"));
    assert!(stored[0].display_text.contains("rate-limiting"));
}

#[tokio::test]
async fn mixed_text_and_call_keeps_text() {
    let sink = Arc::new(MemSink::default());
    let mut asm = assembler(&sink);
    let lines = vec![
        r#"{"candidates":[{"content":{"parts":[{"text":"Let me look that up."},{"functionCall":{"name":"search","args":{}}}]}}]}"#.to_string(),
    ];
    let ParseOutcome::AwaitingTools(_) = drive(lines, &mut asm).await else {
        panic!("expected tool suspension");
    };
    assert_eq!(asm.turn().display_text, "Let me look that up.");
}
