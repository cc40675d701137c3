//! JSON parser: banner cleaning, format detection, single-object and stream decoding.

use gemini_cli_sdk::error::GeminiError;
use gemini_cli_sdk::parsers::json::JsonParser;
use gemini_cli_sdk::parsers::OutputParser;
use gemini_cli_sdk::types::{Message, ResultMessage};

fn parse(stdout: &str) -> Vec<Message> {
    JsonParser.parse_output(stdout).unwrap()
}

fn result_of(messages: &[Message]) -> &ResultMessage {
    messages
        .iter()
        .find_map(Message::as_result)
        .expect("no result message")
}

// ---------------------------------------------------------------------------
// Single-JSON mode
// ---------------------------------------------------------------------------

#[test]
fn single_json_example_payload() {
    let stdout = r#"{"response":"Hello!","stats":{"models":{"m1":{"api":{"totalLatencyMs":120},"tokens":{"total":42}}},"tools":{"totalCalls":0}}}"#;
    let messages = parse(stdout);

    assert_eq!(messages.len(), 2);
    let Message::Assistant(reply) = &messages[0] else {
        panic!("expected assistant message, got {:?}", messages[0]);
    };
    assert_eq!(reply.text_content(), "Hello!");

    let result = result_of(&messages);
    assert_eq!(result.subtype, "success");
    assert!(!result.is_error);
    assert_eq!(result.duration_ms, 120);
    assert_eq!(result.num_turns, 1);
    assert_eq!(result.result.as_deref(), Some("Hello!"));
    assert_eq!(result.total_cost_usd, None);
    assert!(result.session_id.starts_with("gemini-"));

    let usage = result.usage.as_ref().unwrap();
    assert_eq!(usage["total_tokens"], 42);
    assert_eq!(usage["tool_calls"], 0);
    assert_eq!(usage["models"]["m1"]["tokens"]["total"], 42);
}

#[test]
fn single_json_sums_stats_across_models() {
    let stdout = r#"{
  "response": "ok",
  "stats": {
    "models": {
      "gemini-2.5-pro": {"api": {"totalLatencyMs": 1500}, "tokens": {"total": 900}},
      "gemini-2.5-flash": {"api": {"totalLatencyMs": 250}, "tokens": {"total": 100}}
    },
    "tools": {"totalCalls": 3}
  }
}"#;
    let messages = parse(stdout);
    let result = result_of(&messages);

    assert_eq!(result.duration_ms, 1750);
    let usage = result.usage.as_ref().unwrap();
    assert_eq!(usage["total_tokens"], 1000);
    assert_eq!(usage["tool_calls"], 3);
}

#[test]
fn single_json_strips_banner_lines() {
    let stdout = "YOLO mode is enabled. All tool calls will be automatically approved.\n\
                  Loaded cached credentials.\n\
                  {\n  \"response\": \"Banner-proof\",\n  \"stats\": {}\n}\n";
    let messages = parse(stdout);

    assert_eq!(messages.len(), 2);
    assert!(matches!(&messages[0], Message::Assistant(a) if a.text_content() == "Banner-proof"));
}

#[test]
fn single_json_empty_response_yields_only_result() {
    let messages = parse(r#"{"response": "", "stats": {}}"#);

    assert_eq!(messages.len(), 1);
    let result = result_of(&messages);
    assert_eq!(result.result, None);
    assert_eq!(result.duration_ms, 0);
}

#[test]
fn single_json_result_preview_is_first_100_chars() {
    let long = "é".repeat(250);
    let messages = parse(&format!(r#"{{"response": "{long}"}}"#));
    let result = result_of(&messages);

    assert_eq!(result.result.as_ref().unwrap().chars().count(), 100);
    assert!(matches!(&messages[0], Message::Assistant(a) if a.text_content() == long));
}

#[test]
fn single_json_missing_stats_default_to_zero() {
    let messages = parse(r#"{"response": "hi", "stats": {"models": {"m": {}}}}"#);
    let result = result_of(&messages);

    assert_eq!(result.duration_ms, 0);
    assert_eq!(result.usage.as_ref().unwrap()["total_tokens"], 0);
}

#[test]
fn single_json_decode_failure_is_fatal() {
    let stdout = "Loaded cached credentials.\n{\"response\": \"unterminated";
    let err = JsonParser.parse_output(stdout).unwrap_err();

    assert!(matches!(err, GeminiError::Parsing { .. }));
    assert_eq!(err.raw_output(), Some(stdout));
}

#[test]
fn single_json_huge_latency_saturates_instead_of_overflowing() {
    let stdout = r#"{"response":"ok","stats":{"models":{"a":{"api":{"totalLatencyMs":1e30},"tokens":{"total":1e30}},"b":{"api":{"totalLatencyMs":5},"tokens":{"total":7}}}}}"#;
    let result = parse(stdout).into_iter().find_map(|m| match m {
        Message::Result(r) => Some(r),
        _ => None,
    });
    let result = result.unwrap();

    assert_eq!(result.duration_ms, u64::MAX);
    assert_eq!(result.usage.as_ref().unwrap()["total_tokens"], u64::MAX);
}

// ---------------------------------------------------------------------------
// Empty and non-JSON output
// ---------------------------------------------------------------------------

#[test]
fn empty_and_whitespace_output_yield_nothing() {
    assert!(parse("").is_empty());
    assert!(parse("   \n\t\n  ").is_empty());
}

#[test]
fn output_without_json_lines_yields_nothing() {
    assert!(parse("YOLO mode is enabled.\nsomething went sideways\n").is_empty());
}

#[test]
fn top_level_array_yields_nothing() {
    // Arrays are kept by cleaning but no stream line starts with `{`.
    assert!(parse("[1, 2, 3]").is_empty());
}

// ---------------------------------------------------------------------------
// Stream-JSON mode
// ---------------------------------------------------------------------------

const INIT: &str =
    r#"{"type":"init","session_id":"sess-1","model":"gemini-2.5-pro","timestamp":"2026-01-01T00:00:00Z"}"#;
const USER: &str = r#"{"type":"message","role":"user","content":"What is 2+2?"}"#;
const ASSISTANT: &str = r#"{"type":"message","role":"assistant","content":"4","delta":true}"#;
const RESULT: &str = r#"{"type":"result","status":"success","stats":{"duration_ms":830,"total_tokens":55,"input_tokens":40,"output_tokens":15,"tool_calls":1}}"#;

fn lines(events: &[&str]) -> String {
    events.join("\n")
}

#[test]
fn stream_round_trip_preserves_order_and_fields() {
    let messages = parse(&lines(&[INIT, USER, ASSISTANT, RESULT]));
    assert_eq!(messages.len(), 4);

    let Message::System(init) = &messages[0] else {
        panic!("expected system message");
    };
    assert_eq!(init.subtype, "init");
    assert_eq!(init.data["session_id"], "sess-1");
    assert_eq!(init.data["model"], "gemini-2.5-pro");
    assert_eq!(init.data["timestamp"], "2026-01-01T00:00:00Z");

    assert!(matches!(&messages[1], Message::User(u) if u.content == "What is 2+2?"));
    assert!(matches!(&messages[2], Message::Assistant(a) if a.text_content() == "4"));

    let result = result_of(&messages);
    assert_eq!(result.subtype, "success");
    assert!(!result.is_error);
    assert_eq!(result.duration_ms, 830);
    assert_eq!(result.session_id, "sess-1");
    assert_eq!(result.num_turns, 1);
    assert_eq!(result.total_cost_usd, None);
    assert_eq!(result.result, None);

    let usage = result.usage.as_ref().unwrap();
    assert_eq!(usage["total_tokens"], 55);
    assert_eq!(usage["input_tokens"], 40);
    assert_eq!(usage["output_tokens"], 15);
    assert_eq!(usage["tool_calls"], 1);
}

#[test]
fn stream_corrupt_line_is_skipped() {
    let clean = parse(&lines(&[INIT, USER, ASSISTANT, RESULT]));
    let corrupted = parse(&lines(&[INIT, USER, r#"{"type":"message","role":"assis"#, ASSISTANT, RESULT]));

    assert_eq!(corrupted.len(), clean.len());
    for (a, b) in clean.iter().zip(&corrupted) {
        assert_eq!(a, b);
    }
}

#[test]
fn stream_results_share_init_session_id() {
    let error = r#"{"type":"error","message":"quota exceeded"}"#;
    let messages = parse(&lines(&[INIT, RESULT, error]));

    let ids: Vec<&str> = messages
        .iter()
        .filter_map(Message::as_result)
        .map(|r| r.session_id.as_str())
        .collect();
    assert_eq!(ids, vec!["sess-1", "sess-1"]);
}

#[test]
fn stream_without_init_uses_one_synthesized_session_id() {
    let error = r#"{"type":"error"}"#;
    let messages = parse(&lines(&[USER, RESULT, error]));

    let results: Vec<&ResultMessage> = messages.iter().filter_map(Message::as_result).collect();
    assert_eq!(results.len(), 2);
    assert!(results[0].session_id.starts_with("gemini-"));
    assert_eq!(results[0].session_id, results[1].session_id);
}

#[test]
fn stream_init_without_session_id_synthesizes_one() {
    let messages = parse(&lines(&[r#"{"type":"init","model":"m"}"#, RESULT]));

    let Message::System(init) = &messages[0] else {
        panic!("expected system message");
    };
    let synthesized = init.data["session_id"].as_str().unwrap();
    assert!(synthesized.starts_with("gemini-"));
    assert_eq!(result_of(&messages).session_id, synthesized);
}

#[test]
fn stream_error_event_folds_into_error_result() {
    let messages = parse(&lines(&[INIT, r#"{"type":"error","message":"quota exceeded"}"#]));
    let result = result_of(&messages);

    assert_eq!(result.subtype, "error");
    assert!(result.is_error);
    assert_eq!(result.duration_ms, 0);
    assert_eq!(result.num_turns, 0);
    assert_eq!(result.result.as_deref(), Some("quota exceeded"));
}

#[test]
fn stream_error_event_without_message_uses_fallback() {
    let messages = parse(&lines(&[INIT, r#"{"type":"error"}"#]));
    assert_eq!(result_of(&messages).result.as_deref(), Some("Unknown error"));
}

#[test]
fn stream_error_status_result_is_error() {
    let messages = parse(&lines(&[INIT, r#"{"type":"result","status":"error"}"#]));
    let result = result_of(&messages);

    assert_eq!(result.subtype, "error");
    assert!(result.is_error);
    assert_eq!(result.duration_ms, 0);
    assert_eq!(result.usage.as_ref().unwrap()["total_tokens"], 0);
}

#[test]
fn stream_every_assistant_delta_is_its_own_message() {
    let messages = parse(&lines(&[
        INIT,
        r#"{"type":"message","role":"assistant","content":"Hel","delta":true}"#,
        r#"{"type":"message","role":"assistant","content":"","delta":true}"#,
        r#"{"type":"message","role":"assistant","content":"lo","delta":true}"#,
    ]));

    let texts: Vec<String> = messages
        .iter()
        .filter_map(|m| match m {
            Message::Assistant(a) => Some(a.text_content()),
            _ => None,
        })
        .collect();
    assert_eq!(texts, vec!["Hel", "lo"]);
}

#[test]
fn stream_ignores_unknown_events_and_roles() {
    let messages = parse(&lines(&[
        INIT,
        r#"{"type":"tool_use","tool_name":"read_file","parameters":{}}"#,
        r#"{"type":"message","role":"system","content":"hidden"}"#,
        r#"{"type":"tool_result","status":"success"}"#,
        RESULT,
    ]));

    assert_eq!(messages.len(), 2);
    assert!(matches!(messages[0], Message::System(_)));
    assert!(matches!(messages[1], Message::Result(_)));
}

#[test]
fn stream_skips_blank_and_non_json_lines_after_start() {
    let stdout = format!("Loading extensions...\n{INIT}\n\n[debug] flushed\n{USER}\n   \n{RESULT}\n");
    let messages = parse(&stdout);
    assert_eq!(messages.len(), 3);
}

#[test]
fn stream_fields_with_unexpected_types_keep_the_event() {
    let messages = parse(&lines(&[
        r#"{"type":"init","session_id":42,"model":"m"}"#,
        r#"{"type":"message","role":"assistant","content":"hi","delta":null}"#,
        r#"{"type":"result","status":"success","stats":null}"#,
    ]));

    assert_eq!(messages.len(), 3);
    assert!(matches!(&messages[0], Message::System(s) if s.data["session_id"] == "42"));
    assert!(matches!(&messages[1], Message::Assistant(a) if a.text_content() == "hi"));

    let result = result_of(&messages);
    assert_eq!(result.subtype, "success");
    assert_eq!(result.session_id, "42");
    assert_eq!(result.duration_ms, 0);
    assert_eq!(result.usage.as_ref().unwrap()["total_tokens"], 0);
}

#[test]
fn stream_init_with_null_session_id_synthesizes_one() {
    let messages = parse(&lines(&[r#"{"type":"init","session_id":null}"#, RESULT]));
    let Message::System(init) = &messages[0] else {
        panic!("expected system message");
    };
    assert!(init.data["session_id"].as_str().unwrap().starts_with("gemini-"));
    assert_eq!(result_of(&messages).session_id, init.data["session_id"]);
}

#[test]
fn single_event_stream_is_read_as_single_json() {
    // Known ambiguity: one event line looks exactly like `-o json` output.
    let messages = parse(RESULT);

    assert_eq!(messages.len(), 1);
    let result = result_of(&messages);
    assert_eq!(result.subtype, "success");
    assert_eq!(result.duration_ms, 0);
    assert!(result.session_id.starts_with("gemini-"));
}

// ---------------------------------------------------------------------------
// Trait surface
// ---------------------------------------------------------------------------

#[test]
fn async_parse_matches_sync_core_and_ignores_stderr() {
    let stdout = lines(&[INIT, ASSISTANT, RESULT]);
    let via_trait =
        tokio_test::block_on(JsonParser.parse(&stdout, "Error: something on stderr")).unwrap();

    assert_eq!(via_trait, parse(&stdout));
    assert_eq!(JsonParser.name(), "JsonParser");
}
