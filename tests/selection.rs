//! Environment-driven selection: parser strategy and model fallback.
//!
//! These tests mutate process environment variables, so they share one lock
//! and restore what they touched.

use std::sync::Mutex;

use gemini_cli_sdk::config::{DEFAULT_MODEL, GeminiOptions, MODEL_ENV, PARSER_STRATEGY_ENV};
use gemini_cli_sdk::parsers::{OutputParser, ParserKind, ParserStrategy};

static ENV_LOCK: Mutex<()> = Mutex::new(());

const KEY_VARS: [&str; 2] = ["GEMINI_API_KEY", "GOOGLE_API_KEY"];

/// Run `f` with `vars` set (Some) or removed (None), then restore them.
fn with_env(vars: &[(&str, Option<&str>)], f: impl FnOnce()) {
    let _guard = ENV_LOCK.lock().unwrap_or_else(|e| e.into_inner());
    let saved: Vec<(String, Option<String>)> = vars
        .iter()
        .map(|(k, _)| (k.to_string(), std::env::var(k).ok()))
        .collect();

    for (key, value) in vars {
        // SAFETY: every env mutation in this binary holds ENV_LOCK.
        unsafe {
            match value {
                Some(v) => std::env::set_var(key, v),
                None => std::env::remove_var(key),
            }
        }
    }

    f();

    for (key, value) in saved {
        // SAFETY: as above.
        unsafe {
            match value {
                Some(v) => std::env::set_var(&key, v),
                None => std::env::remove_var(&key),
            }
        }
    }
}

#[test]
fn llm_strategy_without_credentials_falls_back_to_json() {
    with_env(&[(KEY_VARS[0], None), (KEY_VARS[1], None)], || {
        let parser = ParserKind::from_strategy(ParserStrategy::Llm);
        assert_eq!(parser.name(), "JsonParser");
    });
}

#[test]
fn llm_strategy_with_google_key_builds_llm_parser() {
    with_env(&[(KEY_VARS[0], None), (KEY_VARS[1], Some("test-key"))], || {
        let parser = ParserKind::from_strategy(ParserStrategy::Llm);
        assert_eq!(parser.name(), "LlmParser");
    });
}

#[test]
fn strategy_env_selects_and_falls_back() {
    with_env(&[(PARSER_STRATEGY_ENV, None)], || {
        assert_eq!(ParserStrategy::from_env(), ParserStrategy::Json);
    });
    with_env(&[(PARSER_STRATEGY_ENV, Some("regex"))], || {
        assert_eq!(ParserStrategy::from_env(), ParserStrategy::Json);
    });
    with_env(&[(PARSER_STRATEGY_ENV, Some(" LLM "))], || {
        assert_eq!(ParserStrategy::from_env(), ParserStrategy::Llm);
    });
}

#[test]
fn parser_kind_from_env_combines_strategy_and_credentials() {
    with_env(
        &[
            (PARSER_STRATEGY_ENV, Some("llm")),
            (KEY_VARS[0], Some("test-key")),
        ],
        || assert_eq!(ParserKind::from_env().name(), "LlmParser"),
    );
    with_env(
        &[
            (PARSER_STRATEGY_ENV, Some("llm")),
            (KEY_VARS[0], None),
            (KEY_VARS[1], None),
        ],
        || assert_eq!(ParserKind::from_env().name(), "JsonParser"),
    );
}

#[test]
fn model_env_fills_in_when_options_name_none() {
    with_env(&[(MODEL_ENV, Some("gemini-from-env"))], || {
        assert_eq!(GeminiOptions::default().resolved_model(), "gemini-from-env");

        let explicit = GeminiOptions {
            model: Some("explicit-model".to_string()),
            ..Default::default()
        };
        assert_eq!(explicit.resolved_model(), "explicit-model");
    });
}

#[test]
fn empty_or_missing_model_env_uses_default() {
    with_env(&[(MODEL_ENV, Some(""))], || {
        assert_eq!(GeminiOptions::default().resolved_model(), DEFAULT_MODEL);
    });
    with_env(&[(MODEL_ENV, None)], || {
        assert_eq!(GeminiOptions::default().resolved_model(), DEFAULT_MODEL);
    });
}
