use serde_json::json;
use tokio_test::{assert_err, assert_ok};

use openrouter_chat::response::{
  extract_error_message, extract_text_content, parse_structured_content,
  strip_code_fences, CompletionEnvelope,
};
use openrouter_chat::ErrorKind;

#[test]
fn test_fenced_json_matches_unfenced()
{   let plain = r#"{"flashcards":[{"front":"Q","back":"A"}]}"#;
    let fenced = format!("```json\n{}\n```", plain);
    let bare_fence = format!("```\n{}\n```", plain);

    let expected = assert_ok!(parse_structured_content(plain));
    assert_eq!(assert_ok!(parse_structured_content(&fenced)), expected);
    assert_eq!(assert_ok!(parse_structured_content(&bare_fence)), expected);
}

#[test]
fn test_strip_code_fences()
{   assert_eq!(strip_code_fences("  {\"a\":1}  "), "{\"a\":1}");
    assert_eq!(strip_code_fences("```json\n[1, 2]\n```"), "[1, 2]");
    assert_eq!(strip_code_fences("```[1]```"), "[1]");
    // Unterminated fence is left alone
    assert_eq!(strip_code_fences("```json\n[1]"), "```json\n[1]");
    // A first line that is JSON is not an info string
    assert_eq!(
      strip_code_fences("```{\"a\": 1,\n\"b\": 2}```"),
      "{\"a\": 1,\n\"b\": 2}"
    );
}

#[test]
fn test_unparseable_content_is_validation_error()
{   let err = assert_err!(parse_structured_content("Sure! Here are cards:"));
    assert_eq!(err.kind, ErrorKind::Validation);
}

#[test]
fn test_text_content_from_string_and_parts()
{   assert_eq!(
      assert_ok!(extract_text_content(&json!("  hello \n"))),
      "hello"
    );
    let parts = json!([
      { "type": "text", "text": "first" },
      { "type": "image_url", "image_url": { "url": "x" } },
      { "type": "text", "text": 3 },
      { "type": "text", "text": "second" }
    ]);
    assert_eq!(assert_ok!(extract_text_content(&parts)), "first\nsecond");
}

#[test]
fn test_missing_text_content_is_api_error()
{   for content in [json!("   "), json!([]), json!([{ "type": "image" }]), json!(null)]
    {   let err = assert_err!(extract_text_content(&content));
        assert_eq!(err.kind, ErrorKind::Api);
    }
}

#[test]
fn test_envelope_without_choices()
{   let raw = json!({ "id": "gen-1", "choices": [] });
    let envelope = assert_ok!(CompletionEnvelope::from_raw(&raw));
    let err = assert_err!(envelope.first_choice());
    assert_eq!(err.kind, ErrorKind::Api);

    let err = assert_err!(CompletionEnvelope::from_raw(&json!({ "choices": 5 })));
    assert_eq!(err.kind, ErrorKind::Api);
}

#[test]
fn test_error_message_extraction()
{   assert_eq!(
      extract_error_message(&json!({ "error": "bad key" }), 401),
      "bad key"
    );
    assert_eq!(
      extract_error_message(
        &json!({ "error": { "message": "rate limited", "code": 429 } }),
        429
      ),
      "rate limited"
    );
    assert_eq!(
      extract_error_message(&json!({ "message": "upstream down" }), 502),
      "upstream down"
    );
    assert_eq!(
      extract_error_message(&json!({ "message": "" }), 503),
      "Request failed with status 503"
    );
}
