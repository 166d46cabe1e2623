//! HTTP synthesis collaborator tests against a wiremock server.

use serde_json::json;
use wiremock::matchers::{body_partial_json, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use voxa::core::codec::{self, AudioFrame, OUTPUT_SAMPLE_RATE};
use voxa::core::synth::{HttpSynthesizer, SpeechSynthesizer, SynthesisError};

fn sample_payload() -> String {
    let frame = AudioFrame::new(vec![0i16; 2400], OUTPUT_SAMPLE_RATE);
    codec::encode_frame(&frame).data
}

#[tokio::test]
async fn test_successful_synthesis_round_trip() {
    let server = MockServer::start().await;
    let payload = sample_payload();

    Mock::given(method("POST"))
        .and(path("/synthesize"))
        .and(body_partial_json(json!({
            "text": "Welcome back.",
            "voice": "aoede",
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "audioContent": payload,
        })))
        .expect(1)
        .mount(&server)
        .await;

    let synth = HttpSynthesizer::new(format!("{}/synthesize", server.uri()), None).unwrap();
    let audio = synth.synthesize("Welcome back.", "aoede").await.unwrap();

    assert_eq!(audio, payload);
    // The payload decodes into a playable frame at the response rate.
    let frame = codec::decode_payload(&audio, OUTPUT_SAMPLE_RATE).unwrap();
    assert_eq!(frame.len(), 2400);
}

#[tokio::test]
async fn test_error_status_is_reported() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/synthesize"))
        .respond_with(ResponseTemplate::new(429))
        .mount(&server)
        .await;

    let synth = HttpSynthesizer::new(format!("{}/synthesize", server.uri()), None).unwrap();
    let err = synth.synthesize("anything", "aoede").await.unwrap_err();

    assert!(matches!(err, SynthesisError::Status(429)));
}

#[tokio::test]
async fn test_malformed_body_is_a_payload_error() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/synthesize"))
        .respond_with(ResponseTemplate::new(200).set_body_string("not json"))
        .mount(&server)
        .await;

    let synth = HttpSynthesizer::new(format!("{}/synthesize", server.uri()), None).unwrap();
    let err = synth.synthesize("anything", "aoede").await.unwrap_err();

    assert!(matches!(err, SynthesisError::Payload(_)));
}

#[tokio::test]
async fn test_empty_audio_content_is_rejected() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/synthesize"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "audioContent": "" })))
        .mount(&server)
        .await;

    let synth = HttpSynthesizer::new(format!("{}/synthesize", server.uri()), None).unwrap();
    let err = synth.synthesize("anything", "aoede").await.unwrap_err();

    assert!(matches!(err, SynthesisError::Payload(_)));
}

#[tokio::test]
async fn test_api_key_is_sent_as_bearer() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/synthesize"))
        .and(wiremock::matchers::header("authorization", "Bearer sk-test"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "audioContent": sample_payload(),
        })))
        .expect(1)
        .mount(&server)
        .await;

    let synth = HttpSynthesizer::new(
        format!("{}/synthesize", server.uri()),
        Some("sk-test".to_string()),
    )
    .unwrap();
    synth.synthesize("hello", "aoede").await.unwrap();
}
