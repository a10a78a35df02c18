use lp_planner::config::{ModelSettings, Provider, Settings};
use lp_planner::error::{ErrorKind, ModelError, PipelineError, Stage};
use lp_planner::pipeline::LpPlanner;
use lp_planner::reference::UploadedReferences;
use lp_planner::session::{Reply, SessionContext};
use serde_json::json;
use test_log::test;
use wiremock::matchers::{body_partial_json, body_string_contains, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const ANALYSIS: &str = "1. ターゲットの分析\n従業員300名以上の製造業\n2. 訴求軸の検討\n運用負荷の削減\n3. 訴求シナリオの検討\n課題提起→解決策→導入事例";
const SVG: &str = "<svg xmlns=\"http://www.w3.org/2000/svg\" width=\"800\" height=\"450\"><text x=\"40\" y=\"60\">ターゲット</text></svg>";

fn gemini_settings(server: &MockServer, key: Option<&str>) -> ModelSettings {
    let mut settings = ModelSettings::new(Provider::Gemini);
    settings.base_url = server.uri();
    settings.api_key = key.map(str::to_string);
    settings
}

fn anthropic_settings(server: &MockServer, key: Option<&str>) -> ModelSettings {
    let mut settings = ModelSettings::new(Provider::Anthropic);
    settings.base_url = server.uri();
    settings.api_key = key.map(str::to_string);
    settings.max_tokens = 16_000;
    settings.temperature = Some(0.1);
    settings
}

fn settings_for(text: ModelSettings, diagram: ModelSettings) -> Settings {
    Settings {
        text,
        diagram,
        ..Settings::default()
    }
}

fn gemini_reply(text: &str) -> ResponseTemplate {
    ResponseTemplate::new(200).set_body_json(json!({
        "candidates": [{ "content": { "role": "model", "parts": [{ "text": text }] } }]
    }))
}

fn anthropic_reply(text: &str) -> ResponseTemplate {
    ResponseTemplate::new(200).set_body_json(json!({
        "id": "msg_01",
        "type": "message",
        "role": "assistant",
        "content": [{ "type": "text", "text": text }],
        "stop_reason": "end_turn"
    }))
}

#[test(tokio::test)]
async fn test_gemini_then_anthropic_request_shapes() {
    let gemini = MockServer::start().await;
    let anthropic = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/v1beta/models/gemini-2.0-flash:generateContent"))
        .and(header("x-goog-api-key", "google-test-key"))
        .and(body_partial_json(json!({ "generationConfig": { "maxOutputTokens": 4096 } })))
        .and(body_string_contains("クラウドセキュリティサービス"))
        .respond_with(gemini_reply(ANALYSIS))
        .expect(1)
        .mount(&gemini)
        .await;

    Mock::given(method("POST"))
        .and(path("/v1/messages"))
        .and(header("x-api-key", "anthropic-test-key"))
        .and(header("anthropic-version", "2023-06-01"))
        .and(body_partial_json(json!({
            "model": "claude-3-7-sonnet-20250219",
            "max_tokens": 16000,
            "system": lp_planner::prompts::DIAGRAM_SYSTEM,
        })))
        .and(body_string_contains("運用負荷の削減"))
        .respond_with(anthropic_reply(&format!("以下がSVGです。\n```svg\n{}\n```", SVG)))
        .expect(1)
        .mount(&anthropic)
        .await;

    let settings = settings_for(
        gemini_settings(&gemini, Some("google-test-key")),
        anthropic_settings(&anthropic, Some("anthropic-test-key")),
    );
    let planner = LpPlanner::from_settings(&settings).unwrap();
    let outcome = planner
        .plan("クラウドセキュリティサービス", &UploadedReferences::default())
        .await
        .unwrap();

    assert_eq!(outcome.analysis, ANALYSIS);
    assert_eq!(outcome.diagram, SVG);
}

#[test(tokio::test)]
async fn test_missing_diagram_key_sends_nothing() {
    let gemini = MockServer::start().await;
    let anthropic = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(gemini_reply(ANALYSIS))
        .expect(0)
        .mount(&gemini)
        .await;
    Mock::given(method("POST"))
        .respond_with(anthropic_reply(SVG))
        .expect(0)
        .mount(&anthropic)
        .await;

    let settings = settings_for(
        gemini_settings(&gemini, Some("google-test-key")),
        anthropic_settings(&anthropic, None),
    );
    let err = LpPlanner::from_settings(&settings).err().unwrap();
    assert_eq!(err.kind(), ErrorKind::Configuration);
    assert!(err.to_string().contains("ANTHROPIC_API_KEY"));
}

#[test(tokio::test)]
async fn test_text_api_error_is_transport_failure() {
    let gemini = MockServer::start().await;
    let anthropic = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(503).set_body_string("model overloaded"))
        .expect(1)
        .mount(&gemini)
        .await;
    Mock::given(method("POST"))
        .respond_with(anthropic_reply(SVG))
        .expect(0)
        .mount(&anthropic)
        .await;

    let settings = settings_for(
        gemini_settings(&gemini, Some("k")),
        anthropic_settings(&anthropic, Some("k")),
    );
    let err = LpPlanner::from_settings(&settings)
        .unwrap()
        .plan("テーマ", &UploadedReferences::default())
        .await
        .unwrap_err();

    match err {
        PipelineError::ModelTransport {
            stage: Stage::TextAnalysis,
            source: ModelError::Api { status, message },
        } => {
            assert_eq!(status, 503);
            assert_eq!(message, "model overloaded");
        }
        other => panic!("unexpected error: {:?}", other),
    }
}

#[test(tokio::test)]
async fn test_undecodable_body_is_transport_failure() {
    let gemini = MockServer::start().await;
    let anthropic = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_string("<html>proxy error</html>"))
        .mount(&gemini)
        .await;

    let settings = settings_for(
        gemini_settings(&gemini, Some("k")),
        anthropic_settings(&anthropic, Some("k")),
    );
    let err = LpPlanner::from_settings(&settings)
        .unwrap()
        .plan("テーマ", &UploadedReferences::default())
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        PipelineError::ModelTransport {
            source: ModelError::InvalidResponse(_),
            ..
        }
    ));
}

#[test(tokio::test)]
async fn test_diagram_without_svg_is_output_failure() {
    let gemini = MockServer::start().await;
    let anthropic = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(gemini_reply(ANALYSIS))
        .mount(&gemini)
        .await;
    Mock::given(method("POST"))
        .respond_with(anthropic_reply("申し訳ありませんが、SVGは作成できません。"))
        .mount(&anthropic)
        .await;

    let settings = settings_for(
        gemini_settings(&gemini, Some("k")),
        anthropic_settings(&anthropic, Some("k")),
    );
    let err = LpPlanner::from_settings(&settings)
        .unwrap()
        .plan("テーマ", &UploadedReferences::default())
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        PipelineError::ModelOutput {
            stage: Stage::Diagram,
            ..
        }
    ));
}

#[test(tokio::test)]
async fn test_shift_jis_csv_reaches_text_prompt() {
    let gemini = MockServer::start().await;
    let anthropic = MockServer::start().await;
    Mock::given(method("POST"))
        .and(body_string_contains("情報通信業"))
        .respond_with(gemini_reply(ANALYSIS))
        .expect(1)
        .mount(&gemini)
        .await;
    Mock::given(method("POST"))
        .respond_with(anthropic_reply(SVG))
        .expect(1)
        .mount(&anthropic)
        .await;

    let (csv, _, had_errors) = encoding_rs::SHIFT_JIS.encode("業種,従業員数\n情報通信業,120\n製造業,850\n");
    assert!(!had_errors);

    let mut references = UploadedReferences::default();
    let excerpt = references.replace_csv(&csv, 10).unwrap();
    assert_eq!(excerpt.total_rows, 2);

    let settings = settings_for(
        gemini_settings(&gemini, Some("k")),
        anthropic_settings(&anthropic, Some("k")),
    );
    LpPlanner::from_settings(&settings)
        .unwrap()
        .plan("人事労務クラウド", &references)
        .await
        .unwrap();
}

#[test(tokio::test)]
async fn test_ollama_serves_both_stages_without_keys() {
    let ollama = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/generate"))
        .and(body_partial_json(json!({ "system": lp_planner::prompts::DIAGRAM_SYSTEM, "stream": false })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "model": "gemma3:12b", "response": SVG, "done": true
        })))
        .with_priority(1)
        .expect(1)
        .mount(&ollama)
        .await;
    Mock::given(method("POST"))
        .and(path("/api/generate"))
        .and(body_partial_json(json!({ "model": "gemma3:12b", "stream": false })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "model": "gemma3:12b", "response": ANALYSIS, "done": true
        })))
        .expect(1)
        .mount(&ollama)
        .await;

    let mut text = ModelSettings::new(Provider::Ollama);
    text.base_url = ollama.uri();
    let mut diagram = text.clone();
    diagram.temperature = Some(0.1);

    let mut session = SessionContext::new(&settings_for(text.clone(), diagram.clone()));
    let reply = session
        .respond("lp企画 ： 経費精算システム", &settings_for(text, diagram))
        .await;

    match reply {
        Reply::Planned(outcome) => {
            assert_eq!(outcome.theme, "経費精算システム");
            assert_eq!(outcome.diagram, SVG);
        }
        other => panic!("expected a plan, got {:?}", other),
    }
    assert_eq!(session.last_diagram(), Some(SVG));
    assert_eq!(session.transcript().len(), 2);
}

#[test(tokio::test)]
async fn test_ordinary_chat_never_contacts_models() {
    let gemini = MockServer::start().await;
    let anthropic = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(gemini_reply(ANALYSIS))
        .expect(0)
        .mount(&gemini)
        .await;
    Mock::given(method("POST"))
        .respond_with(anthropic_reply(SVG))
        .expect(0)
        .mount(&anthropic)
        .await;

    let settings = settings_for(
        gemini_settings(&gemini, Some("k")),
        anthropic_settings(&anthropic, Some("k")),
    );
    let mut session = SessionContext::new(&settings);
    for message in ["こんにちは", "LPって何？", "使い方を教えて", "さようなら"] {
        assert!(matches!(session.respond(message, &settings).await, Reply::Canned(_)));
    }
}
