use std::sync::{Arc, Mutex};

use futures_util::StreamExt;
use pretty_assertions::assert_eq;
use wiremock::matchers::{body_json, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};
use workbench_engine::{
    BackendClient, BackendSettings, ChatRequest, FrameDecoder, HttpBackendClient,
    PreprocessApplyRequest, PreprocessOperation, RagQueryRequest, ReportCreateRequest,
    StageErrorKind, StreamEvent, UploadPayload, UploadProgress,
};

fn client_for(server: &MockServer) -> HttpBackendClient {
    let settings = BackendSettings {
        base_url: server.uri(),
        ..BackendSettings::default()
    };
    HttpBackendClient::new(settings).expect("client")
}

#[derive(Default)]
struct RecordingProgress {
    seen: Mutex<Vec<u8>>,
}

impl UploadProgress for RecordingProgress {
    fn emit(&self, percent: u8) {
        self.seen.lock().unwrap().push(percent);
    }
}

#[tokio::test]
async fn upload_posts_multipart_and_reports_progress() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/datasets/"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "id": 7,
            "source_id": "src-7",
            "filename": "sales.csv",
            "storage_path": "/data/sales.csv",
            "filesize": 16,
        })))
        .mount(&server)
        .await;

    let client = client_for(&server);
    let progress = Arc::new(RecordingProgress::default());
    let record = client
        .upload(
            UploadPayload {
                file_name: "sales.csv".to_string(),
                content: b"id,Region\n1,North".to_vec(),
                content_type: "text/csv".to_string(),
            },
            progress.clone(),
        )
        .await
        .expect("upload ok");

    assert_eq!(record.id, 7);
    assert_eq!(record.source_id, "src-7");
    assert_eq!(record.filename, "sales.csv");

    let seen = progress.seen.lock().unwrap().clone();
    assert_eq!(seen.first(), Some(&0));
    assert_eq!(seen.last(), Some(&100));
}

#[tokio::test]
async fn fetch_sample_round_trips_the_schema() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/datasets/src-1/sample"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "source_id": "src-1",
            "columns": ["id", "Region", "price"],
            "rows": [{"id": 1}, {"id": 2}],
        })))
        .mount(&server)
        .await;

    let sample = client_for(&server)
        .fetch_sample("src-1")
        .await
        .expect("sample ok");
    assert_eq!(sample.columns.len(), 3);
    assert_eq!(sample.rows.len(), 2);
}

#[tokio::test]
async fn backend_detail_field_becomes_the_error_message() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/datasets/src-1/sample"))
        .respond_with(
            ResponseTemplate::new(500)
                .set_body_json(serde_json::json!({"detail": "schema service down"})),
        )
        .mount(&server)
        .await;

    let err = client_for(&server).fetch_sample("src-1").await.unwrap_err();
    assert_eq!(err.kind, StageErrorKind::HttpStatus(500));
    assert_eq!(err.message, "schema service down");
}

#[tokio::test]
async fn missing_detail_falls_back_to_the_status_code() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/datasets/gone/sample"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    let err = client_for(&server).fetch_sample("gone").await.unwrap_err();
    assert_eq!(err.kind, StageErrorKind::HttpStatus(404));
    assert_eq!(err.message, "HTTP 404");
}

#[tokio::test]
async fn chat_posts_the_question_json() {
    let server = MockServer::start().await;
    let request = ChatRequest {
        question: "Analyze this dataset.".to_string(),
        session_id: None,
        source_id: Some("src-1".to_string()),
    };
    Mock::given(method("POST"))
        .and(path("/chats/"))
        .and(body_json(
            serde_json::json!({"question": "Analyze this dataset.", "source_id": "src-1"}),
        ))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "answer": "Looks clean.",
            "session_id": 31,
        })))
        .mount(&server)
        .await;

    let reply = client_for(&server).chat(&request).await.expect("chat ok");
    assert_eq!(reply.answer, "Looks clean.");
    assert_eq!(reply.session_id, 31);
}

#[tokio::test]
async fn rag_query_maps_204_to_none() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/rag/query"))
        .respond_with(ResponseTemplate::new(204))
        .mount(&server)
        .await;

    let reply = client_for(&server)
        .rag_query(&RagQueryRequest {
            query: "patterns".to_string(),
            top_k: 5,
            source_filter: vec!["src-1".to_string()],
        })
        .await
        .expect("rag ok");
    assert!(reply.is_none());
}

#[tokio::test]
async fn rag_query_parses_retrieved_chunks() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/rag/query"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "answer": "two hits",
            "retrieved_chunks": [
                {"source_id": "src-1", "chunk_id": 1, "score": 0.9, "snippet": "a"},
                {"source_id": "src-1", "chunk_id": 2, "score": 0.4, "snippet": "b"},
            ],
            "executed_at": "2024-05-01T10:00:00Z",
        })))
        .mount(&server)
        .await;

    let reply = client_for(&server)
        .rag_query(&RagQueryRequest {
            query: "patterns".to_string(),
            top_k: 5,
            source_filter: vec!["src-1".to_string()],
        })
        .await
        .expect("rag ok")
        .expect("hit");
    assert_eq!(reply.retrieved_chunks.len(), 2);
    assert_eq!(reply.retrieved_chunks[0].score, 0.9);
}

#[tokio::test]
async fn apply_preprocess_sends_the_impute_operation() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/preprocess/apply"))
        .and(body_json(serde_json::json!({
            "dataset_id": 7,
            "operations": [{
                "op": "impute",
                "params": {"column": "Region", "strategy": "mode", "fill_value": "auto"},
            }],
        })))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(serde_json::json!({"dataset_id": 7})),
        )
        .mount(&server)
        .await;

    client_for(&server)
        .apply_preprocess(&PreprocessApplyRequest {
            dataset_id: 7,
            operations: vec![PreprocessOperation {
                op: "impute".to_string(),
                params: serde_json::json!({
                    "column": "Region",
                    "strategy": "mode",
                    "fill_value": "auto",
                }),
            }],
        })
        .await
        .expect("preprocess ok");
}

#[tokio::test]
async fn create_report_round_trips() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/report/"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "report_id": "rep-1",
            "session_id": 31,
            "summary_text": "All good.",
        })))
        .mount(&server)
        .await;

    let reply = client_for(&server)
        .create_report(&ReportCreateRequest { session_id: 31 })
        .await
        .expect("report ok");
    assert_eq!(reply.report_id, "rep-1");
    assert_eq!(reply.summary_text, "All good.");
}

#[tokio::test]
async fn chat_stream_yields_the_framed_events() {
    let server = MockServer::start().await;
    let body = "event: session\r\ndata: {\"session_id\": 9}\r\n\r\n\
                event: chunk\ndata: {\"delta\": \"Hi\"}\n\n\
                event: done\ndata: {\"answer\": \"Hi there\", \"session_id\": 9}\n\n";
    Mock::given(method("POST"))
        .and(path("/chats/stream"))
        .respond_with(ResponseTemplate::new(200).set_body_raw(body, "text/event-stream"))
        .mount(&server)
        .await;

    let mut stream = client_for(&server)
        .chat_stream(&ChatRequest {
            question: "hello".to_string(),
            session_id: Some(9),
            source_id: Some("src-1".to_string()),
        })
        .await
        .expect("stream opened");

    let mut decoder = FrameDecoder::new();
    let mut events = Vec::new();
    while let Some(bytes) = stream.next().await {
        for frame in decoder.push(&bytes.expect("chunk ok")) {
            events.extend(StreamEvent::from_frame(&frame));
        }
    }
    events.extend(decoder.finish().iter().filter_map(StreamEvent::from_frame));

    assert_eq!(events.len(), 3);
    assert_eq!(events[0], StreamEvent::Session { session_id: 9 });
    assert!(matches!(&events[1], StreamEvent::Chunk { delta } if delta == "Hi"));
    assert!(matches!(&events[2], StreamEvent::Done { answer, .. } if answer == "Hi there"));
}

#[tokio::test]
async fn chat_stream_propagates_http_errors() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/chats/stream"))
        .respond_with(
            ResponseTemplate::new(503).set_body_json(serde_json::json!({"detail": "overloaded"})),
        )
        .mount(&server)
        .await;

    let err = match client_for(&server)
        .chat_stream(&ChatRequest {
            question: "hello".to_string(),
            session_id: None,
            source_id: None,
        })
        .await
    {
        Ok(_) => panic!("expected chat_stream to fail"),
        Err(e) => e,
    };
    assert_eq!(err.kind, StageErrorKind::HttpStatus(503));
    assert_eq!(err.message, "overloaded");
}
