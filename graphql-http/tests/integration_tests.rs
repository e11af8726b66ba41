use std::num::NonZeroUsize;
use std::sync::Arc;
use std::sync::atomic::AtomicUsize;
use std::sync::atomic::Ordering;

use async_compression::tokio::write::GzipEncoder;
use async_trait::async_trait;
use bytes::Bytes;
use bytesize::ByteSize;
use futures::FutureExt;
use graphql_http::Configuration;
use graphql_http::ExplorerOptions;
use graphql_http::GraphQLHttp;
use graphql_http::InMemoryDocumentCache;
use graphql_http::Options;
use graphql_http::OptionsData;
use graphql_http::OptionsFactory;
use graphql_http::RequestParams;
use graphql_http::Schema;
use graphql_http::ExecutionArgs;
use graphql_http::ExecutionResult;
use graphql_http::engine::Document;
use graphql_http::engine::ExecuteFn;
use graphql_http::engine::FormatErrorFn;
use graphql_http::engine::ParseFn;
use graphql_http::graphql;
use graphql_http::json_ext::Object;
use graphql_http::options::ExtensionsFn;
use graphql_http::options::ExtensionsInfo;
use graphql_http::test_harness::TestEngine;
use http::HeaderMap;
use http::HeaderValue;
use http::Request;
use http::StatusCode;
use http::header::ALLOW;
use http::header::CONTENT_TYPE;
use http::request::Parts;
use http_body_util::BodyExt;
use http_body_util::Full;
use pretty_assertions::assert_eq;
use serde_json::Value;
use serde_json::json;
use test_log::test;
use tokio::io::AsyncWriteExt;
use tower::BoxError;
use tower::ServiceExt;

fn engine() -> TestEngine {
    TestEngine::builder()
        .field("hello", "world")
        .field("test", "tested")
        .build()
        .unwrap()
}

fn service_with(engine: TestEngine, options: impl FnOnce(OptionsData) -> OptionsData) -> GraphQLHttp {
    let base = OptionsData::builder().schema(engine.schema()).build();
    GraphQLHttp::new(engine, options(base))
}

fn service() -> GraphQLHttp {
    service_with(engine(), |options| options)
}

fn execute_fn<F, Fut>(execute: F) -> ExecuteFn
where
    F: Fn(ExecutionArgs) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<ExecutionResult, BoxError>> + Send + 'static,
{
    Arc::new(move |args| execute(args).boxed())
}

fn extensions_fn<F, Fut>(extensions: F) -> ExtensionsFn
where
    F: Fn(ExtensionsInfo) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Option<Object>, BoxError>> + Send + 'static,
{
    Arc::new(move |info| extensions(info).boxed())
}

struct Reply {
    status: StatusCode,
    headers: HeaderMap,
    body: String,
}

impl Reply {
    fn json(&self) -> Value {
        serde_json::from_str(&self.body).unwrap()
    }
}

async fn call(service: GraphQLHttp, request: Request<Full<Bytes>>) -> Reply {
    let response = service.oneshot(request).await.unwrap();
    let status = response.status();
    let headers = response.headers().clone();
    let body = response.into_body().collect().await.unwrap().to_bytes();
    Reply {
        status,
        headers,
        body: String::from_utf8(body.to_vec()).unwrap(),
    }
}

fn post_json(body: impl Into<String>) -> Request<Full<Bytes>> {
    Request::post("/graphql")
        .header(CONTENT_TYPE, "application/json")
        .body(Full::new(Bytes::from(body.into())))
        .unwrap()
}

fn get(uri: &str) -> Request<Full<Bytes>> {
    Request::get(uri).body(Full::default()).unwrap()
}

fn get_html(uri: &str) -> Request<Full<Bytes>> {
    Request::get(uri)
        .header("accept", "text/html")
        .body(Full::default())
        .unwrap()
}

#[test(tokio::test)]
async fn it_executes_a_json_post() {
    let reply = call(service(), post_json(r#"{"query":"{ hello }"}"#)).await;
    assert_eq!(reply.status, StatusCode::OK);
    assert_eq!(
        reply.headers.get(CONTENT_TYPE).unwrap(),
        "application/json; charset=utf-8"
    );
    assert_eq!(
        reply.headers.get("content-length").unwrap(),
        &reply.body.len().to_string()
    );
    assert_eq!(reply.body, r#"{"data":{"hello":"world"}}"#);
}

#[test(tokio::test)]
async fn it_reports_syntax_errors() {
    let reply = call(service(), get("/graphql?query=%7B")).await;
    assert_eq!(reply.status, StatusCode::BAD_REQUEST);
    let body = reply.json();
    let errors = body["errors"].as_array().unwrap();
    assert_eq!(errors.len(), 1);
    assert!(errors[0]["message"].as_str().is_some_and(|m| !m.is_empty()));
    assert!(errors[0]["locations"].as_array().is_some_and(|l| !l.is_empty()));
    assert!(body.get("data").is_none());
}

#[test(tokio::test)]
async fn it_decodes_gzip_bodies() {
    let payload = r#"{"query":"{ test }"}"#;
    let mut encoder = GzipEncoder::new(Vec::new());
    encoder.write_all(payload.as_bytes()).await.unwrap();
    encoder.shutdown().await.unwrap();
    let compressed = Request::post("/graphql")
        .header(CONTENT_TYPE, "application/json")
        .header("content-encoding", "gzip")
        .body(Full::new(Bytes::from(encoder.into_inner())))
        .unwrap();

    let compressed = call(service(), compressed).await;
    let plain = call(service(), post_json(payload)).await;
    assert_eq!(compressed.status, StatusCode::OK);
    assert_eq!(compressed.body, plain.body);
    assert_eq!(compressed.body, r#"{"data":{"test":"tested"}}"#);
}

#[test(tokio::test)]
async fn it_renders_the_explorer_without_a_query() {
    let service = service_with(engine(), |mut options| {
        options.explorer = true.into();
        options
    });
    let reply = call(service, get_html("/graphql")).await;
    assert_eq!(reply.status, StatusCode::OK);
    assert!(
        reply
            .headers
            .get(CONTENT_TYPE)
            .unwrap()
            .to_str()
            .unwrap()
            .starts_with("text/html")
    );
    assert!(reply.body.contains("response: undefined"));
}

#[test(tokio::test)]
async fn it_renders_executed_results_in_the_explorer() {
    let service = service_with(engine(), |mut options| {
        options.explorer = ExplorerOptions::builder()
            .default_query("{ test }")
            .build()
            .into();
        options
    });
    let reply = call(service, get_html("/graphql?query=%7B%20hello%20%7D")).await;
    assert_eq!(reply.status, StatusCode::OK);
    assert!(reply.body.contains(r#"query: "{ hello }""#));
    assert!(reply.body.contains(r#"\"hello\": \"world\""#));
    assert!(reply.body.contains(r#"defaultQuery: "{ test }""#));
}

#[test(tokio::test)]
async fn it_needs_a_query_without_the_explorer() {
    let reply = call(service(), get_html("/graphql")).await;
    assert_eq!(reply.status, StatusCode::BAD_REQUEST);
    assert_eq!(
        reply.json(),
        json!({"errors": [{"message": "Must provide query string."}]})
    );
}

#[test(tokio::test)]
async fn raw_bypasses_the_explorer() {
    let service = service_with(engine(), |mut options| {
        options.explorer = true.into();
        options
    });
    let reply = call(service, get_html("/graphql?query=%7B%20hello%20%7D&raw")).await;
    assert_eq!(reply.status, StatusCode::OK);
    assert_eq!(reply.body, r#"{"data":{"hello":"world"}}"#);
}

#[test(tokio::test)]
async fn it_streams_incremental_results() {
    let engine = TestEngine::builder()
        .field("hello", "world")
        .patch(graphql::Response {
            has_next: Some(false),
            incremental: vec![
                graphql::IncrementalResponse::builder()
                    .data(serde_json_bytes::json!({"test": "later"}))
                    .path(graphql_http::json_ext::Path::default())
                    .build(),
            ],
            ..Default::default()
        })
        .build()
        .unwrap();
    let cancellations = engine.cancellations();
    let reply = call(
        service_with(engine, |options| options),
        post_json(r#"{"query":"{ hello }"}"#),
    )
    .await;

    assert_eq!(reply.status, StatusCode::OK);
    assert_eq!(
        reply.headers.get(CONTENT_TYPE).unwrap(),
        "multipart/mixed; boundary=\"-\""
    );
    let parts: Vec<&str> = reply.body.split("\r\n---\r\n").skip(1).collect();
    assert_eq!(parts.len(), 2);
    for part in &parts {
        let (headers, json) = part.split_once("\r\n\r\n").unwrap();
        assert!(headers.starts_with("Content-Type: application/json; charset=utf-8\r\n"));
        let json = json.trim_end_matches("\r\n-----\r\n").trim_end_matches("\r\n");
        assert!(headers.ends_with(&format!("Content-Length: {}", json.len())));
        let _: Value = serde_json::from_str(json).unwrap();
    }
    assert!(parts[0].contains(r#"{"data":{"hello":"world"},"hasNext":true}"#));
    assert!(parts[1].contains(r#""hasNext":false"#));
    assert!(reply.body.ends_with("\r\n-----\r\n"));
    assert_eq!(cancellations.load(Ordering::SeqCst), 1);
}

#[test(tokio::test)]
async fn client_disconnect_cancels_the_stream() {
    let engine = TestEngine::builder()
        .field("hello", "world")
        .hold_open(true)
        .patch(graphql::Response::builder().has_next(true).build())
        .build()
        .unwrap();
    let cancellations = engine.cancellations();
    let response = service_with(engine, |options| options)
        .oneshot(post_json(r#"{"query":"{ hello }"}"#))
        .await
        .unwrap();
    let mut body = response.into_body();
    let first = body.frame().await.unwrap().unwrap().into_data().unwrap();
    assert!(String::from_utf8_lossy(&first).contains(r#""hasNext":true"#));
    drop(body);

    for _ in 0..100 {
        if cancellations.load(Ordering::SeqCst) > 0 {
            break;
        }
        tokio::task::yield_now().await;
    }
    assert_eq!(cancellations.load(Ordering::SeqCst), 1);
}

#[test(tokio::test)]
async fn mutations_over_get_are_rejected() {
    let reply = call(service(), get("/graphql?query=mutation%20%7B%20bye%20%7D")).await;
    assert_eq!(reply.status, StatusCode::METHOD_NOT_ALLOWED);
    assert_eq!(reply.headers.get(ALLOW).unwrap(), "POST");
    assert_eq!(
        reply.json(),
        json!({"errors": [{"message": "Can only perform a mutation operation from a POST request."}]})
    );

    let reply = call(service(), post_json(r#"{"query":"mutation { bye }"}"#)).await;
    assert_eq!(reply.status, StatusCode::OK);
    assert_eq!(reply.json(), json!({"data": {"bye": null}}));
}

#[test(tokio::test)]
async fn mutations_over_get_show_the_explorer() {
    let executions = Arc::new(AtomicUsize::new(0));
    let counter = executions.clone();
    let service = service_with(engine(), move |mut options| {
        options.explorer = true.into();
        options.execute_fn = Some(execute_fn(move |_args| {
            counter.fetch_add(1, Ordering::SeqCst);
            async { Ok::<_, BoxError>(ExecutionResult::from(graphql::Response::default())) }
        }));
        options
    });
    let reply = call(service, get_html("/graphql?query=mutation%20%7B%20bye%20%7D")).await;
    assert_eq!(reply.status, StatusCode::OK);
    assert!(reply.body.contains("response: undefined"));
    assert_eq!(executions.load(Ordering::SeqCst), 0);
}

#[test(tokio::test)]
async fn only_get_and_post_are_supported() {
    let request = Request::put("/graphql?query=%7B%20hello%20%7D")
        .body(Full::default())
        .unwrap();
    let reply = call(service(), request).await;
    assert_eq!(reply.status, StatusCode::METHOD_NOT_ALLOWED);
    assert_eq!(reply.headers.get(ALLOW).unwrap(), "GET, POST");
    assert_eq!(
        reply.json(),
        json!({"errors": [{"message": "GraphQL only supports GET and POST requests."}]})
    );
}

#[test(tokio::test)]
async fn null_data_is_a_server_error() {
    let service = service_with(engine(), |mut options| {
        options.execute_fn = Some(execute_fn(|_args| async {
            let response = graphql::Response::builder()
                .data(serde_json_bytes::Value::Null)
                .error(graphql::Error::builder().message("resolver crashed").build())
                .build();
            Ok::<_, BoxError>(ExecutionResult::from(response))
        }));
        options
    });
    let reply = call(service, post_json(r#"{"query":"{ hello }"}"#)).await;
    assert_eq!(reply.status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(
        reply.json(),
        json!({"errors": [{"message": "resolver crashed"}], "data": null})
    );
}

#[test(tokio::test)]
async fn field_errors_keep_data_and_status() {
    let engine = TestEngine::builder()
        .field("hello", "world")
        .failing_field("failing", "cannot resolve")
        .build()
        .unwrap();
    let reply = call(
        service_with(engine, |options| options),
        post_json(r#"{"query":"{ hello failing }"}"#),
    )
    .await;
    assert_eq!(reply.status, StatusCode::OK);
    assert_eq!(
        reply.json(),
        json!({
            "errors": [{"message": "cannot resolve", "path": ["failing"]}],
            "data": {"hello": "world", "failing": null}
        })
    );
}

#[test(tokio::test)]
async fn execution_context_errors_are_bad_requests() {
    let service = service_with(engine(), |mut options| {
        options.execute_fn = Some(execute_fn(|_args| async {
            Err::<ExecutionResult, BoxError>("context unavailable".into())
        }));
        options
    });
    let reply = call(service, post_json(r#"{"query":"{ hello }"}"#)).await;
    assert_eq!(reply.status, StatusCode::BAD_REQUEST);
    assert_eq!(
        reply.json(),
        json!({"errors": [{"message": "context unavailable"}]})
    );
}

#[test(tokio::test)]
async fn validation_errors_are_all_reported() {
    let reply = call(
        service(),
        post_json(r#"{"query":"{ hello unknown other }"}"#),
    )
    .await;
    assert_eq!(reply.status, StatusCode::BAD_REQUEST);
    assert_eq!(reply.json()["errors"].as_array().unwrap().len(), 2);
}

#[test(tokio::test)]
async fn custom_validation_rules_run() {
    let service = service_with(engine(), |mut options| {
        options.validation_rules.push(Arc::new(|_: &Schema, document: &Document| {
            if document.operation(None).is_some_and(|op| op.name.is_none()) {
                vec![graphql::Error::builder().message("operations must be named").build()]
            } else {
                Vec::new()
            }
        }));
        options
    });
    let reply = call(service.clone(), post_json(r#"{"query":"{ hello }"}"#)).await;
    assert_eq!(reply.status, StatusCode::BAD_REQUEST);
    assert_eq!(
        reply.json(),
        json!({"errors": [{"message": "operations must be named"}]})
    );

    let reply = call(service, post_json(r#"{"query":"query Named { hello }"}"#)).await;
    assert_eq!(reply.status, StatusCode::OK);
}

#[test(tokio::test)]
async fn invalid_schemas_are_server_errors() {
    let engine = TestEngine::builder()
        .sdl("type Query { hello: Missing }")
        .build()
        .unwrap();
    let reply = call(
        service_with(engine, |options| options),
        post_json(r#"{"query":"{ hello }"}"#),
    )
    .await;
    assert_eq!(reply.status, StatusCode::INTERNAL_SERVER_ERROR);
    assert!(!reply.json()["errors"].as_array().unwrap().is_empty());
}

#[test(tokio::test)]
async fn missing_schema_is_a_server_error() {
    let service = GraphQLHttp::new(engine(), OptionsData::builder().build());
    let reply = call(service, post_json(r#"{"query":"{ hello }"}"#)).await;
    assert_eq!(reply.status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(
        reply.json(),
        json!({"errors": [{"message": "GraphQL middleware options must contain a schema."}]})
    );
}

#[test(tokio::test)]
async fn variables_must_be_valid_json() {
    let reply = call(
        service(),
        get("/graphql?query=%7B%20hello%20%7D&variables=%7Bnope"),
    )
    .await;
    assert_eq!(reply.status, StatusCode::BAD_REQUEST);
    assert_eq!(
        reply.json(),
        json!({"errors": [{"message": "Variables are invalid JSON."}]})
    );
}

#[test(tokio::test)]
async fn body_errors_honor_the_configured_formatter() {
    let service = service_with(engine(), |mut options| {
        let format: FormatErrorFn = Arc::new(|error: &graphql::Error| {
            serde_json_bytes::json!({"message": error.message.to_uppercase()})
        });
        options.format_error_fn = Some(format);
        options.pretty = true;
        options
    });
    let reply = call(service, post_json("{ invalid")).await;
    assert_eq!(reply.status, StatusCode::BAD_REQUEST);
    assert_eq!(
        reply.body,
        "{\n  \"errors\": [\n    {\n      \"message\": \"POST BODY SENT INVALID JSON.\"\n    }\n  ]\n}"
    );
}

#[test(tokio::test)]
async fn unsupported_bodies_are_rejected() {
    let request = Request::post("/graphql")
        .header(CONTENT_TYPE, "application/json; charset=latin1")
        .body(Full::new(Bytes::from_static(br#"{"query":"{ hello }"}"#)))
        .unwrap();
    let reply = call(service(), request).await;
    assert_eq!(reply.status, StatusCode::UNSUPPORTED_MEDIA_TYPE);
    assert_eq!(
        reply.json(),
        json!({"errors": [{"message": "Unsupported charset \"LATIN1\"."}]})
    );

    let request = Request::post("/graphql")
        .header(CONTENT_TYPE, "application/json")
        .header("content-encoding", "compress")
        .body(Full::new(Bytes::from_static(br#"{"query":"{ hello }"}"#)))
        .unwrap();
    let reply = call(service(), request).await;
    assert_eq!(reply.status, StatusCode::UNSUPPORTED_MEDIA_TYPE);
    assert_eq!(
        reply.json(),
        json!({"errors": [{"message": "Unsupported content-encoding \"compress\"."}]})
    );
}

#[test(tokio::test)]
async fn large_bodies_are_rejected() {
    let service = service().with_configuration(
        Configuration::builder()
            .max_body_size(ByteSize::b(16))
            .build(),
    );
    let reply = call(service, post_json(r#"{"query":"{ hello test }"}"#)).await;
    assert_eq!(reply.status, StatusCode::PAYLOAD_TOO_LARGE);
    assert_eq!(
        reply.json(),
        json!({"errors": [{"message": "Invalid body: request entity too large."}]})
    );
}

#[test(tokio::test)]
async fn highly_compressed_bodies_are_rejected() {
    // 16 MiB of whitespace shrinks to a few KiB, well under the declared length limit.
    let mut encoder = GzipEncoder::new(Vec::new());
    encoder.write_all(br#"{"query":"{ hello }""#).await.unwrap();
    let padding = vec![b' '; 1024 * 1024];
    for _ in 0..16 {
        encoder.write_all(&padding).await.unwrap();
    }
    encoder.write_all(b"}").await.unwrap();
    encoder.shutdown().await.unwrap();
    let compressed = encoder.into_inner();
    assert!(compressed.len() < 100 * 1024);

    let request = Request::post("/graphql")
        .header(CONTENT_TYPE, "application/json")
        .header("content-encoding", "gzip")
        .body(Full::new(Bytes::from(compressed)))
        .unwrap();
    let reply = call(service(), request).await;
    assert_eq!(reply.status, StatusCode::PAYLOAD_TOO_LARGE);
    assert_eq!(
        reply.json(),
        json!({"errors": [{"message": "Invalid body: request entity too large."}]})
    );
}

#[test(tokio::test)]
async fn graphql_and_form_bodies() {
    let request = Request::post("/graphql")
        .header(CONTENT_TYPE, "application/graphql")
        .body(Full::new(Bytes::from_static(b"{ hello }")))
        .unwrap();
    let reply = call(service(), request).await;
    assert_eq!(reply.body, r#"{"data":{"hello":"world"}}"#);

    let request = Request::post("/graphql")
        .header(CONTENT_TYPE, "application/x-www-form-urlencoded")
        .body(Full::new(Bytes::from_static(
            b"query=query+A+%7B+hello+%7D+query+B+%7B+test+%7D&operationName=B",
        )))
        .unwrap();
    let reply = call(service(), request).await;
    assert_eq!(reply.body, r#"{"data":{"test":"tested"}}"#);
}

#[test(tokio::test)]
async fn extensions_are_added_to_the_result() {
    let service = service_with(engine(), |mut options| {
        options.extensions_fn = Some(extensions_fn(|info| async move {
            let mut extensions = Object::new();
            extensions.insert(
                "operationName",
                info.operation_name
                    .map(|name| serde_json_bytes::Value::String(name.into()))
                    .unwrap_or(serde_json_bytes::Value::Null),
            );
            extensions.insert("hasData", (!info.result.has_null_data()).into());
            Ok::<_, BoxError>(Some(extensions))
        }));
        options
    });
    let reply = call(
        service,
        post_json(r#"{"query":"query Hi { hello }","operationName":"Hi"}"#),
    )
    .await;
    assert_eq!(
        reply.json(),
        json!({
            "data": {"hello": "world"},
            "extensions": {"operationName": "Hi", "hasData": true}
        })
    );
}

#[test(tokio::test)]
async fn failing_extensions_are_server_errors() {
    let service = service_with(engine(), |mut options| {
        options.extensions_fn = Some(extensions_fn(|_info| async {
            Err::<Option<Object>, BoxError>("no extensions today".into())
        }));
        options
    });
    let reply = call(service, post_json(r#"{"query":"{ hello }"}"#)).await;
    assert_eq!(reply.status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(
        reply.json(),
        json!({"errors": [{"message": "no extensions today"}]})
    );
}

struct HeaderSettingFactory {
    schema: Schema,
}

#[async_trait]
impl OptionsFactory for HeaderSettingFactory {
    async fn resolve(
        &self,
        request: &Parts,
        response_headers: &mut HeaderMap,
        params: &RequestParams,
    ) -> Result<Option<OptionsData>, BoxError> {
        response_headers.insert("x-operation", HeaderValue::from_static("seen"));
        let pretty = request.headers.contains_key("x-pretty") && params.query.is_some();
        Ok(Some(
            OptionsData::builder()
                .schema(self.schema.clone())
                .pretty(pretty)
                .build(),
        ))
    }
}

#[test(tokio::test)]
async fn option_factories_run_per_request() {
    let engine = engine();
    let schema = engine.schema();
    let service = GraphQLHttp::new(engine, Options::factory(HeaderSettingFactory { schema }));
    let request = Request::post("/graphql")
        .header(CONTENT_TYPE, "application/json")
        .header("x-pretty", "1")
        .body(Full::new(Bytes::from_static(br#"{"query":"{ hello }"}"#)))
        .unwrap();
    let reply = call(service, request).await;
    assert_eq!(reply.headers.get("x-operation").unwrap(), "seen");
    assert_eq!(
        reply.body,
        "{\n  \"data\": {\n    \"hello\": \"world\"\n  }\n}"
    );
}

#[test(tokio::test)]
async fn cached_documents_skip_parsing() {
    let parses = Arc::new(AtomicUsize::new(0));
    let counter = parses.clone();
    let cache = Arc::new(InMemoryDocumentCache::new(NonZeroUsize::new(8).unwrap()));
    let shared = cache.clone();
    let service = service_with(engine(), move |mut options| {
        let parse: ParseFn = Arc::new(move |source: &str| {
            counter.fetch_add(1, Ordering::SeqCst);
            Document::parse(source)
        });
        options.parse_fn = Some(parse);
        options.document_cache = Some(shared);
        options
    });

    for _ in 0..3 {
        let reply = call(service.clone(), post_json(r#"{"query":"{ hello }"}"#)).await;
        assert_eq!(reply.body, r#"{"data":{"hello":"world"}}"#);
    }
    assert_eq!(parses.load(Ordering::SeqCst), 1);
    assert_eq!(cache.len(), 1);
}

#[test(tokio::test)]
async fn cached_documents_are_bound_to_their_schema() {
    let cache = Arc::new(InMemoryDocumentCache::new(NonZeroUsize::new(8).unwrap()));
    let first = service_with(engine(), {
        let cache = cache.clone();
        move |mut options| {
            options.document_cache = Some(cache);
            options
        }
    });
    let other_engine = TestEngine::builder()
        .sdl("type Query { hello: String, extra: Int }")
        .field("hello", "world")
        .build()
        .unwrap();
    let second = service_with(other_engine, move |mut options| {
        options.document_cache = Some(cache);
        options
    });

    let reply = call(first, post_json(r#"{"query":"{ hello }"}"#)).await;
    assert_eq!(reply.status, StatusCode::OK);
    let reply = call(second, post_json(r#"{"query":"{ hello }"}"#)).await;
    assert_eq!(reply.status, StatusCode::INTERNAL_SERVER_ERROR);
    assert!(
        reply.json()["errors"][0]["message"]
            .as_str()
            .unwrap()
            .starts_with("cached document was validated against schema")
    );
}

/// Resolves the same cache for every request, adding a rule once `strict_after` requests were seen.
struct TighteningFactory {
    schema: Schema,
    cache: Arc<InMemoryDocumentCache>,
    seen: AtomicUsize,
    strict_after: usize,
}

#[async_trait]
impl OptionsFactory for TighteningFactory {
    async fn resolve(
        &self,
        _request: &Parts,
        _response_headers: &mut HeaderMap,
        _params: &RequestParams,
    ) -> Result<Option<OptionsData>, BoxError> {
        let mut options = OptionsData::builder().schema(self.schema.clone()).build();
        options.document_cache = Some(self.cache.clone());
        if self.seen.fetch_add(1, Ordering::SeqCst) >= self.strict_after {
            options.validation_rules.push(Arc::new(|_: &Schema, _: &Document| {
                vec![graphql::Error::builder().message("hello is disabled").build()]
            }));
        }
        Ok(Some(options))
    }
}

#[test(tokio::test)]
async fn cached_documents_are_validated_with_each_request_rules() {
    let engine = engine();
    let cache = Arc::new(InMemoryDocumentCache::new(NonZeroUsize::new(8).unwrap()));
    let factory = TighteningFactory {
        schema: engine.schema(),
        cache: cache.clone(),
        seen: AtomicUsize::new(0),
        strict_after: 1,
    };
    let service = GraphQLHttp::new(engine, Options::factory(factory));

    let reply = call(service.clone(), post_json(r#"{"query":"{ hello }"}"#)).await;
    assert_eq!(reply.status, StatusCode::OK);
    assert_eq!(cache.len(), 1);

    let reply = call(service, post_json(r#"{"query":"{ hello }"}"#)).await;
    assert_eq!(reply.status, StatusCode::BAD_REQUEST);
    assert_eq!(
        reply.json(),
        json!({"errors": [{"message": "hello is disabled"}]})
    );
}

#[test(tokio::test)]
async fn context_defaults_to_the_request() {
    let service = service_with(engine(), |mut options| {
        options.execute_fn = Some(execute_fn(|args: ExecutionArgs| {
            let path = args
                .context_value
                .downcast_ref::<Parts>()
                .map(|parts| parts.uri.path().to_string())
                .unwrap_or_default();
            async move {
                let response = graphql::Response::builder()
                    .data(serde_json_bytes::json!({ "hello": path }))
                    .build();
                Ok::<_, BoxError>(ExecutionResult::from(response))
            }
        }));
        options
    });
    let reply = call(service, post_json(r#"{"query":"{ hello }"}"#)).await;
    assert_eq!(reply.body, r#"{"data":{"hello":"/graphql"}}"#);
}

#[test(tokio::test)]
async fn preparsed_bodies_are_used() {
    let mut request = Request::post("/graphql")
        .header(CONTENT_TYPE, "application/json")
        .body(Full::default())
        .unwrap();
    request
        .extensions_mut()
        .insert(graphql_http::ParsedBody(serde_json_bytes::json!({"query": "{ test }"})));
    let reply = call(service(), request).await;
    assert_eq!(reply.body, r#"{"data":{"test":"tested"}}"#);
}
