//! The in-browser GraphQL explorer.

use schemars::JsonSchema;
use serde::Deserialize;
use serde::Serialize;

use crate::json_ext::Object;
use crate::json_ext::Value;

const TEMPLATE: &str = include_str!("../templates/graphiql.html");

/// Whether the explorer is served, either as a flag or with its options.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
#[serde(untagged)]
pub enum ExplorerConfig {
    Enabled(bool),
    Options(ExplorerOptions),
}

impl Default for ExplorerConfig {
    fn default() -> Self {
        ExplorerConfig::Enabled(false)
    }
}

impl ExplorerConfig {
    pub fn is_enabled(&self) -> bool {
        match self {
            ExplorerConfig::Enabled(enabled) => *enabled,
            ExplorerConfig::Options(_) => true,
        }
    }

    pub fn options(&self) -> Option<&ExplorerOptions> {
        match self {
            ExplorerConfig::Enabled(_) => None,
            ExplorerConfig::Options(options) => Some(options),
        }
    }
}

impl From<bool> for ExplorerConfig {
    fn from(enabled: bool) -> Self {
        ExplorerConfig::Enabled(enabled)
    }
}

impl From<ExplorerOptions> for ExplorerConfig {
    fn from(options: ExplorerOptions) -> Self {
        ExplorerConfig::Options(options)
    }
}

/// Explorer options.
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
#[serde(deny_unknown_fields, default, rename_all = "camelCase")]
pub struct ExplorerOptions {
    /// The query shown when there is none in the URL.
    pub default_query: Option<String>,
    /// Show the request headers editor.
    pub header_editor_enabled: Option<bool>,
    /// Keep edited headers in local storage.
    pub should_persist_headers: Option<bool>,
    /// Websocket endpoint used for subscriptions.
    pub subscription_endpoint: Option<String>,
    /// Websocket client used with `subscription_endpoint`; defaults to `v0`.
    pub websocket_client: Option<WebsocketClient>,
}

#[buildstructor::buildstructor]
impl ExplorerOptions {
    #[builder(visibility = "pub")]
    fn new(
        default_query: Option<String>,
        header_editor_enabled: Option<bool>,
        should_persist_headers: Option<bool>,
        subscription_endpoint: Option<String>,
        websocket_client: Option<WebsocketClient>,
    ) -> Self {
        Self {
            default_query,
            header_editor_enabled,
            should_persist_headers,
            subscription_endpoint,
            websocket_client,
        }
    }
}

/// Websocket subscription protocol clients.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum WebsocketClient {
    /// subscriptions-transport-ws
    #[default]
    V0,
    /// graphql-ws
    V1,
}

/// The request and, once executed, the result shown in the explorer.
#[derive(Clone, Copy, Debug, Default)]
pub struct ExplorerData<'a> {
    pub query: Option<&'a str>,
    pub variables: Option<&'a Object>,
    pub operation_name: Option<&'a str>,
    pub result: Option<&'a Value>,
}

/// Renders the explorer page.
pub fn render_explorer(data: &ExplorerData<'_>, options: Option<&ExplorerOptions>) -> String {
    let variables = data.variables.and_then(|variables| serde_json::to_string_pretty(variables).ok());
    let result = data.result.and_then(|result| serde_json::to_string_pretty(result).ok());
    let options = options.cloned().unwrap_or_default();

    let (subscription_scripts, subscription_fetcher) = match &options.subscription_endpoint {
        Some(endpoint) => subscription_support(
            &safe_serialize(Some(endpoint)),
            options.websocket_client.unwrap_or_default(),
        ),
        None => (String::new(), String::from("var fetcher = graphQLFetcher;")),
    };

    TEMPLATE
        .replace("{{SUBSCRIPTION_SCRIPTS}}", &subscription_scripts)
        .replace("{{SUBSCRIPTION_FETCHER}}", &subscription_fetcher)
        .replace("{{QUERY}}", &safe_serialize(data.query))
        .replace("{{RESPONSE}}", &safe_serialize(result.as_ref()))
        .replace("{{VARIABLES}}", &safe_serialize(variables.as_ref()))
        .replace("{{OPERATION_NAME}}", &safe_serialize(data.operation_name))
        .replace(
            "{{DEFAULT_QUERY}}",
            &safe_serialize(options.default_query.as_ref()),
        )
        .replace(
            "{{HEADER_EDITOR_ENABLED}}",
            &safe_serialize(options.header_editor_enabled.as_ref()),
        )
        .replace(
            "{{SHOULD_PERSIST_HEADERS}}",
            &safe_serialize(options.should_persist_headers.as_ref()),
        )
}

fn subscription_support(endpoint: &str, client: WebsocketClient) -> (String, String) {
    match client {
        WebsocketClient::V0 => (
            String::from(
                r#"<script src="https://unpkg.com/subscriptions-transport-ws@0.9.18/browser/client.js"></script>
  <script src="https://unpkg.com/graphiql-subscriptions-fetcher@0.0.2/browser/client.js"></script>"#,
            ),
            format!(
                r#"var subscriptionsClient = new window.SubscriptionsTransportWs.SubscriptionClient(
      {endpoint},
      {{ reconnect: true }}
    );
    var fetcher = window.GraphiQLSubscriptionsFetcher.graphQLFetcher(
      subscriptionsClient,
      graphQLFetcher
    );"#
            ),
        ),
        WebsocketClient::V1 => (
            String::from(
                r#"<script src="https://unpkg.com/graphql-ws@4.1.5/umd/graphql-ws.min.js"></script>"#,
            ),
            format!(
                r#"var wsClient = window.graphqlWs.createClient({{ url: {endpoint}, lazy: true }});
    var fetcher = function (graphQLParams, opts) {{
      if (/^\s*subscription\b/.test(graphQLParams.query || '')) {{
        return {{
          subscribe: function (sink) {{
            return {{ unsubscribe: wsClient.subscribe(graphQLParams, sink) }};
          }}
        }};
      }}
      return graphQLFetcher(graphQLParams, opts);
    }};"#
            ),
        ),
    }
}

/// JSON encodes a value for a `<script>` block, `undefined` when absent.
fn safe_serialize<T: Serialize + ?Sized>(value: Option<&T>) -> String {
    let Some(json) = value.and_then(|value| serde_json::to_string(value).ok()) else {
        return String::from("undefined");
    };
    let mut escaped = String::with_capacity(json.len());
    for c in json.chars() {
        match c {
            '<' => escaped.push_str("\\u003c"),
            '>' => escaped.push_str("\\u003e"),
            '&' => escaped.push_str("\\u0026"),
            '\'' => escaped.push_str("\\u0027"),
            '\u{2028}' => escaped.push_str("\\u2028"),
            '\u{2029}' => escaped.push_str("\\u2029"),
            c => escaped.push(c),
        }
    }
    escaped
}
