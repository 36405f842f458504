use crate::server::AppState;
use axum::extract::State;
use axum::response::Html;

/// Handle the landing page.
pub async fn home(State(state): State<AppState>) -> Html<String> {
    Html(format!(
        r#"<html>
<head><title>SQL Exporter</title></head>
<body>
<h1>SQL Exporter</h1>
<p><a href="{}">Metrics</a></p>
<p><a href="/config">Configuration</a></p>
<p><a href="/healthz">Health</a></p>
</body>
</html>
"#,
        state.metrics_path
    ))
}
