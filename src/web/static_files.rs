use std::path::{Path, PathBuf};

use axum::{
    extract::State,
    response::{Html, IntoResponse, Response},
    routing::get,
    Router,
};
use tower_http::services::ServeDir;
use tracing::debug;

/// Router serving the landing page at `/` and assets under `/static`
pub fn static_file_router<S>(static_dir: &Path) -> Router<S>
where
    S: Clone + Send + Sync + 'static,
{
    let index = Router::new()
        .route("/", get(index_handler))
        .with_state(static_dir.to_path_buf());

    Router::new()
        .merge(index)
        .nest_service("/static", ServeDir::new(static_dir))
}

/// Serve `index.html` from the static directory
async fn index_handler(State(dir): State<PathBuf>) -> Response {
    let path = dir.join("index.html");
    match tokio::fs::read_to_string(&path).await {
        Ok(html) => Html(html).into_response(),
        Err(e) => {
            debug!("No landing page at {}: {}", path.display(), e);
            Html(placeholder_html()).into_response()
        }
    }
}

/// Placeholder page shown when no frontend is installed
fn placeholder_html() -> &'static str {
    r#"<!DOCTYPE html>
<html lang="en">
<head>
    <meta charset="UTF-8">
    <meta name="viewport" content="width=device-width, initial-scale=1.0">
    <title>gesture-rtc</title>
    <style>
        body { font-family: system-ui, sans-serif; display: flex; justify-content: center;
               align-items: center; height: 100vh; margin: 0; background: #1a1a2e; color: #eee; }
        .container { text-align: center; }
        code { background: #16213e; padding: 2px 6px; border-radius: 4px; }
    </style>
</head>
<body>
    <div class="container">
        <h1>gesture-rtc</h1>
        <p>The server is running, but no frontend was found.</p>
        <p>Place an <code>index.html</code> in the static directory (<code>--static-dir</code>).</p>
        <p>Signaling: <code>POST /offer</code>, <code>POST /stop</code></p>
    </div>
</body>
</html>"#
}
