use axum::{
    extract::State,
    response::Html,
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::cors::CorsLayer;

use crate::analyst::{Analyst, AnswerError};

#[derive(Deserialize)]
pub struct AskRequest {
    pub question: String,
}

#[derive(Serialize)]
pub struct AskResponse {
    pub answer: String,
}

pub struct AppState {
    pub analyst: Analyst,
}

pub fn app(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/", get(index))
        .route("/ask", post(ask))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

async fn index() -> Html<&'static str> {
    Html(FORM_PAGE)
}

/// Sole caller of the answer function. Renders both outcomes as plain text
/// in the response body; a failed answer is a normal 200 with the error
/// message, so the form never sees a raised error.
async fn ask(
    State(state): State<Arc<AppState>>,
    Json(request): Json<AskRequest>,
) -> Json<AskResponse> {
    let answer = match state.analyst.answer(&request.question).await {
        Ok(answer) => answer.render(),
        Err(err) => render_error(&err),
    };
    Json(AskResponse { answer })
}

fn render_error(err: &AnswerError) -> String {
    tracing::error!("Error while answering: {}", err);
    format!("Sorry, there was an error processing your request. {err}")
}

const FORM_PAGE: &str = r#"<!DOCTYPE html>
<html>
<head>
<meta charset="utf-8">
<title>Document Analyst</title>
<style>
  body { font-family: sans-serif; max-width: 48rem; margin: 2rem auto; padding: 0 1rem; }
  textarea { width: 100%; box-sizing: border-box; }
  pre { white-space: pre-wrap; background: #f4f4f4; padding: 1rem; }
</style>
</head>
<body>
<h1>Document Analyst</h1>
<p>Ask a question about the indexed document.</p>
<textarea id="question" rows="2" placeholder="Ask a question about IBM's 2024 Annual Report..."></textarea>
<p><button id="submit">Ask</button></p>
<pre id="answer"></pre>
<script>
document.getElementById('submit').addEventListener('click', async () => {
  const question = document.getElementById('question').value;
  const out = document.getElementById('answer');
  out.textContent = 'Thinking...';
  try {
    const res = await fetch('/ask', {
      method: 'POST',
      headers: { 'Content-Type': 'application/json' },
      body: JSON.stringify({ question }),
    });
    const body = await res.json();
    out.textContent = body.answer;
  } catch (e) {
    out.textContent = 'Request failed: ' + e;
  }
});
</script>
</body>
</html>
"#;
