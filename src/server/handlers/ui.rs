use axum::response::Html;

const INDEX_HTML: &str = include_str!("../ui/index.html");

pub async fn index() -> Html<&'static str> {
    Html(INDEX_HTML)
}
