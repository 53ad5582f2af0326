use axum::response::Html;

fn escape_html(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#x27;"),
            c => out.push(c),
        }
    }
    out
}

/// The upload form, with `messages` listed above it.
pub fn upload_page(messages: &[String]) -> Html<String> {
    let flashes = if messages.is_empty() {
        String::new()
    } else {
        let items: String = messages
            .iter()
            .map(|m| format!("      <li>{}</li>\n", escape_html(m)))
            .collect();
        format!("    <ul class=\"flashes\">\n{items}    </ul>\n")
    };

    Html(format!(
        r#"<!doctype html>
<html lang="en">
  <head>
    <meta charset="utf-8">
    <title>Stem Splitter</title>
  </head>
  <body>
    <h1>Upload an audio file</h1>
{flashes}    <form method="post" enctype="multipart/form-data">
      <input type="file" name="file" accept=".mp3,.wav">
      <input type="submit" value="Separate">
    </form>
  </body>
</html>
"#
    ))
}
