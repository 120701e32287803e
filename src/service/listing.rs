use std::fmt::Write as _;
use std::fs;
use std::io;
use std::path::Path;

use super::route::ARCHIVE_SUFFIX;

/// Render an HTML listing of `dir`, reachable at `/<url_path>`.
///
/// Archives are linked twice: as a browsable directory and as a download.
pub fn render(dir: &Path, url_path: &str, expose_hidden_files: bool) -> io::Result<String> {
    let mut names = Vec::new();
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let name = entry.file_name().to_string_lossy().into_owned();
        if !expose_hidden_files && name.starts_with('.') {
            continue;
        }
        names.push((name, entry.file_type()?.is_dir()));
    }
    names.sort();

    let base = url_path.trim_matches('/');
    let prefix = if base.is_empty() {
        "/".to_string()
    } else {
        format!("/{base}/")
    };

    let mut html = String::new();
    let _ = write!(
        html,
        "<html><body><h1>Index of /{}</h1><ul>",
        escape(base)
    );

    for (name, is_dir) in &names {
        let href = format!("{prefix}{name}");
        if *is_dir {
            let _ = write!(
                html,
                "<li><a href=\"{}/\">{}/</a></li>",
                escape(&href),
                escape(name)
            );
        } else if let Some(stem) = name.strip_suffix(ARCHIVE_SUFFIX) {
            let _ = write!(
                html,
                "<li><a href=\"{}{}/\">{}</a> (<a href=\"{}\">download</a>)</li>",
                escape(&prefix),
                escape(stem),
                escape(name),
                escape(&href)
            );
        } else {
            let _ = write!(
                html,
                "<li><a href=\"{}\">{}</a></li>",
                escape(&href),
                escape(name)
            );
        }
    }

    html.push_str("</ul></body></html>");
    Ok(html)
}

fn escape(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}
