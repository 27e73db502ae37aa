//! Label refinement and file naming for completed jobs.

use once_cell::sync::Lazy;
use regex_lite::Regex;

static HTML_HEADING: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?s)<h1[^>]*>(.*?)</h1>").unwrap());
static MARKDOWN_HEADING: Lazy<Regex> = Lazy::new(|| Regex::new(r"^#[ \t]+([^\r\n]*)").unwrap());
static TAGS: Lazy<Regex> = Lazy::new(|| Regex::new(r"<[^>]+>").unwrap());
static DOC_SUFFIX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\s*[-|｜]\s*((feishu|lark)\s*docs?|飞书云?文档|文档|docs?)$").unwrap()
});
static RESERVED: Lazy<Regex> = Lazy::new(|| Regex::new(r#"[<>:"|?*#%&{}$!@`+=~^]"#).unwrap());
static CONTROL: Lazy<Regex> = Lazy::new(|| Regex::new(r"[\x00-\x1f\x7f]").unwrap());
static WHITESPACE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").unwrap());

const MAX_FILENAME_CHARS: usize = 200;

/// Leading first-level heading of the extracted content.
///
/// Markup output is searched for the first `<h1>`; markdown output must start
/// with a `# ` line.
pub fn leading_heading(content: &str, markup: bool) -> Option<String> {
    let heading = if markup {
        let raw = HTML_HEADING.captures(content)?.get(1)?.as_str();
        TAGS.replace_all(raw, "").to_string()
    } else {
        MARKDOWN_HEADING.captures(content)?.get(1)?.as_str().to_string()
    };
    let heading = heading.trim();
    (!heading.is_empty()).then(|| heading.to_string())
}

/// Strip document-site suffixes such as " - Docs" from a page title.
pub fn normalize_title(title: &str) -> String {
    DOC_SUFFIX.replace(title.trim(), "").trim().to_string()
}

/// Make a title safe to use as a file name.
pub fn sanitize_filename(name: &str) -> String {
    let safe = name.replace(['/', '\\'], "_");
    let safe = RESERVED.replace_all(&safe, "");
    let safe = CONTROL.replace_all(&safe, "");
    let safe = WHITESPACE.replace_all(safe.trim_start_matches('.'), " ");
    let safe = safe.trim();
    if safe.is_empty() {
        return "document".to_string();
    }
    safe.chars().take(MAX_FILENAME_CHARS).collect()
}
