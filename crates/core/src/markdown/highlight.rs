//! Code block highlighting with syntect. Output uses CSS classes so the
//! reading surface's theme decides the colors.

use std::sync::OnceLock;

use syntect::html::{ClassStyle, ClassedHTMLGenerator};
use syntect::parsing::{SyntaxReference, SyntaxSet};
use syntect::util::LinesWithEndings;

use crate::encoding::escape_html;

fn syntax_set() -> &'static SyntaxSet {
    static SYNTAXES: OnceLock<SyntaxSet> = OnceLock::new();
    SYNTAXES.get_or_init(SyntaxSet::load_defaults_newlines)
}

/// Render one fenced or indented code block as `<pre><code>`.
///
/// `lang` is the first word of the fence info string. Without one the syntax
/// is guessed from the first line (shebangs, modelines, `<?xml`). Unknown
/// languages and highlighter errors fall back to escaped plain text.
pub fn highlight_block(code: &str, lang: Option<&str>) -> String {
    let ss = syntax_set();
    let syntax = match lang {
        Some(token) => ss.find_syntax_by_token(token),
        None => code.lines().next().and_then(|first| ss.find_syntax_by_first_line(first)),
    };

    let class = lang
        .map(|l| format!(" class=\"language-{}\"", escape_html(l)))
        .or_else(|| syntax.map(|s| format!(" class=\"language-{}\"", language_token(s))))
        .unwrap_or_default();

    let body = match syntax.filter(|s| s.name != "Plain Text") {
        Some(syntax) => match highlight_lines(code, syntax, ss) {
            Ok(html) => html,
            Err(e) => {
                tracing::warn!("Highlighting failed for {} block: {}", syntax.name, e);
                escape_html(code)
            }
        },
        None => escape_html(code),
    };

    format!("<pre><code{class}>{body}</code></pre>\n")
}

fn highlight_lines(
    code: &str,
    syntax: &SyntaxReference,
    ss: &SyntaxSet,
) -> Result<String, syntect::Error> {
    let mut generator = ClassedHTMLGenerator::new_with_class_style(syntax, ss, ClassStyle::Spaced);
    for line in LinesWithEndings::from(code) {
        generator.parse_html_for_line_which_includes_newline(line)?;
    }
    Ok(generator.finalize())
}

fn language_token(syntax: &SyntaxReference) -> String {
    syntax
        .file_extensions
        .first()
        .cloned()
        .unwrap_or_else(|| syntax.name.to_lowercase().replace(' ', "-"))
}
