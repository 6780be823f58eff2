use pulldown_cmark::{CodeBlockKind, Event, HeadingLevel, Options, Parser, Tag, TagEnd};

/// Escape sequences used to style rendered markdown. Empty strings disable
/// styling entirely.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TextStyle {
    pub bold: &'static str,
    pub italic: &'static str,
    pub code: &'static str,
    pub heading: &'static str,
    pub link: &'static str,
    pub dim: &'static str,
    pub reset: &'static str,
}

impl TextStyle {
    pub const PLAIN: TextStyle = TextStyle {
        bold: "",
        italic: "",
        code: "",
        heading: "",
        link: "",
        dim: "",
        reset: "",
    };
}

fn options() -> Options {
    Options::ENABLE_STRIKETHROUGH | Options::ENABLE_TABLES
}

/// Reduce markdown to text suitable for a speech engine: code blocks become
/// the words "code block", inline markup and link targets disappear, and
/// block boundaries become sentence breaks.
pub fn speech_text(input: &str) -> String {
    let mut out = String::new();
    let mut in_code_block = false;

    for event in Parser::new_ext(input, options()) {
        match event {
            Event::Start(Tag::CodeBlock(_)) => {
                in_code_block = true;
                push_spaced(&mut out, "code block");
            }
            Event::End(TagEnd::CodeBlock) => {
                in_code_block = false;
                end_sentence(&mut out);
            }
            Event::Text(text) if !in_code_block => out.push_str(&text),
            Event::Code(code) => push_spaced(&mut out, &code),
            Event::SoftBreak | Event::HardBreak => out.push(' '),
            Event::End(TagEnd::Paragraph | TagEnd::Heading(_) | TagEnd::Item) => {
                end_sentence(&mut out);
            }
            _ => {}
        }
    }

    collapse_whitespace(&out)
}

fn push_spaced(out: &mut String, text: &str) {
    if !out.is_empty() && !out.ends_with(' ') {
        out.push(' ');
    }
    out.push_str(text);
    out.push(' ');
}

fn end_sentence(out: &mut String) {
    let trimmed = out.trim_end();
    if trimmed.is_empty() {
        return;
    }
    let ends_sentence = trimmed.ends_with(['.', '!', '?', ':', ';']);
    let len = trimmed.len();
    out.truncate(len);
    if !ends_sentence {
        out.push('.');
    }
    out.push(' ');
}

fn collapse_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

struct ListState {
    ordered: bool,
    next: u64,
}

/// Render markdown as terminal text. Structure is kept (lists, quotes, code
/// blocks); inline emphasis is expressed through `style`.
pub fn render_terminal(input: &str, style: &TextStyle) -> String {
    let mut out = String::new();
    let mut lists: Vec<ListState> = Vec::new();
    let mut quote_depth = 0usize;
    let mut in_code_block = false;
    let mut link_url: Option<String> = None;

    let prefix = |quote_depth: usize, lists: &[ListState]| -> String {
        let mut p = "│ ".repeat(quote_depth);
        p.push_str(&"  ".repeat(lists.len().saturating_sub(1)));
        p
    };

    for event in Parser::new_ext(input, options()) {
        match event {
            Event::Start(tag) => match tag {
                Tag::Paragraph => {
                    if !out.is_empty() && !out.ends_with("\n\n") && lists.is_empty() {
                        out.push('\n');
                    }
                    if lists.is_empty() {
                        out.push_str(&prefix(quote_depth, &lists));
                    }
                }
                Tag::Heading { level, .. } => {
                    if !out.is_empty() && !out.ends_with("\n\n") {
                        out.push('\n');
                    }
                    out.push_str(&prefix(quote_depth, &lists));
                    out.push_str(style.heading);
                    if level == HeadingLevel::H1 {
                        out.push_str(style.bold);
                    }
                }
                Tag::BlockQuote(_) => quote_depth += 1,
                Tag::CodeBlock(kind) => {
                    in_code_block = true;
                    if !out.is_empty() && !out.ends_with('\n') {
                        out.push('\n');
                    }
                    if let CodeBlockKind::Fenced(lang) = kind {
                        if !lang.is_empty() {
                            out.push_str(&format!("    {}[{}]{}\n", style.dim, lang, style.reset));
                        }
                    }
                }
                Tag::List(start) => {
                    if !out.is_empty() && !out.ends_with('\n') {
                        out.push('\n');
                    }
                    lists.push(ListState {
                        ordered: start.is_some(),
                        next: start.unwrap_or(1),
                    });
                }
                Tag::Item => {
                    out.push_str(&prefix(quote_depth, &lists));
                    if let Some(list) = lists.last_mut() {
                        if list.ordered {
                            out.push_str(&format!("{}. ", list.next));
                            list.next += 1;
                        } else {
                            out.push_str("• ");
                        }
                    }
                }
                Tag::Emphasis => out.push_str(style.italic),
                Tag::Strong => out.push_str(style.bold),
                Tag::Link { dest_url, .. } => {
                    out.push_str(style.link);
                    link_url = Some(dest_url.to_string());
                }
                _ => {}
            },
            Event::End(tag) => match tag {
                TagEnd::Paragraph => {
                    out.push('\n');
                    if lists.is_empty() {
                        out.push('\n');
                    }
                }
                TagEnd::Heading(_) => {
                    out.push_str(style.reset);
                    out.push_str("\n\n");
                }
                TagEnd::BlockQuote(_) => quote_depth = quote_depth.saturating_sub(1),
                TagEnd::CodeBlock => {
                    in_code_block = false;
                    out.push('\n');
                }
                TagEnd::List(_) => {
                    lists.pop();
                    if lists.is_empty() {
                        out.push('\n');
                    }
                }
                TagEnd::Item => {
                    if !out.ends_with('\n') {
                        out.push('\n');
                    }
                }
                TagEnd::Emphasis | TagEnd::Strong => out.push_str(style.reset),
                TagEnd::Link => {
                    out.push_str(style.reset);
                    if let Some(url) = link_url.take() {
                        out.push_str(&format!(" ({})", url));
                    }
                }
                _ => {}
            },
            Event::Text(text) => {
                if in_code_block {
                    for line in text.lines() {
                        out.push_str("    ");
                        out.push_str(style.code);
                        out.push_str(line);
                        out.push_str(style.reset);
                        out.push('\n');
                    }
                } else {
                    out.push_str(&text);
                }
            }
            Event::Code(code) => {
                out.push_str(style.code);
                out.push_str(&code);
                out.push_str(style.reset);
            }
            Event::SoftBreak => out.push(' '),
            Event::HardBreak => {
                out.push('\n');
                out.push_str(&prefix(quote_depth, &lists));
            }
            Event::Rule => out.push_str("────────────────────\n\n"),
            _ => {}
        }
    }

    out.trim_end().to_string()
}
