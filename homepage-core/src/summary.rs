//! Turns feed-supplied HTML snippets into short plain-text summaries.

/// Shown when a source supplies no usable summary text.
pub const EMPTY_SUMMARY_PLACEHOLDER: &str = "Click to read the full article...";
pub const UNTITLED_PLACEHOLDER: &str = "untitled";
pub const MISSING_LINK_PLACEHOLDER: &str = "#";

const ELLIPSIS: &str = "...";
const LOW_INFO_MAX_CHARS: usize = 8;

/// Strips markup, collapses whitespace and caps the result at `max_chars`
/// characters followed by an ellipsis.
pub fn clean_summary(raw: &str, max_chars: usize) -> String {
    let text = decode_entities(&strip_tags(raw));
    let collapsed = text.split_whitespace().collect::<Vec<_>>().join(" ");

    if collapsed.is_empty() {
        return EMPTY_SUMMARY_PLACEHOLDER.to_owned();
    }

    match collapsed.char_indices().nth(max_chars) {
        Some((cut, _)) => format!("{}{ELLIPSIS}", &collapsed[..cut]),
        None => collapsed,
    }
}

/// True for summaries too short to say anything beyond "Comments".
pub fn is_low_information(summary: &str) -> bool {
    summary.chars().count() <= LOW_INFO_MAX_CHARS
}

/// Final summary text; `low_info_placeholder` is set for sources whose
/// summaries are routinely empty of content.
pub fn summarize(raw: Option<&str>, max_chars: usize, low_info_placeholder: Option<&str>) -> String {
    let summary = clean_summary(raw.unwrap_or_default(), max_chars);
    match low_info_placeholder {
        Some(placeholder)
            if summary == EMPTY_SUMMARY_PLACEHOLDER || is_low_information(&summary) =>
        {
            placeholder.to_owned()
        }
        _ => summary,
    }
}

pub fn non_blank_or(value: Option<&str>, placeholder: &str) -> String {
    value
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .unwrap_or(placeholder)
        .to_owned()
}

fn strip_tags(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    let mut rest = input;
    // Same shape as `<[^<]+?>`: a tag ends at the first `>`, and a stray `<`
    // restarts the match.
    while let Some(open) = rest.find('<') {
        out.push_str(&rest[..open]);
        let after = &rest[open + 1..];
        match tag_end(after) {
            Some(close) => rest = &after[close + 1..],
            None => {
                out.push('<');
                rest = after;
            }
        }
    }
    out.push_str(rest);
    out
}

fn tag_end(after_open: &str) -> Option<usize> {
    for (idx, ch) in after_open.char_indices() {
        match ch {
            '<' => return None,
            '>' if idx > 0 => return Some(idx),
            _ => {}
        }
    }
    None
}

fn decode_entities(input: &str) -> String {
    if !input.contains('&') {
        return input.to_owned();
    }
    input
        .replace("&nbsp;", " ")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&apos;", "'")
        .replace("&amp;", "&")
}
