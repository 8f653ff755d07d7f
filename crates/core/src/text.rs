pub const COMBINED_TEXT_SEPARATOR: &str = "\n";

pub fn normalize_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Trims every OCR line, drops blank ones and joins the rest with single spaces.
pub fn clean_ocr_text(raw: &str) -> String {
    raw.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
}

/// The unit that gets embedded. Empty or missing parts contribute nothing,
/// so two empty sources give an empty string.
pub fn combine_texts(extracted_text: Option<&str>, visual_description: Option<&str>) -> String {
    [extracted_text, visual_description]
        .into_iter()
        .flatten()
        .map(str::trim)
        .filter(|part| !part.is_empty())
        .collect::<Vec<_>>()
        .join(COMBINED_TEXT_SEPARATOR)
}

/// First `max_chars` characters, with an ellipsis when something was cut.
pub fn preview(text: &str, max_chars: usize) -> String {
    let mut chars = text.chars();
    let head: String = chars.by_ref().take(max_chars).collect();
    if chars.next().is_some() {
        format!("{head}...")
    } else {
        head
    }
}
