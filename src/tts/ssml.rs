//! SSML request documents

/// Build the SSML document sent to the synthesis endpoint
///
/// Text, voice and language are XML-escaped.
#[must_use]
pub fn build_ssml(text: &str, voice_id: &str, language: &str) -> String {
    format!(
        "<speak version='1.0' xml:lang='{lang}'><voice xml:lang='{lang}' name='{voice}'>{text}</voice></speak>",
        lang = escape_xml(language),
        voice = escape_xml(voice_id),
        text = escape_xml(text),
    )
}

/// Escape the five XML special characters
#[must_use]
pub fn escape_xml(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    for c in input.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&apos;"),
            _ => out.push(c),
        }
    }
    out
}
