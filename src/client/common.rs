use std::time::Duration;

use reqwest::header::{HeaderMap, RETRY_AFTER};
use reqwest::StatusCode;

use crate::error::TranslateError;
use super::TranslationRequest;

/// Language codes with names that models recognise more reliably than codes.
const LANGUAGE_NAMES: &[(&str, &str)] = &[
    ("ar", "Arabic"), ("bg", "Bulgarian"), ("bn", "Bengali"), ("ca", "Catalan"),
    ("cs", "Czech"), ("da", "Danish"), ("de", "German"), ("el", "Greek"),
    ("en", "English"), ("es", "Spanish"), ("et", "Estonian"), ("eu", "Basque"),
    ("fa", "Persian"), ("fi", "Finnish"), ("fr", "French"), ("ga", "Irish"),
    ("gl", "Galician"), ("he", "Hebrew"), ("hi", "Hindi"), ("hr", "Croatian"),
    ("hu", "Hungarian"), ("hy", "Armenian"), ("id", "Indonesian"), ("is", "Icelandic"),
    ("it", "Italian"), ("ja", "Japanese"), ("ka", "Georgian"), ("kk", "Kazakh"),
    ("km", "Khmer"), ("ko", "Korean"), ("lt", "Lithuanian"), ("lv", "Latvian"),
    ("mk", "Macedonian"), ("ms", "Malay"), ("nl", "Dutch"), ("no", "Norwegian"),
    ("pl", "Polish"), ("pt", "Portuguese"), ("pt_br", "Brazilian Portuguese"),
    ("ro", "Romanian"), ("ru", "Russian"), ("sk", "Slovak"), ("sl", "Slovenian"),
    ("sq", "Albanian"), ("sr", "Serbian"), ("sv", "Swedish"), ("ta", "Tamil"),
    ("th", "Thai"), ("tr", "Turkish"), ("uk", "Ukrainian"), ("ur", "Urdu"),
    ("uz", "Uzbek"), ("vi", "Vietnamese"), ("zh", "Chinese"),
    ("zh_cn", "Simplified Chinese"), ("zh_tw", "Traditional Chinese"),
];

/// Convert a language code to its English name, falling back to the code.
pub fn language_name(code: &str) -> String {
    let normalized = code.trim().to_lowercase().replace('-', "_");
    LANGUAGE_NAMES
        .iter()
        .find(|(c, _)| *c == normalized)
        .map(|(_, name)| name.to_string())
        .unwrap_or_else(|| code.to_string())
}

/// System prompt restricting the model to a bare translation.
pub fn system_prompt(target_language: &str) -> String {
    let name = language_name(target_language);
    format!(
        "You are a translation assistant. Translate the text to {} (language code: {}) with these rules:\n\
         Provide ONLY the translation\n\
         No greetings, no questions, no explanations\n\
         No additional words or sentences before/after translation\n\
         Match the original text's exact formatting, including placeholders such as %s, {{0}} and HTML tags\n\
         No suggestions or alternatives\n\
         No confirmation questions\n\
         No 'Here's the translation' type phrases",
        name, target_language
    )
}

/// User message: the text, plus context marked as not-to-translate.
pub fn user_message(request: &TranslationRequest) -> String {
    match request.context.as_deref().map(str::trim) {
        Some(ctx) if !ctx.is_empty() => format!(
            "[Context for reference - DO NOT translate this part]\n{}\n\n[Text to translate]\n{}",
            ctx, request.source_text
        ),
        _ => request.source_text.clone(),
    }
}

/// Single prompt for completion-style endpoints, asking for a JSON reply.
pub fn completion_prompt(request: &TranslationRequest) -> String {
    let name = language_name(&request.target_language);
    let mut prompt = format!(
        "{}\n\nReturn ONLY the translation in JSON format as {{\"text\":\"your {} translation here\"}}.\n\n",
        system_prompt(&request.target_language),
        name
    );
    prompt.push_str(&user_message(request));
    prompt.push('\n');
    prompt
}

/// Strip the commentary some models wrap around a translation.
pub fn clean_translation_response(response: &str) -> String {
    let trimmed = response.trim();
    let lines: Vec<&str> = trimmed.lines().collect();
    if lines.len() <= 1 {
        return strip_quotes(trimmed).to_string();
    }

    // Only leading and trailing commentary goes; the body keeps its lines.
    let start = lines.iter().position(|l| !is_commentary(l));
    let end = lines.iter().rposition(|l| !is_commentary(l));
    match (start, end) {
        (Some(start), Some(end)) => strip_quotes(&lines[start..=end].join("\n")).to_string(),
        _ => trimmed.to_string(),
    }
}

fn is_commentary(line: &str) -> bool {
    let line = line.trim();
    line.is_empty()
        || line.starts_with("Here is")
        || line.starts_with("Here's")
        || line.starts_with("Translation:")
        || line.starts_with("Option")
        || line.starts_with("Note:")
        || (line.starts_with("**") && line.ends_with("**"))
}

fn strip_quotes(text: &str) -> &str {
    let text = text.trim();
    if text.len() >= 2 && text.starts_with('"') && text.ends_with('"') {
        &text[1..text.len() - 1]
    } else {
        text
    }
}

/// Map an unsuccessful HTTP response onto the error taxonomy.
pub fn classify_status(status: StatusCode, headers: &HeaderMap, body: &str) -> TranslateError {
    let detail = format!("{}: {}", status, truncate(body, 300));
    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => TranslateError::Authentication(detail),
        StatusCode::TOO_MANY_REQUESTS => TranslateError::RateLimited {
            retry_after: parse_retry_after(headers),
        },
        StatusCode::REQUEST_TIMEOUT => TranslateError::Transient(detail),
        StatusCode::BAD_REQUEST
        | StatusCode::NOT_FOUND
        | StatusCode::PAYLOAD_TOO_LARGE
        | StatusCode::UNPROCESSABLE_ENTITY => TranslateError::InvalidRequest(detail),
        s if s.is_server_error() => TranslateError::Transient(detail),
        _ => TranslateError::InvalidRequest(detail),
    }
}

/// Map a transport-level failure (connect, timeout, body read).
pub fn classify_transport(error: &reqwest::Error) -> TranslateError {
    TranslateError::Transient(format!("HTTP request failed: {}", error))
}

/// `Retry-After` in delta-seconds; HTTP-date values are ignored.
pub fn parse_retry_after(headers: &HeaderMap) -> Option<Duration> {
    let value = headers.get(RETRY_AFTER)?.to_str().ok()?.trim();
    let secs: f64 = value.parse().ok()?;
    if secs.is_finite() && secs >= 0.0 {
        Some(Duration::from_millis((secs * 1000.0) as u64))
    } else {
        None
    }
}

fn truncate(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        text.to_string()
    } else {
        let cut: String = text.chars().take(max_chars).collect();
        format!("{}...", cut)
    }
}
