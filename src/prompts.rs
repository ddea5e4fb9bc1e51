//! System prompts for VLM-based text recognition.
//!
//! Callers can override the default via [`crate::config::OcrConfig::system_prompt`];
//! the constant here is used only when no override is provided.

/// Default system prompt for transcribing the text of an image.
pub const DEFAULT_OCR_PROMPT: &str = r#"You are a precise OCR engine. Transcribe every piece of text visible in the image.

Rules:

1. Reproduce the text exactly as printed, including punctuation, numbers and capitalisation.
2. Keep the reading order a human would follow. Separate paragraphs with a blank line.
3. Keep line breaks inside addresses, tables and lists.
4. Do not translate, summarise, correct or explain anything.
5. If the image contains no text, output nothing.
6. Output ONLY the transcribed text. No markdown fences, no commentary."#;

/// Human-readable name for an ISO 639-2 language code, as used in the prompt.
pub fn language_name(code: &str) -> &str {
    match code.trim().to_ascii_lowercase().as_str() {
        "eng" => "English",
        "fra" | "fre" => "French",
        "deu" | "ger" => "German",
        "spa" => "Spanish",
        "ita" => "Italian",
        "por" => "Portuguese",
        "nld" | "dut" => "Dutch",
        "rus" => "Russian",
        "jpn" => "Japanese",
        "chi_sim" | "zho" | "chi" => "Chinese",
        "kor" => "Korean",
        "ara" => "Arabic",
        "hin" => "Hindi",
        _ => code,
    }
}

/// Per-request hint naming the expected language of the text.
pub fn language_hint(code: &str) -> String {
    format!(
        "The text is expected to be in {}. Other scripts may appear; transcribe them as they are.",
        language_name(code)
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_codes_are_named() {
        assert_eq!(language_name("eng"), "English");
        assert_eq!(language_name("FRA"), "French");
        assert_eq!(language_name("tlh"), "tlh");
    }

    #[test]
    fn hint_mentions_language() {
        assert!(language_hint("deu").contains("German"));
    }

    #[test]
    fn default_prompt_forbids_fences() {
        assert!(DEFAULT_OCR_PROMPT.contains("No markdown fences"));
    }
}
