//! Two-stage subtitle language detection (spec.md §4.4, §9, Glossary).
//!
//! Stage 1: substring match against a keyword table for 17 languages.
//! Stage 2: regex over a trailing `.xx[._-]` ISO 639-1 code.
//! Falls back to `"unknown"`. The detector is advisory; known false
//! positives (e.g. "th" inside an unrelated word) are accepted.

use regex::Regex;
use std::sync::OnceLock;

/// 3-letter codes this system recognizes (Glossary).
pub const SUPPORTED_LANGUAGES: [&str; 17] = [
    "eng", "hin", "tam", "tel", "kan", "mal", "mar", "ben", "spa", "fra", "deu", "por", "rus",
    "jpn", "zho", "ara", "tha",
];

/// Keyword substrings checked in order, each mapped to its 3-letter code.
/// Order does not need to match the original implementation's
/// case-by-case table (spec.md §9), only the two-stage precedence.
const KEYWORD_TABLE: &[(&str, &str)] = &[
    ("english", "eng"),
    ("hindi", "hin"),
    ("tamil", "tam"),
    ("telugu", "tel"),
    ("kannada", "kan"),
    ("malayalam", "mal"),
    ("marathi", "mar"),
    ("bengali", "ben"),
    ("spanish", "spa"),
    ("espanol", "spa"),
    ("french", "fra"),
    ("francais", "fra"),
    ("german", "deu"),
    ("deutsch", "deu"),
    ("portuguese", "por"),
    ("russian", "rus"),
    ("japanese", "jpn"),
    ("chinese", "zho"),
    ("mandarin", "zho"),
    ("arabic", "ara"),
    ("thai", "tha"),
];

/// 2-letter ISO 639-1 → 3-letter code, for the stage-2 regex fallback.
const ISO_639_1_TABLE: &[(&str, &str)] = &[
    ("en", "eng"),
    ("hi", "hin"),
    ("ta", "tam"),
    ("te", "tel"),
    ("kn", "kan"),
    ("ml", "mal"),
    ("mr", "mar"),
    ("bn", "ben"),
    ("es", "spa"),
    ("fr", "fra"),
    ("de", "deu"),
    ("pt", "por"),
    ("ru", "rus"),
    ("ja", "jpn"),
    ("zh", "zho"),
    ("ar", "ara"),
    ("th", "tha"),
];

fn iso_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?i)\.(en|hi|ta|te|kn|ml|mr|bn|es|fr|de|pt|ru|ja|zh|ar|th)[._-]").unwrap()
    })
}

/// Detects a subtitle's language from its filename. Returns a 3-letter
/// code from [`SUPPORTED_LANGUAGES`] or `"unknown"`.
pub fn detect_language(filename: &str) -> String {
    let lower = filename.to_lowercase();

    for (keyword, code) in KEYWORD_TABLE {
        if lower.contains(keyword) {
            return code.to_string();
        }
    }

    if let Some(caps) = iso_regex().captures(&lower) {
        let iso = caps.get(1).unwrap().as_str();
        if let Some((_, code)) = ISO_639_1_TABLE.iter().find(|(k, _)| *k == iso) {
            return code.to_string();
        }
    }

    "unknown".to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn matches_keyword_substring() {
        assert_eq!(detect_language("Movie.English.srt"), "eng");
        assert_eq!(detect_language("movie_thai_subs.vtt"), "tha");
    }

    #[test]
    fn falls_back_to_iso_regex() {
        assert_eq!(detect_language("movie.fr.srt"), "fra");
        assert_eq!(detect_language("movie.pt-BR.srt"), "por");
        assert_eq!(detect_language("movie.ja_jp.ass"), "jpn");
    }

    #[test]
    fn unknown_when_neither_matches() {
        assert_eq!(detect_language("subtitle_track_01.srt"), "unknown");
    }

    #[test]
    fn keyword_stage_wins_over_regex_stage() {
        // contains both the "english" keyword and an unrelated ".es" run;
        // stage 1 must take precedence per the two-stage order.
        assert_eq!(detect_language("movie.english.extras.srt"), "eng");
    }

    #[test]
    fn all_supported_codes_reachable_via_iso() {
        for (iso, code) in ISO_639_1_TABLE {
            let name = format!("movie.{iso}.srt");
            assert_eq!(detect_language(&name), *code, "iso={iso}");
        }
    }
}
