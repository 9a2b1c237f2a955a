use crate::error::{Result, VideoToolError};

/// (ISO 639-1 code, English name, ISO 639-2/B code used for container metadata)
const LANGUAGES: &[(&str, &str, &str)] = &[
    ("en", "English", "eng"),
    ("my", "Burmese", "bur"),
    ("th", "Thai", "tha"),
    ("ja", "Japanese", "jpn"),
    ("ko", "Korean", "kor"),
    ("zh", "Chinese", "chi"),
    ("fr", "French", "fre"),
    ("de", "German", "ger"),
    ("es", "Spanish", "spa"),
    ("ru", "Russian", "rus"),
    ("it", "Italian", "ita"),
    ("pt", "Portuguese", "por"),
    ("pl", "Polish", "pol"),
    ("nl", "Dutch", "dut"),
    ("tr", "Turkish", "tur"),
    ("ar", "Arabic", "ara"),
    ("hi", "Hindi", "hin"),
    ("vi", "Vietnamese", "vie"),
    ("id", "Indonesian", "ind"),
    ("ms", "Malay", "may"),
    ("km", "Khmer", "khm"),
    ("lo", "Lao", "lao"),
    ("sv", "Swedish", "swe"),
    ("da", "Danish", "dan"),
    ("no", "Norwegian", "nor"),
    ("fi", "Finnish", "fin"),
    ("he", "Hebrew", "heb"),
    ("uk", "Ukrainian", "ukr"),
    ("cs", "Czech", "cze"),
    ("hu", "Hungarian", "hun"),
    ("bn", "Bengali", "ben"),
    ("ta", "Tamil", "tam"),
];

fn lookup(code: &str) -> Option<&'static (&'static str, &'static str, &'static str)> {
    let code = code.trim().to_lowercase();
    LANGUAGES.iter().find(|(c, _, _)| *c == code)
}

/// Normalize and validate a language code.
pub fn validate(code: &str) -> Result<String> {
    lookup(code)
        .map(|(c, _, _)| c.to_string())
        .ok_or_else(|| VideoToolError::Config(format!("Unsupported language code '{}'", code)))
}

/// Full language name for prompts; falls back to the code itself.
pub fn display_name(code: &str) -> String {
    lookup(code)
        .map(|(_, name, _)| name.to_string())
        .unwrap_or_else(|| code.to_string())
}

/// Three-letter tag for subtitle stream metadata.
pub fn iso639_2(code: &str) -> String {
    lookup(code)
        .map(|(_, _, tag)| tag.to_string())
        .unwrap_or_else(|| "und".to_string())
}

/// Validate target codes, dropping duplicates while keeping first-seen order.
pub fn unique_targets<I, S>(codes: I) -> Result<Vec<String>>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut targets: Vec<String> = Vec::new();
    for code in codes {
        let code = validate(code.as_ref())?;
        if !targets.contains(&code) {
            targets.push(code);
        }
    }
    Ok(targets)
}
