//! Signature normalization for titles and locations.
//!
//! Every function here is pure and total: malformed or empty input produces
//! empty components, never an error.

use serde::Serialize;

/// Separator between the three signature components.
pub const SIGNATURE_SEPARATOR: char = '|';

/// Canonical token that all "remote" location variants fold into.
pub const REMOTE: &str = "remote";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NormalizationDetails {
    pub original_title: String,
    pub normalized_title: String,
    pub original_location: String,
    pub normalized_location: String,
}

pub fn normalize(title: &str, location: &str) -> (String, String) {
    (normalize_title(title), normalize_location(location))
}

pub fn signature(company_id: &str, title: &str, location: &str) -> String {
    let (title, location) = normalize(title, location);
    format!("{company_id}{SIGNATURE_SEPARATOR}{title}{SIGNATURE_SEPARATOR}{location}")
}

pub fn normalization_details(title: &str, location: &str) -> NormalizationDetails {
    let (normalized_title, normalized_location) = normalize(title, location);
    NormalizationDetails {
        original_title: title.to_string(),
        normalized_title,
        original_location: location.to_string(),
        normalized_location,
    }
}

/// Lowercase, split on punctuation and expand title abbreviations in one pass.
///
/// Expansions are never re-expanded, so dictionary order cannot change the
/// outcome.
pub fn normalize_title(title: &str) -> String {
    let mut words = Vec::new();
    for token in tokenize(title) {
        match expand_title_abbreviation(&token) {
            Some(expanded) => words.push(expanded.to_string()),
            None => words.push(token),
        }
    }
    words.join(" ")
}

/// Lowercase, fold remote variants, expand city shorthands and US states.
///
/// Comma/semicolon segments matter here: a two-letter token is read as a state
/// only when it ends a segment ("Austin TX", "Portland, OR"), which keeps
/// words like "in" or "or" intact inside free text.
pub fn normalize_location(location: &str) -> String {
    let segments: Vec<Vec<String>> = location
        .split([',', ';'])
        .map(tokenize)
        .filter(|tokens| !tokens.is_empty())
        .collect();

    if is_remote_variant(&segments) {
        return REMOTE.to_string();
    }

    let mut words = Vec::new();
    for (segment_index, tokens) in segments.iter().enumerate() {
        let last = tokens.len() - 1;
        for (i, token) in tokens.iter().enumerate() {
            let ends_segment = i == last;
            let expanded = if ends_segment && segment_index > 0 {
                state_name(token).or_else(|| city_alias(token))
            } else if ends_segment {
                city_alias(token).or_else(|| state_name(token))
            } else {
                city_alias(token)
            };
            words.push(expanded.map(str::to_string).unwrap_or_else(|| token.clone()));
        }
    }
    words.join(" ")
}

fn tokenize(input: &str) -> Vec<String> {
    input
        .to_lowercase()
        .chars()
        .map(|c| if c.is_alphanumeric() || c == '+' || c == '#' { c } else { ' ' })
        .collect::<String>()
        .split_whitespace()
        .map(str::to_string)
        .collect()
}

fn is_remote_variant(segments: &[Vec<String>]) -> bool {
    let tokens: Vec<&str> = segments.iter().flatten().map(String::as_str).collect();
    if tokens.is_empty() {
        return false;
    }
    let joined = tokens.join(" ");
    let has_marker =
        tokens.iter().any(|t| *t == "remote" || *t == "wfh") || joined.contains("work from home");
    has_marker && tokens.iter().all(|t| is_remote_filler(t))
}

fn is_remote_filler(token: &str) -> bool {
    matches!(
        token,
        "remote"
            | "wfh"
            | "work"
            | "from"
            | "home"
            | "fully"
            | "100"
            | "only"
            | "anywhere"
            | "us"
            | "usa"
            | "u"
            | "s"
            | "united"
            | "states"
            | "north"
            | "america"
    )
}

fn expand_title_abbreviation(token: &str) -> Option<&'static str> {
    let expanded = match token {
        "sr" | "snr" => "senior",
        "jr" => "junior",
        "mgr" => "manager",
        "mgmt" => "management",
        "eng" | "engr" => "engineer",
        "swe" => "software engineer",
        "sw" => "software",
        "dev" => "developer",
        "devops" => "development operations",
        "sre" => "site reliability engineer",
        "ml" => "machine learning",
        "qa" => "quality assurance",
        "ui" => "user interface",
        "ux" => "user experience",
        "vp" => "vice president",
        "svp" => "senior vice president",
        "evp" => "executive vice president",
        "cto" => "chief technology officer",
        "ceo" => "chief executive officer",
        "cfo" => "chief financial officer",
        "coo" => "chief operating officer",
        "assoc" => "associate",
        "asst" => "assistant",
        "dir" => "director",
        "admin" => "administrator",
        "coord" => "coordinator",
        "acct" => "account",
        "dept" => "department",
        "ops" => "operations",
        "spec" => "specialist",
        _ => return None,
    };
    Some(expanded)
}

fn city_alias(token: &str) -> Option<&'static str> {
    let expanded = match token {
        "sf" => "san francisco",
        "nyc" => "new york city",
        "la" => "los angeles",
        "dc" => "district of columbia",
        _ => return None,
    };
    Some(expanded)
}

fn state_name(token: &str) -> Option<&'static str> {
    let name = match token {
        "al" => "alabama",
        "ak" => "alaska",
        "az" => "arizona",
        "ar" => "arkansas",
        "ca" => "california",
        "co" => "colorado",
        "ct" => "connecticut",
        "de" => "delaware",
        "dc" => "district of columbia",
        "fl" => "florida",
        "ga" => "georgia",
        "hi" => "hawaii",
        "id" => "idaho",
        "il" => "illinois",
        "in" => "indiana",
        "ia" => "iowa",
        "ks" => "kansas",
        "ky" => "kentucky",
        "la" => "louisiana",
        "me" => "maine",
        "md" => "maryland",
        "ma" => "massachusetts",
        "mi" => "michigan",
        "mn" => "minnesota",
        "ms" => "mississippi",
        "mo" => "missouri",
        "mt" => "montana",
        "ne" => "nebraska",
        "nv" => "nevada",
        "nh" => "new hampshire",
        "nj" => "new jersey",
        "nm" => "new mexico",
        "ny" => "new york",
        "nc" => "north carolina",
        "nd" => "north dakota",
        "oh" => "ohio",
        "ok" => "oklahoma",
        "or" => "oregon",
        "pa" => "pennsylvania",
        "ri" => "rhode island",
        "sc" => "south carolina",
        "sd" => "south dakota",
        "tn" => "tennessee",
        "tx" => "texas",
        "ut" => "utah",
        "vt" => "vermont",
        "va" => "virginia",
        "wa" => "washington",
        "wv" => "west virginia",
        "wi" => "wisconsin",
        "wy" => "wyoming",
        _ => return None,
    };
    Some(name)
}
