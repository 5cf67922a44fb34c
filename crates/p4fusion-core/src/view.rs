use regex::Regex;

use crate::error::CoreError;

/// The depot side of a client workspace view: an ordered list of
/// include/exclude patterns. A path is visible when the last matching line
/// is not an exclusion, mirroring the server's own mapping semantics.
#[derive(Debug)]
pub struct ViewMap {
    rules: Vec<ViewRule>,
}

#[derive(Debug)]
struct ViewRule {
    exclude: bool,
    pattern: Regex,
}

impl ViewMap {
    /// Build from the client spec's view lines
    /// (`"[-+]//depot/pattern //client/pattern"`). Malformed lines are a
    /// configuration error.
    pub fn parse(lines: &[String]) -> Result<ViewMap, CoreError> {
        let mut rules = Vec::with_capacity(lines.len());
        for line in lines {
            let invalid = |reason: &str| CoreError::InvalidViewLine {
                line: line.clone(),
                reason: reason.to_string(),
            };

            let tokens = tokenize(line);
            if tokens.len() != 2 {
                return Err(invalid("expected a depot pattern and a client pattern"));
            }
            let mut depot_side = tokens[0].as_str();
            let mut exclude = false;
            if let Some(rest) = depot_side.strip_prefix('-') {
                exclude = true;
                depot_side = rest;
            } else if let Some(rest) = depot_side.strip_prefix('+') {
                // Overlay mappings include just like plain ones.
                depot_side = rest;
            }
            if !depot_side.starts_with("//") {
                return Err(invalid("depot pattern must start with \"//\""));
            }
            let pattern = wildcard_regex(depot_side).map_err(|reason| invalid(&reason))?;
            rules.push(ViewRule { exclude, pattern });
        }
        Ok(ViewMap { rules })
    }

    /// Is the depot path visible through this view?
    pub fn contains(&self, depot_path: &str) -> bool {
        let mut included = false;
        for rule in &self.rules {
            if rule.pattern.is_match(depot_path) {
                included = !rule.exclude;
            }
        }
        included
    }
}

/// Split a view line into whitespace-separated fields, honoring double
/// quotes around fields containing spaces. A leading `-`/`+` may sit
/// outside the quotes.
fn tokenize(line: &str) -> Vec<String> {
    let mut tokens = Vec::new();
    let mut current = String::new();
    let mut in_quotes = false;
    for ch in line.trim().chars() {
        match ch {
            '"' => in_quotes = !in_quotes,
            c if c.is_whitespace() && !in_quotes => {
                if !current.is_empty() {
                    tokens.push(std::mem::take(&mut current));
                }
            }
            c => current.push(c),
        }
    }
    if !current.is_empty() {
        tokens.push(current);
    }
    tokens
}

/// Translate a depot pattern into an anchored regex: `...` crosses
/// directory boundaries, `*` and the positional `%%n` markers do not.
fn wildcard_regex(pattern: &str) -> Result<Regex, String> {
    let mut regex = String::with_capacity(pattern.len() + 8);
    regex.push('^');
    let mut rest = pattern;
    while !rest.is_empty() {
        if let Some(after) = rest.strip_prefix("...") {
            regex.push_str(".*");
            rest = after;
        } else if rest.starts_with("%%") && rest.len() > 2 {
            if !rest.as_bytes()[2].is_ascii_digit() {
                return Err("'%%' must be followed by a digit".to_string());
            }
            regex.push_str("[^/]*");
            rest = &rest[3..];
        } else if let Some(after) = rest.strip_prefix('*') {
            regex.push_str("[^/]*");
            rest = after;
        } else {
            let mut chars = rest.chars();
            let ch = chars.next().ok_or_else(|| "empty pattern tail".to_string())?;
            let mut buf = [0u8; 4];
            regex.push_str(&regex::escape(ch.encode_utf8(&mut buf)));
            rest = chars.as_str();
        }
    }
    regex.push('$');
    Regex::new(&regex).map_err(|e| e.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn view(lines: &[&str]) -> ViewMap {
        let lines: Vec<String> = lines.iter().map(|s| s.to_string()).collect();
        ViewMap::parse(&lines).unwrap()
    }

    #[test]
    fn includes_mapped_paths() {
        let map = view(&["//depot/... //client/..."]);
        assert!(map.contains("//depot/main/a.txt"));
        assert!(!map.contains("//other/main/a.txt"));
    }

    #[test]
    fn later_exclusions_win() {
        let map = view(&[
            "//depot/... //client/...",
            "-//depot/secret/... //client/secret/...",
        ]);
        assert!(map.contains("//depot/main/a.txt"));
        assert!(!map.contains("//depot/secret/key.pem"));
    }

    #[test]
    fn later_inclusions_rescue_excluded_paths() {
        let map = view(&[
            "//depot/... //client/...",
            "-//depot/gen/... //client/gen/...",
            "+//depot/gen/kept/... //client/gen/kept/...",
        ]);
        assert!(!map.contains("//depot/gen/junk.o"));
        assert!(map.contains("//depot/gen/kept/api.h"));
    }

    #[test]
    fn star_does_not_cross_directories() {
        let map = view(&["//depot/*/docs/... //client/..."]);
        assert!(map.contains("//depot/main/docs/readme.md"));
        assert!(!map.contains("//depot/main/sub/docs/readme.md"));
    }

    #[test]
    fn quoted_lines_with_spaces() {
        let map = view(&["\"//depot/with space/...\" \"//client/with space/...\""]);
        assert!(map.contains("//depot/with space/a.txt"));
    }

    #[test]
    fn malformed_lines_are_fatal() {
        let lines = vec!["//depot/...".to_string()];
        assert!(ViewMap::parse(&lines).is_err());
        let lines = vec!["depot/... //client/...".to_string()];
        assert!(ViewMap::parse(&lines).is_err());
    }
}
