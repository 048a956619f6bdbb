//! Dashboard slug rules (spec §4.13): lowercase `[a-z0-9-]{1,80}`.

pub fn slugify(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    let mut last_dash = false;
    for ch in input.chars() {
        if ch.is_ascii_alphanumeric() {
            out.push(ch.to_ascii_lowercase());
            last_dash = false;
        } else if !last_dash && !out.is_empty() {
            out.push('-');
            last_dash = true;
        }
    }
    while out.ends_with('-') {
        out.pop();
    }
    out.truncate(80);
    if out.is_empty() { "dashboard".to_string() } else { out }
}

/// Appends a numeric suffix if `candidate` collides with an existing name.
pub fn dedupe_slug(candidate: &str, exists: impl Fn(&str) -> bool) -> String {
    if !exists(candidate) {
        return candidate.to_string();
    }
    let mut n = 2;
    loop {
        let next = format!("{}-{}", candidate, n);
        if !exists(&next) {
            return next;
        }
        n += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slugifies_spaces_and_punctuation() {
        assert_eq!(slugify("Total MRR Trend!"), "total-mrr-trend");
    }

    #[test]
    fn dedupes_collisions() {
        let taken = ["a", "a-2"];
        let result = dedupe_slug("a", |s| taken.contains(&s));
        assert_eq!(result, "a-3");
    }
}
