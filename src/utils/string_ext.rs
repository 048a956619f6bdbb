//! String trimming/cleaning helpers used by config env overrides
//! (`config::apply_env_overrides`) and catalog connection interpolation
//! (`catalog::load::interpolate_value`).

pub trait StringExt {
    /// Trims and returns `None` if the result is empty.
    fn clean(&self) -> Option<String>;
}

impl StringExt for str {
    #[inline]
    fn clean(&self) -> Option<String> {
        let trimmed = self.trim();
        if trimmed.is_empty() { None } else { Some(trimmed.to_string()) }
    }
}

impl StringExt for String {
    #[inline]
    fn clean(&self) -> Option<String> {
        self.as_str().clean()
    }
}

impl<T: AsRef<str>> StringExt for Option<T> {
    #[inline]
    fn clean(&self) -> Option<String> {
        self.as_ref().and_then(|s| s.as_ref().clean())
    }
}
