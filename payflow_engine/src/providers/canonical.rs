//! Canonical parameter strings.
//!
//! Both providers sign the same shape of string: every non-empty parameter except the signature itself, sorted by
//! key in byte order, rendered as `k=v` and joined with `&`. Values are used verbatim, without URL encoding.
use std::collections::BTreeMap;

/// Request or callback parameters, kept sorted by key.
pub type SignedParams = BTreeMap<String, String>;

/// Renders the string-to-sign, skipping the keys in `exclude` and any parameter with an empty value.
pub fn canonical_string(params: &SignedParams, exclude: &[&str]) -> String {
    params
        .iter()
        .filter(|(k, v)| !v.is_empty() && !exclude.contains(&k.as_str()))
        .map(|(k, v)| format!("{k}={v}"))
        .collect::<Vec<String>>()
        .join("&")
}

/// Builds a [`SignedParams`] from string pairs.
pub fn params_from<K: Into<String>, V: Into<String>, I: IntoIterator<Item = (K, V)>>(pairs: I) -> SignedParams {
    pairs.into_iter().map(|(k, v)| (k.into(), v.into())).collect()
}
