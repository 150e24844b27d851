//! Contains a collection of useful utility functions.

use std::fs::read;
use std::path::Path;

use strsim::normalized_damerau_levenshtein;

use crate::error::{Error, Result};

/// Create a static deser object from given path using serde.
///
/// Format is picked based on the file extension.
pub(crate) fn deser_struct_from_path<T>(file_path: &Path) -> Result<T>
where
    for<'de> T: serde::Deserialize<'de>,
{
    let bytes = read(file_path)?;
    let ext = file_path
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or("");
    let d: T = match ext {
        "toml" => toml::from_slice(&bytes)?,
        #[cfg(feature = "yaml")]
        "yaml" | "yml" => serde_yaml::from_slice(&bytes)?,
        _ => {
            return Err(Error::UnsupportedConfigFormat(
                file_path.to_string_lossy().to_string(),
            ))
        }
    };
    Ok(d)
}

/// Get a similar name based on string similarity.
pub(crate) fn get_similar<'a>(original: &str, candidates: &[&'a str]) -> Option<&'a str> {
    let mut highest_sim = 0f64;
    let mut best = None;
    for candidate in candidates {
        let sim = normalized_damerau_levenshtein(candidate, original);
        if sim > highest_sim {
            highest_sim = sim;
            best = Some(*candidate);
        }
    }
    if highest_sim > 0.4f64 {
        best
    } else {
        None
    }
}

#[test]
fn similar_name_suggestion() {
    let names = ["seed", "rate", "algorithm"];
    assert_eq!(get_similar("sed", &names), Some("seed"));
    assert_eq!(get_similar("algoritm", &names), Some("algorithm"));
    assert_eq!(get_similar("xyzzy", &names), None);
}
