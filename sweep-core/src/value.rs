//! Parameter values and their textual forms.
//!
//! Every value has two textual forms:
//!
//! - the *key form*, used when building job keys and output file names.
//!   It's canonical and collision-free within a single value kind, and it
//!   never contains the key separator or any path separator.
//! - the *raw form*, substituted into simulator arguments as is.

use std::fmt;

use crate::KEY_SEPARATOR;

/// Single discrete value on a parameter axis.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ParamValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
}

/// Kind of a [`ParamValue`]. All values on a single axis share one kind.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum ValueKind {
    Bool,
    Int,
    Float,
    Str,
}

impl fmt::Display for ValueKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ValueKind::Bool => "bool",
            ValueKind::Int => "int",
            ValueKind::Float => "float",
            ValueKind::Str => "string",
        };
        write!(f, "{}", s)
    }
}

impl ParamValue {
    pub fn kind(&self) -> ValueKind {
        match self {
            ParamValue::Bool(_) => ValueKind::Bool,
            ParamValue::Int(_) => ValueKind::Int,
            ParamValue::Float(_) => ValueKind::Float,
            ParamValue::Str(_) => ValueKind::Str,
        }
    }

    /// Floats are the only values that can fail to be finite.
    pub fn is_finite(&self) -> bool {
        match self {
            ParamValue::Float(f) => f.is_finite(),
            _ => true,
        }
    }

    /// Canonical form used for job keys.
    ///
    /// Floats use the shortest representation that round-trips, always
    /// carrying a decimal point or an exponent (`1.0`, `0.1`, `1e-7`).
    /// Strings get every byte outside `[a-z0-9.+-]` percent-encoded, upper
    /// case letters included, so keys stay distinct on case-insensitive
    /// file systems.
    pub fn key_form(&self) -> String {
        match self {
            ParamValue::Bool(b) => b.to_string(),
            ParamValue::Int(i) => i.to_string(),
            ParamValue::Float(f) => format!("{:?}", f),
            ParamValue::Str(s) => percent_encode(s),
        }
    }

    /// Form substituted into simulator arguments.
    pub fn raw_form(&self) -> String {
        match self {
            ParamValue::Float(f) => format!("{:?}", f),
            ParamValue::Str(s) => s.clone(),
            _ => self.key_form(),
        }
    }
}

impl fmt::Display for ParamValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.raw_form())
    }
}

impl From<bool> for ParamValue {
    fn from(b: bool) -> Self {
        ParamValue::Bool(b)
    }
}

impl From<i64> for ParamValue {
    fn from(i: i64) -> Self {
        ParamValue::Int(i)
    }
}

impl From<f64> for ParamValue {
    fn from(f: f64) -> Self {
        ParamValue::Float(f)
    }
}

impl From<&str> for ParamValue {
    fn from(s: &str) -> Self {
        ParamValue::Str(s.to_string())
    }
}

impl From<String> for ParamValue {
    fn from(s: String) -> Self {
        ParamValue::Str(s)
    }
}

fn is_key_safe(b: u8) -> bool {
    b.is_ascii_lowercase() || b.is_ascii_digit() || b == b'.' || b == b'+' || b == b'-'
}

fn percent_encode(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for b in s.bytes() {
        if is_key_safe(b) {
            out.push(b as char);
        } else {
            out.push_str(&format!("%{:02X}", b));
        }
    }
    debug_assert!(!out.contains(KEY_SEPARATOR));
    out
}

#[test]
fn float_key_form_is_canonical() {
    assert_eq!(ParamValue::Float(0.1).key_form(), "0.1");
    assert_eq!(ParamValue::Float(1.0).key_form(), "1.0");
    assert_eq!(ParamValue::Float(1e-7).key_form(), "1e-7");
    assert_ne!(
        ParamValue::Float(0.0).key_form(),
        ParamValue::Float(-0.0).key_form()
    );
    // same value written differently in the config ends up with the same key
    assert_eq!(
        ParamValue::Float("0.10".parse().unwrap()).key_form(),
        ParamValue::Float(0.1).key_form()
    );
}

#[test]
fn string_key_form_escapes_separators() {
    let value = ParamValue::from("gillespie_classical/v2");
    assert_eq!(value.key_form(), "gillespie%5Fclassical%2Fv2");
    assert_eq!(value.raw_form(), "gillespie_classical/v2");
    // the escape character itself is escaped, so encoding stays injective
    assert_ne!(
        ParamValue::from("%5F").key_form(),
        ParamValue::from("_").key_form()
    );
    assert_eq!(ParamValue::from("").key_form(), "");
}

#[test]
fn string_key_form_ignores_file_system_case_folding() {
    let upper = ParamValue::from("A").key_form();
    let lower = ParamValue::from("a").key_form();
    assert_eq!(upper, "%41");
    assert_eq!(lower, "a");
    assert_ne!(upper.to_ascii_lowercase(), lower.to_ascii_lowercase());
    assert_ne!(
        ParamValue::from("Classical").key_form().to_ascii_lowercase(),
        ParamValue::from("classical").key_form().to_ascii_lowercase()
    );
}

#[test]
fn untagged_deser_picks_narrowest_kind() {
    #[derive(Deserialize)]
    struct Values {
        ints: Vec<ParamValue>,
        floats: Vec<ParamValue>,
        strs: Vec<ParamValue>,
        bools: Vec<ParamValue>,
    }
    let values: Values = toml::from_str(
        "ints = [1, 2]\nfloats = [0.5, 1.0]\nstrs = [\"a\"]\nbools = [true]",
    )
    .unwrap();
    assert!(values.ints.iter().all(|v| v.kind() == ValueKind::Int));
    assert!(values.floats.iter().all(|v| v.kind() == ValueKind::Float));
    assert_eq!(values.strs[0].kind(), ValueKind::Str);
    assert_eq!(values.bools[0].kind(), ValueKind::Bool);
}
