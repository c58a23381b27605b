//! Textual filter specifications.
//!
//! A spec is `id,p1,p2,...` where `id` is a number or a known filter name
//! and each parameter is a number with an optional type suffix:
//!
//! | suffix | meaning |
//! |--------|---------|
//! | none, `i` | signed 32-bit |
//! | `b`, `s` | signed 8/16-bit, sign-extended |
//! | `u`, `ub`, `us`, `ui` | unsigned |
//! | `f` | `f32` bit pattern |
//! | `d` | `f64` bit pattern, two words |
//! | `l`, `ll` / `ul`, `ull` | 64-bit signed / unsigned, two words |
//!
//! Eight-byte values occupy two parameter words, low word first.

use serde::Serialize;

use crate::error::{Error, Result};

/// A parsed filter spec.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FilterSpec {
    pub id: u32,
    pub params: Vec<u32>,
}

const KNOWN_FILTERS: &[(&str, u32)] = &[
    ("deflate", 1),
    ("shuffle", 2),
    ("fletcher32", 3),
    ("szip", 4),
    ("nbit", 5),
    ("scaleoffset", 6),
    ("bzip2", 307),
    ("blosc", 32001),
    ("zstd", 32015),
];

/// Id of a filter known by name.
pub fn filter_id_by_name(name: &str) -> Option<u32> {
    KNOWN_FILTERS
        .iter()
        .find(|(n, _)| n.eq_ignore_ascii_case(name))
        .map(|(_, id)| *id)
}

/// Name of a filter known by id.
pub fn filter_name(id: u32) -> Option<&'static str> {
    KNOWN_FILTERS.iter().find(|(_, i)| *i == id).map(|(n, _)| *n)
}

fn syntax(spec: &str, what: &str) -> Error {
    Error::FilterSpecSyntax(format!("{what} in {spec:?}"))
}

/// Parse one `id,params...` spec.
pub fn parse_filter_spec(spec: &str) -> Result<FilterSpec> {
    let mut parts = spec.split(',').map(str::trim);
    let id_part = parts.next().filter(|s| !s.is_empty()).ok_or_else(|| syntax(spec, "missing filter id"))?;
    let id = match id_part.parse::<u32>() {
        Ok(id) => id,
        Err(_) => filter_id_by_name(id_part).ok_or_else(|| syntax(spec, "unknown filter name"))?,
    };
    let mut params = Vec::new();
    for p in parts {
        parse_param(spec, p, &mut params)?;
    }
    Ok(FilterSpec { id, params })
}

/// Parse a `|`-separated list of specs.
pub fn parse_filter_spec_list(list: &str) -> Result<Vec<FilterSpec>> {
    list.split('|')
        .filter(|s| !s.trim().is_empty())
        .map(parse_filter_spec)
        .collect()
}

fn push_u64(out: &mut Vec<u32>, v: u64) {
    out.push(v as u32);
    out.push((v >> 32) as u32);
}

fn parse_param(spec: &str, p: &str, out: &mut Vec<u32>) -> Result<()> {
    if p.is_empty() {
        return Err(syntax(spec, "empty parameter"));
    }
    let split = p
        .rfind(|c: char| c.is_ascii_digit() || c == '.')
        .map(|i| i + 1)
        .ok_or_else(|| syntax(spec, "parameter without digits"))?;
    let (num, suffix) = p.split_at(split);
    let suffix = suffix.to_ascii_lowercase();
    let bad = || syntax(spec, &format!("bad parameter {p:?}"));

    match suffix.as_str() {
        "f" => {
            let v: f32 = num.parse().map_err(|_| bad())?;
            out.push(v.to_bits());
        }
        "d" => {
            let v: f64 = num.parse().map_err(|_| bad())?;
            push_u64(out, v.to_bits());
        }
        "l" | "ll" => {
            let v: i64 = num.parse().map_err(|_| bad())?;
            push_u64(out, v as u64);
        }
        "ul" | "ull" => {
            let v: u64 = num.parse().map_err(|_| bad())?;
            push_u64(out, v);
        }
        "b" => {
            let v: i8 = num.parse().map_err(|_| bad())?;
            out.push(v as i32 as u32);
        }
        "s" => {
            let v: i16 = num.parse().map_err(|_| bad())?;
            out.push(v as i32 as u32);
        }
        "" | "i" => {
            if num.contains('.') || num.contains(['e', 'E']) {
                return Err(bad());
            }
            let v: i64 = num.parse().map_err(|_| bad())?;
            // Values up to u32::MAX are accepted as their bit pattern.
            if v < i32::MIN as i64 || v > u32::MAX as i64 {
                return Err(bad());
            }
            out.push(v as u32);
        }
        "ub" => {
            let v: u8 = num.parse().map_err(|_| bad())?;
            out.push(v as u32);
        }
        "us" => {
            let v: u16 = num.parse().map_err(|_| bad())?;
            out.push(v as u32);
        }
        "u" | "ui" => {
            let v: u32 = num.parse().map_err(|_| bad())?;
            out.push(v);
        }
        _ => return Err(bad()),
    }
    Ok(())
}
