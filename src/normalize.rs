//! Normalization of raw strategy candidates into canonical rows.
//!
//! Dates are parsed with explicit format matchers into a plain
//! `(year, month, day)` triple; chrono is used only to validate calendar
//! legality. No locale- or timezone-aware constructor ever touches the date
//! path, so a statement date can never shift by a day.

use std::sync::OnceLock;

use chrono::NaiveDate;
use regex::Regex;
use rust_decimal::Decimal;

use crate::models::{NormalizedTransaction, RawTransaction, SignedType};

struct DateMatchers {
    ymd: Regex,
    mdy_full: Regex,
    mdy_short: Regex,
    day_month_year: Regex,
    month_day_year: Regex,
    month_day: Regex,
    day_month: Regex,
    month_day_only: Regex,
}

fn matchers() -> &'static DateMatchers {
    static MATCHERS: OnceLock<DateMatchers> = OnceLock::new();
    MATCHERS.get_or_init(|| DateMatchers {
        ymd: Regex::new(r"^(\d{4})-(\d{1,2})-(\d{1,2})$").expect("valid regex"),
        mdy_full: Regex::new(r"^(\d{1,2})[/-](\d{1,2})[/-](\d{4})$").expect("valid regex"),
        mdy_short: Regex::new(r"^(\d{1,2})[/-](\d{1,2})[/-](\d{2})$").expect("valid regex"),
        day_month_year: Regex::new(r"^(\d{1,2})\s+([A-Za-z]{3,9})\.?,?\s+(\d{4})$")
            .expect("valid regex"),
        month_day_year: Regex::new(r"^([A-Za-z]{3,9})\.?\s+(\d{1,2}),?\s+(\d{4})$")
            .expect("valid regex"),
        month_day: Regex::new(r"^(\d{1,2})[/-](\d{1,2})$").expect("valid regex"),
        day_month: Regex::new(r"^(\d{1,2})\s+([A-Za-z]{3,9})$").expect("valid regex"),
        month_day_only: Regex::new(r"^([A-Za-z]{3,9})\.?\s+(\d{1,2})$").expect("valid regex"),
    })
}

fn month_number(name: &str) -> Option<u32> {
    const MONTHS: [&str; 12] = [
        "jan", "feb", "mar", "apr", "may", "jun", "jul", "aug", "sep", "oct", "nov", "dec",
    ];
    let lower = name.to_lowercase();
    MONTHS
        .iter()
        .position(|m| lower.starts_with(m))
        .map(|i| i as u32 + 1)
}

fn is_valid(year: i32, month: u32, day: u32) -> bool {
    NaiveDate::from_ymd_opt(year, month, day).is_some()
}

/// Resolve an ambiguous numeric pair as month/day, swapping when only the
/// day-first reading is a legal date.
fn resolve_month_day(a: u32, b: u32, year: i32) -> Option<(u32, u32)> {
    if is_valid(year, a, b) {
        Some((a, b))
    } else if is_valid(year, b, a) {
        Some((b, a))
    } else {
        None
    }
}

/// Parse a free-form statement date into a `(year, month, day)` triple.
///
/// Year-less forms take `fallback_year` (the statement period's end year,
/// or the current year when no period was detected).
pub fn parse_statement_date(raw: &str, fallback_year: i32) -> Option<(i32, u32, u32)> {
    let m = matchers();
    let s = raw.trim().trim_end_matches([':', ';']);

    if let Some(c) = m.ymd.captures(s) {
        let (y, mo, d) = (c[1].parse().ok()?, c[2].parse().ok()?, c[3].parse().ok()?);
        return is_valid(y, mo, d).then_some((y, mo, d));
    }
    if let Some(c) = m.mdy_full.captures(s) {
        let (a, b, y): (u32, u32, i32) =
            (c[1].parse().ok()?, c[2].parse().ok()?, c[3].parse().ok()?);
        let (mo, d) = resolve_month_day(a, b, y)?;
        return Some((y, mo, d));
    }
    if let Some(c) = m.mdy_short.captures(s) {
        let (a, b, yy): (u32, u32, i32) =
            (c[1].parse().ok()?, c[2].parse().ok()?, c[3].parse().ok()?);
        let y = 2000 + yy;
        let (mo, d) = resolve_month_day(a, b, y)?;
        return Some((y, mo, d));
    }
    if let Some(c) = m.day_month_year.captures(s) {
        let d: u32 = c[1].parse().ok()?;
        let mo = month_number(&c[2])?;
        let y: i32 = c[3].parse().ok()?;
        return is_valid(y, mo, d).then_some((y, mo, d));
    }
    if let Some(c) = m.month_day_year.captures(s) {
        let mo = month_number(&c[1])?;
        let d: u32 = c[2].parse().ok()?;
        let y: i32 = c[3].parse().ok()?;
        return is_valid(y, mo, d).then_some((y, mo, d));
    }
    if let Some(c) = m.month_day.captures(s) {
        let (a, b): (u32, u32) = (c[1].parse().ok()?, c[2].parse().ok()?);
        let (mo, d) = resolve_month_day(a, b, fallback_year)?;
        return Some((fallback_year, mo, d));
    }
    if let Some(c) = m.day_month.captures(s) {
        let d: u32 = c[1].parse().ok()?;
        let mo = month_number(&c[2])?;
        return is_valid(fallback_year, mo, d).then_some((fallback_year, mo, d));
    }
    if let Some(c) = m.month_day_only.captures(s) {
        let mo = month_number(&c[1])?;
        let d: u32 = c[2].parse().ok()?;
        return is_valid(fallback_year, mo, d).then_some((fallback_year, mo, d));
    }
    None
}

/// Format a parsed triple as strict `YYYY-MM-DD`.
pub fn to_iso_date(raw: &str, fallback_year: i32) -> Option<String> {
    parse_statement_date(raw, fallback_year)
        .map(|(y, m, d)| format!("{:04}-{:02}-{:02}", y, m, d))
}

/// Resolve a signed amount into mutually exclusive debit/credit fields.
///
/// Zero or missing amounts leave both `None`. Unknown sign folds by the
/// amount's own sign as a last resort: negative means debit.
fn resolve_sign(signed: SignedType, amount: Option<Decimal>) -> (Option<Decimal>, Option<Decimal>) {
    let amount = match amount {
        Some(a) if !a.is_zero() => a,
        _ => return (None, None),
    };
    match signed {
        SignedType::Debit => (Some(amount.abs()), None),
        SignedType::Credit => (None, Some(amount.abs())),
        SignedType::Unknown => {
            if amount.is_sign_negative() {
                (Some(amount.abs()), None)
            } else {
                (None, Some(amount))
            }
        }
    }
}

/// Normalize raw candidates, assigning sequence indices by extraction order.
pub fn normalize_transactions(
    raw: &[RawTransaction],
    fallback_year: i32,
) -> Vec<NormalizedTransaction> {
    raw.iter()
        .enumerate()
        .map(|(index, tx)| {
            let (debit, credit) = resolve_sign(tx.signed_type, tx.amount);
            NormalizedTransaction {
                sequence_index: index,
                iso_date: tx
                    .date
                    .as_deref()
                    .and_then(|d| to_iso_date(d, fallback_year)),
                description: tx.description.clone(),
                debit,
                credit,
                balance: tx.running_balance,
                confidence_percent: (tx.confidence.clamp(0.0, 1.0) * 100.0).round() as u8,
                excluded: false,
                source_page: tx.source.map(|s| s.page),
                source_bbox: tx.source.and_then(|s| s.bbox),
            }
        })
        .collect()
}
