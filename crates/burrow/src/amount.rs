use crate::errors::WalletError;
use alloy::primitives::U256;

/// A syntactically valid, non-negative decimal string split at the point.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecimalAmount<'a> {
    whole: &'a str,
    frac: &'a str,
}

fn invalid(msg: impl Into<String>) -> eyre::Report {
    WalletError::InvalidAmount(msg.into()).into()
}

/// Accepts `123`, `1.5`, `.5` and `1.`; rejects signs, exponents and separators.
pub fn parse_decimal(s: &str) -> eyre::Result<DecimalAmount<'_>> {
    let s = s.trim();
    let (whole, frac) = s.split_once('.').unwrap_or((s, ""));
    let digits_only = |p: &str| p.bytes().all(|b| b.is_ascii_digit());
    if (whole.is_empty() && frac.is_empty()) || !digits_only(whole) || !digits_only(frac) {
        return Err(invalid(format!("Invalid amount: {s:?}")));
    }
    let amt = DecimalAmount { whole, frac };
    if amt.is_zero() {
        return Err(invalid("Amount must be greater than 0"));
    }
    Ok(amt)
}

impl DecimalAmount<'_> {
    pub fn is_zero(&self) -> bool {
        self.whole.bytes().chain(self.frac.bytes()).all(|b| b == b'0')
    }

    /// Scale to base units. Too many fractional digits or overflow is `InvalidAmount`.
    pub fn to_base_units(&self, decimals: u8) -> eyre::Result<U256> {
        let frac = self.frac.trim_end_matches('0');
        if frac.len() > usize::from(decimals) {
            return Err(invalid(format!(
                "too many decimal places (max {decimals})"
            )));
        }
        let scale = U256::from(10_u8)
            .checked_pow(U256::from(decimals))
            .ok_or_else(|| invalid("decimals too large"))?;

        let parse = |p: &str| -> eyre::Result<U256> {
            if p.is_empty() {
                return Ok(U256::ZERO);
            }
            p.parse::<U256>().map_err(|_e| invalid("amount overflow"))
        };
        let whole = parse(self.whole)?;
        let mut frac_padded = frac.to_owned();
        while frac_padded.len() < usize::from(decimals) {
            frac_padded.push('0');
        }
        let frac_v = parse(&frac_padded)?;

        whole
            .checked_mul(scale)
            .and_then(|x| x.checked_add(frac_v))
            .ok_or_else(|| invalid("amount overflow"))
    }
}

/// Parse a human amount into a strictly positive base-unit value.
pub fn parse_units(s: &str, decimals: u8) -> eyre::Result<U256> {
    let v = parse_decimal(s)?.to_base_units(decimals)?;
    if v.is_zero() {
        return Err(invalid("Amount must be greater than 0"));
    }
    Ok(v)
}

/// Format base units without floats, trimming trailing zeros: 1500000 @ 6 => "1.5".
pub fn format_units(v: U256, decimals: u8) -> String {
    if decimals == 0 {
        return v.to_string();
    }
    let scale = U256::from(10_u8).pow(U256::from(decimals));
    let whole = v / scale;
    let frac = v % scale;
    if frac.is_zero() {
        return whole.to_string();
    }
    let digits = frac.to_string();
    let mut frac_s = format!("{digits:0>width$}", width = usize::from(decimals));
    while frac_s.ends_with('0') {
        frac_s.pop();
    }
    format!("{whole}.{frac_s}")
}
