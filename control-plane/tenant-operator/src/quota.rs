use k8s_openapi::apimachinery::pkg::api::resource::Quantity;

use crate::crd::ResourceQuota;

#[derive(thiserror::Error, Debug, PartialEq, Eq)]
pub enum QuantityError {
    #[error("invalid quantity {0:?}")]
    Invalid(String),
    #[error("quota sum out of range")]
    Overflow,
}

/// Upper bounds applied to aggregated tenant quotas. Zero disables a cap.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct QuotaCaps {
    pub cpu: u32,
    pub memory_giga: u32,
    pub instances: u32,
}

const KI: u128 = 1024;

// Multiplier to milli-units as a (numerator, denominator) pair.
fn suffix_scale(suffix: &str) -> Option<(u128, u128)> {
    let s = match suffix {
        "n" => (1, 1_000_000),
        "u" => (1, 1_000),
        "m" => (1, 1),
        "" => (1_000, 1),
        "k" => (1_000 * 1_000, 1),
        "M" => (1_000 * 1_000_000, 1),
        "G" => (1_000 * 1_000_000_000, 1),
        "T" => (1_000 * 1_000_000_000_000, 1),
        "P" => (1_000 * 1_000_000_000_000_000, 1),
        "E" => (1_000 * 1_000_000_000_000_000_000, 1),
        "Ki" => (1_000 * KI, 1),
        "Mi" => (1_000 * KI.pow(2), 1),
        "Gi" => (1_000 * KI.pow(3), 1),
        "Ti" => (1_000 * KI.pow(4), 1),
        "Pi" => (1_000 * KI.pow(5), 1),
        "Ei" => (1_000 * KI.pow(6), 1),
        _ => return None,
    };
    Some(s)
}

// Decimal exponent form such as `1e3` or `5E-1`.
fn exponent_scale(suffix: &str) -> Option<(u128, u128)> {
    let exp: i32 = suffix.strip_prefix(['e', 'E'])?.parse().ok()?;
    let shifted = exp.checked_add(3)?;
    if shifted >= 0 {
        Some((10u128.checked_pow(shifted as u32)?, 1))
    } else {
        Some((1, 10u128.checked_pow(shifted.unsigned_abs())?))
    }
}

/// Parses a non-negative quantity into milli-units, rounding fractions down.
pub fn parse_milli(q: &str) -> Result<u128, QuantityError> {
    let err = || QuantityError::Invalid(q.to_string());
    let q = q.trim();
    if q.is_empty() {
        return Ok(0);
    }
    let split = q
        .find(|c: char| !(c.is_ascii_digit() || c == '.'))
        .unwrap_or(q.len());
    let (number, suffix) = q.split_at(split);
    let (num, den) = suffix_scale(suffix)
        .or_else(|| exponent_scale(suffix))
        .ok_or_else(err)?;

    let (int_part, frac_part) = match number.split_once('.') {
        Some((i, f)) => (i, f),
        None => (number, ""),
    };
    if int_part.is_empty() && frac_part.is_empty() {
        return Err(err());
    }
    let digits = format!("{int_part}{frac_part}");
    let mantissa: u128 = digits.parse().map_err(|_| err())?;
    let divisor = 10u128
        .checked_pow(frac_part.len() as u32)
        .and_then(|f| f.checked_mul(den))
        .ok_or_else(err)?;

    mantissa
        .checked_mul(num)
        .map(|v| v / divisor)
        .ok_or_else(err)
}

pub fn format_cpu(milli: u128) -> Quantity {
    if milli % 1000 == 0 {
        Quantity((milli / 1000).to_string())
    } else {
        Quantity(format!("{milli}m"))
    }
}

pub fn format_memory(milli: u128) -> Quantity {
    let bytes = milli / 1000;
    if bytes == 0 {
        return Quantity("0".into());
    }
    let units: [(u128, &str); 4] = [
        (KI.pow(3), "Gi"),
        (1_000_000_000, "G"),
        (KI.pow(2), "Mi"),
        (1_000_000, "M"),
    ];
    for (size, suffix) in units {
        if bytes % size == 0 {
            return Quantity(format!("{}{}", bytes / size, suffix));
        }
    }
    Quantity(bytes.to_string())
}

/// Effective quota of a tenant: the override verbatim when present, else the
/// capped sum of the quotas of the workspaces it is enrolled in.
pub fn tenant_quota<'a>(
    workspaces: impl IntoIterator<Item = &'a ResourceQuota>,
    override_quota: Option<&ResourceQuota>,
    caps: QuotaCaps,
) -> Result<ResourceQuota, QuantityError> {
    if let Some(q) = override_quota {
        return Ok(q.clone());
    }

    let mut cpu = 0u128;
    let mut memory = 0u128;
    let mut instances = 0u32;
    for q in workspaces {
        cpu = cpu
            .checked_add(parse_milli(&q.cpu.0)?)
            .ok_or(QuantityError::Overflow)?;
        memory = memory
            .checked_add(parse_milli(&q.memory.0)?)
            .ok_or(QuantityError::Overflow)?;
        instances = instances.saturating_add(q.instances);
    }

    if caps.cpu > 0 {
        cpu = cpu.min(caps.cpu as u128 * 1000);
    }
    if caps.memory_giga > 0 {
        memory = memory.min(caps.memory_giga as u128 * 1_000_000_000 * 1000);
    }
    if caps.instances > 0 {
        instances = instances.min(caps.instances);
    }

    Ok(ResourceQuota {
        cpu: format_cpu(cpu),
        memory: format_memory(memory),
        instances,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rq(cpu: &str, memory: &str, instances: u32) -> ResourceQuota {
        ResourceQuota {
            cpu: Quantity(cpu.into()),
            memory: Quantity(memory.into()),
            instances,
        }
    }

    #[test]
    fn parse_common_forms() {
        assert_eq!(parse_milli("2").unwrap(), 2000);
        assert_eq!(parse_milli("1500m").unwrap(), 1500);
        assert_eq!(parse_milli("0.5").unwrap(), 500);
        assert_eq!(parse_milli("1Ki").unwrap(), 1024 * 1000);
        assert_eq!(parse_milli("1.5Gi").unwrap(), 1536 * 1024 * 1024 * 1000);
        assert_eq!(parse_milli("3G").unwrap(), 3_000_000_000 * 1000);
        assert!(parse_milli("12Qi").is_err());
        assert!(parse_milli("Gi").is_err());
    }

    #[test]
    fn parse_exponent_forms() {
        assert_eq!(parse_milli("1e3").unwrap(), 1_000_000);
        assert_eq!(parse_milli("2E6").unwrap(), 2_000_000_000);
        assert_eq!(parse_milli("5e-1").unwrap(), 500);
        assert_eq!(parse_milli("1.5e2").unwrap(), 150_000);
        // a bare E is still the exa suffix
        assert_eq!(parse_milli("1E").unwrap(), 1_000 * 1_000_000_000_000_000_000);
        assert!(parse_milli("1e").is_err());
        assert!(parse_milli("1e99").is_err());
    }

    #[test]
    fn huge_sums_are_rejected() {
        let wss = vec![rq("1e35", "0", 0); 4];
        let err = tenant_quota(&wss, None, QuotaCaps::default()).unwrap_err();
        assert_eq!(err, QuantityError::Overflow);

        let wss = [rq("1e3", "2E9", 1)];
        let q = tenant_quota(&wss, None, QuotaCaps::default()).unwrap();
        assert_eq!(q.cpu.0, "1000");
        assert_eq!(q.memory.0, "2G");
    }

    #[test]
    fn format_round_trips_readably() {
        assert_eq!(format_cpu(3000).0, "3");
        assert_eq!(format_cpu(2500).0, "2500m");
        assert_eq!(format_memory(8 * KI.pow(3) * 1000).0, "8Gi");
        assert_eq!(format_memory(50_000_000_000 * 1000).0, "50G");
        assert_eq!(format_memory(0).0, "0");
    }

    #[test]
    fn override_wins() {
        let over = rq("1", "1Gi", 1);
        let wss = [rq("10", "10Gi", 5)];
        let q = tenant_quota(&wss, Some(&over), QuotaCaps::default()).unwrap();
        assert_eq!(q, over);
    }

    #[test]
    fn sums_and_caps() {
        let wss = [rq("20", "30G", 6), rq("10", "30G", 6)];
        let caps = QuotaCaps {
            cpu: 25,
            memory_giga: 50,
            instances: 10,
        };
        let q = tenant_quota(&wss, None, caps).unwrap();
        assert_eq!(q.cpu.0, "25");
        assert_eq!(q.memory.0, "50G");
        assert_eq!(q.instances, 10);

        let q = tenant_quota(&wss[..1], None, caps).unwrap();
        assert_eq!(q.cpu.0, "20");
        assert_eq!(q.instances, 6);
    }

    #[test]
    fn no_workspaces_is_zero() {
        let q = tenant_quota(std::iter::empty(), None, QuotaCaps::default()).unwrap();
        assert_eq!(q.cpu.0, "0");
        assert_eq!(q.memory.0, "0");
        assert_eq!(q.instances, 0);
    }
}
