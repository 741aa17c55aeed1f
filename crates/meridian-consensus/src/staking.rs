//! Staking requirement curve and portion arithmetic.
//!
//! Portions are integer fractions of `STAKING_PORTIONS`; converting between
//! portions and atomic amounts uses 128-bit intermediates so the division
//! never wraps.

use crate::{
    Network, COIN, MAX_NUMBER_OF_CONTRIBUTORS, MAX_NUMBER_OF_CONTRIBUTORS_V2, MIN_PORTIONS,
    MIN_POOL_STAKERS_V12, STAKING_PORTIONS,
};

/// `a * b / d` with a 128-bit intermediate product.
pub fn mul_div(a: u64, b: u64, d: u64) -> u64 {
    ((u128::from(a) * u128::from(b)) / u128::from(d)) as u64
}

/// The staking requirement at a height, in atomic units.
///
/// A three-piece curve: an early exponential decay toward 10k coins, a
/// flatter decay toward 70k after the first restructure, and a flat 100k
/// from the pooled-node fork on. Heights below the service-node activation
/// are clamped up to it.
pub fn staking_requirement(network: Network, height: u64) -> u64 {
    let activation_height: u64 = match network {
        Network::Mainnet | Network::Fakechain => 106_950,
        Network::Testnet | Network::Stagenet => 581,
    };
    let height = height.max(activation_height);
    let height_adjusted = height - activation_height;

    if network == Network::Testnet {
        return if height >= 150 {
            100_000 * COIN
        } else if height >= 14 {
            let base = 70_000 * COIN;
            let variable = (20_000.0 * COIN as f64) / exp2(height_adjusted as f64 / 356_446.0);
            base + variable as u64
        } else {
            let base = 10_000 * COIN;
            let variable = (30_000.0 * COIN as f64) / exp2(height_adjusted as f64 / 129_600.0);
            base + variable as u64
        };
    }

    let (base, variable) = if height >= 841_197 {
        (100_000 * COIN, 0u64)
    } else if height >= 352_846 {
        let variable = (20_000.0 * COIN as f64) / exp2(height_adjusted as f64 / 356_446.0);
        (70_000 * COIN, variable as u64)
    } else {
        let variable = (30_000.0 * COIN as f64) / exp2(height_adjusted as f64 / 129_600.0);
        (10_000 * COIN, variable as u64)
    };
    base + variable
}

fn exp2(x: f64) -> f64 {
    x.exp2()
}

/// Convert portions into an atomic amount against a staking requirement.
pub fn portions_to_amount(portions: u64, staking_requirement: u64) -> u64 {
    mul_div(staking_requirement, portions, STAKING_PORTIONS)
}

/// Lowest `x` such that `staking_requirement * x / STAKING_PORTIONS >=
/// amount`.
pub fn portions_to_make_amount(staking_requirement: u64, amount: u64) -> u64 {
    let numerator = u128::from(amount) * u128::from(STAKING_PORTIONS)
        + u128::from(staking_requirement - 1);
    (numerator / u128::from(staking_requirement)) as u64
}

/// Check that each reserved portion is sufficiently large and the portions
/// never overdraw the denominator. The operator's portion is consumed
/// first; the sum may fall short when not all contributors are present at
/// registration time.
pub fn check_service_node_portions(portions: &[u64]) -> bool {
    check_portions_with_min(portions, MIN_PORTIONS)
}

/// Portion check against an explicit minimum.
pub fn check_portions_with_min(portions: &[u64], min_portions: u64) -> bool {
    let mut portions_left = STAKING_PORTIONS;
    for &portion in portions {
        let required = portions_left.min(min_portions);
        if portion < required || portion > portions_left {
            return false;
        }
        portions_left -= portion;
    }
    true
}

/// Minimum acceptable contribution given the hard fork, the node's staking
/// requirement and what is already reserved.
pub fn min_node_contribution(hf: u8, staking_requirement: u64, total_reserved: u64) -> u64 {
    if hf >= 12 {
        MIN_POOL_STAKERS_V12 * COIN
    } else if hf > 9 {
        (staking_requirement - total_reserved)
            .min(staking_requirement / MAX_NUMBER_OF_CONTRIBUTORS_V2 as u64)
    } else {
        (staking_requirement - total_reserved)
            .min(staking_requirement / MAX_NUMBER_OF_CONTRIBUTORS as u64)
    }
}

/// Convert wallet registration arguments into the operator cut and the
/// per-contributor reserved portions.
///
/// Each contributor is named by an address and a percent string; staking
/// rejects subaddresses and payment-id addresses. A contributor's share is
/// capped at whatever remains of the denominator.
pub fn convert_registration_args(
    addresses: &[meridian_types::AccountAddress],
    percents: &[&str],
    operator_cut: &str,
) -> Option<(u64, Vec<u64>)> {
    if addresses.is_empty() || addresses.len() != percents.len() {
        return None;
    }
    if addresses
        .iter()
        .any(|addr| addr.is_subaddress || addr.has_payment_id)
    {
        return None;
    }

    let portions_for_operator = portions_from_percent_str(operator_cut)?;
    let mut portions_left = STAKING_PORTIONS;
    let mut portions = Vec::with_capacity(percents.len());
    for percent in percents {
        let requested = portions_from_percent_str(percent)?.min(portions_left);
        if requested < portions_left.min(MIN_PORTIONS) {
            return None;
        }
        portions_left -= requested;
        portions.push(requested);
    }
    Some((portions_for_operator, portions))
}

/// Parse a human percent string ("45", "45%", "12.5%") into portions.
pub fn portions_from_percent_str(cut: &str) -> Option<u64> {
    let cut = cut.trim().strip_suffix('%').unwrap_or(cut.trim());
    let percent: f64 = cut.parse().ok()?;
    if !(0.0..=100.0).contains(&percent) {
        return None;
    }
    // An exact 100% must not lose precision to the float multiply.
    if percent == 100.0 {
        return Some(STAKING_PORTIONS);
    }
    Some(((percent / 100.0) * STAKING_PORTIONS as f64) as u64)
}
