//! Hard-fork schedules.
//!
//! Each network carries a fixed table of (version, activation height,
//! voting threshold time). The tables are consensus rules and must not be
//! edited without a fork.

use crate::Network;

/// One hard-fork activation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HardForkEntry {
    /// Protocol version.
    pub version: u8,
    /// First height at which the version applies.
    pub height: u64,
    /// Unix time the fork was scheduled.
    pub time: u64,
}

const fn hf(version: u8, height: u64, time: u64) -> HardForkEntry {
    HardForkEntry {
        version,
        height,
        time,
    }
}

const MAINNET_HARD_FORKS: &[HardForkEntry] = &[
    hf(1, 1, 1_541_014_386),
    hf(2, 8, 1_541_014_391),
    hf(3, 100, 1_541_014_463),
    hf(4, 45_000, 1_549_695_692),
    hf(5, 106_950, 1_560_481_469),
    hf(6, 181_056, 1_573_931_994),
    hf(7, 352_846, 1_595_030_400),
    hf(8, 426_143, 1_603_945_507),
    hf(9, 500_000, 1_612_744_443),
    hf(10, 548_732, 1_618_779_871),
    hf(11, 663_269, 1_632_469_944),
    hf(12, 841_197, 1_654_028_715),
    hf(13, 898_176, 1_660_873_980),
    hf(14, 936_500, 1_665_518_459),
    hf(15, 991_430, 1_672_174_800),
    hf(16, 1_001_320, 1_673_377_200),
    hf(17, 1_056_414, 1_680_070_995),
    hf(18, 1_238_350, 1_704_230_052),
    hf(19, 1_248_886, 1_705_611_030),
];

const TESTNET_HARD_FORKS: &[HardForkEntry] = &[
    hf(1, 1, 1_341_378_000),
    hf(2, 8, 1_445_355_000),
    hf(3, 10, 1_472_415_034),
    hf(4, 11, 1_472_415_035),
    hf(5, 12, 1_551_499_880),
    hf(6, 13, 1_571_531_327),
    hf(7, 14, 1_581_531_327),
    hf(8, 15, 1_591_531_327),
    hf(9, 75, 1_612_161_143),
    hf(10, 125, 1_692_161_143),
    hf(11, 126, 1_632_469_944),
    hf(12, 150, 1_692_469_950),
    hf(13, 200, 1_692_469_985),
    hf(14, 250, 1_692_469_995),
    hf(15, 300, 1_671_746_400),
    hf(16, 350, 1_673_377_200),
];

const STAGENET_HARD_FORKS: &[HardForkEntry] = &[hf(1, 1, 1_341_378_000)];

/// The hard-fork table of a network.
pub fn hard_fork_table(network: Network) -> &'static [HardForkEntry] {
    match network {
        Network::Mainnet | Network::Fakechain => MAINNET_HARD_FORKS,
        Network::Testnet => TESTNET_HARD_FORKS,
        Network::Stagenet => STAGENET_HARD_FORKS,
    }
}

/// Protocol version in force at a height.
pub fn hard_fork_version_at(network: Network, height: u64) -> u8 {
    let mut version = 1;
    for entry in hard_fork_table(network) {
        if entry.height <= height {
            version = entry.version;
        } else {
            break;
        }
    }
    version
}

/// Activation height of a version, if it is scheduled.
pub fn hard_fork_height(network: Network, version: u8) -> Option<u64> {
    hard_fork_table(network)
        .iter()
        .find(|entry| entry.version == version)
        .map(|entry| entry.height)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mainnet_versions() {
        assert_eq!(hard_fork_version_at(Network::Mainnet, 0), 1);
        assert_eq!(hard_fork_version_at(Network::Mainnet, 7), 1);
        assert_eq!(hard_fork_version_at(Network::Mainnet, 8), 2);
        assert_eq!(hard_fork_version_at(Network::Mainnet, 106_949), 4);
        assert_eq!(hard_fork_version_at(Network::Mainnet, 106_950), 5);
        assert_eq!(hard_fork_version_at(Network::Mainnet, 841_197), 12);
        assert_eq!(hard_fork_version_at(Network::Mainnet, 1_056_414), 17);
        assert_eq!(hard_fork_version_at(Network::Mainnet, 2_000_000), 19);
    }

    #[test]
    fn activation_heights() {
        assert_eq!(hard_fork_height(Network::Mainnet, 5), Some(106_950));
        assert_eq!(hard_fork_height(Network::Testnet, 5), Some(12));
        assert_eq!(hard_fork_height(Network::Stagenet, 5), None);
        assert_eq!(hard_fork_height(Network::Mainnet, 200), None);
    }

    #[test]
    fn tables_are_monotonic() {
        for network in [Network::Mainnet, Network::Testnet, Network::Stagenet] {
            let table = hard_fork_table(network);
            for pair in table.windows(2) {
                assert!(pair[0].version < pair[1].version);
                assert!(pair[0].height < pair[1].height);
            }
        }
    }
}
