//! Protocol versions (`SpecId`) and declarative fork activation.

use core::{
    fmt::{self, Display},
    str::FromStr,
};

use serde::{Deserialize, Serialize};

/// Protocol version of the state transition.
///
/// Versions are cumulative: a later version enables every rule of the earlier ones. The Helios
/// chain inherits the Ethereum schedule up to [`SpecId::SHANGHAI`] and adds
/// [`SpecId::PHAETHON`], which enables EIP-7702 SetCode transactions.
#[repr(u8)]
#[derive(
    Clone, Copy, Debug, Hash, PartialEq, Eq, PartialOrd, Ord, Default, Serialize, Deserialize,
)]
#[allow(non_camel_case_types, clippy::upper_case_acronyms)]
pub enum SpecId {
    /// Genesis rules.
    FRONTIER,
    /// Contract-creation base cost, signature malleability bound.
    HOMESTEAD,
    /// EIP-150 gas repricing.
    TANGERINE,
    /// EIP-155 replay protection, EIP-158 empty-account deletion, EIP-170 code size limit.
    SPURIOUS_DRAGON,
    /// Receipts carry a status code instead of an intermediate root.
    BYZANTIUM,
    /// Constantinople.
    CONSTANTINOPLE,
    /// Petersburg.
    PETERSBURG,
    /// EIP-2028 calldata repricing.
    ISTANBUL,
    /// EIP-2929 warm/cold access, EIP-2930 access-list transactions.
    BERLIN,
    /// EIP-1559 dynamic fees, EIP-3529 refund cap, EIP-3541 `0xEF` code rejection.
    LONDON,
    /// EIP-3860 init-code limit and metering.
    SHANGHAI,
    /// EIP-7702 SetCode transactions.
    #[default]
    PHAETHON,
}

/// String identifiers of the protocol versions.
#[allow(missing_docs)]
pub mod name {
    pub const FRONTIER: &str = "Frontier";
    pub const HOMESTEAD: &str = "Homestead";
    pub const TANGERINE: &str = "Tangerine";
    pub const SPURIOUS_DRAGON: &str = "SpuriousDragon";
    pub const BYZANTIUM: &str = "Byzantium";
    pub const CONSTANTINOPLE: &str = "Constantinople";
    pub const PETERSBURG: &str = "Petersburg";
    pub const ISTANBUL: &str = "Istanbul";
    pub const BERLIN: &str = "Berlin";
    pub const LONDON: &str = "London";
    pub const SHANGHAI: &str = "Shanghai";
    pub const PHAETHON: &str = "Phaethon";
}

impl SpecId {
    /// Every version, oldest first.
    pub const ALL: [Self; 12] = [
        Self::FRONTIER,
        Self::HOMESTEAD,
        Self::TANGERINE,
        Self::SPURIOUS_DRAGON,
        Self::BYZANTIUM,
        Self::CONSTANTINOPLE,
        Self::PETERSBURG,
        Self::ISTANBUL,
        Self::BERLIN,
        Self::LONDON,
        Self::SHANGHAI,
        Self::PHAETHON,
    ];

    /// Checks if the rules of `other` are enabled in `self`.
    pub const fn is_enabled(self, other: Self) -> bool {
        other as u8 <= self as u8
    }
}

/// Error returned when parsing an unknown version name.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown hardfork: {0}")]
pub struct UnknownHardfork(pub String);

impl From<SpecId> for &'static str {
    fn from(spec_id: SpecId) -> Self {
        match spec_id {
            SpecId::FRONTIER => name::FRONTIER,
            SpecId::HOMESTEAD => name::HOMESTEAD,
            SpecId::TANGERINE => name::TANGERINE,
            SpecId::SPURIOUS_DRAGON => name::SPURIOUS_DRAGON,
            SpecId::BYZANTIUM => name::BYZANTIUM,
            SpecId::CONSTANTINOPLE => name::CONSTANTINOPLE,
            SpecId::PETERSBURG => name::PETERSBURG,
            SpecId::ISTANBUL => name::ISTANBUL,
            SpecId::BERLIN => name::BERLIN,
            SpecId::LONDON => name::LONDON,
            SpecId::SHANGHAI => name::SHANGHAI,
            SpecId::PHAETHON => name::PHAETHON,
        }
    }
}

impl FromStr for SpecId {
    type Err = UnknownHardfork;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|spec| <&'static str>::from(*spec) == s)
            .ok_or_else(|| UnknownHardfork(s.to_string()))
    }
}

impl Display for SpecId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s: &'static str = (*self).into();
        write!(f, "{s}")
    }
}

/// Activation of one protocol version at a block height.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ForkActivation {
    /// The version being activated.
    pub spec: SpecId,
    /// First block executed under `spec`.
    pub block: u64,
}

/// Chain identity and fork schedule.
///
/// The schedule is an explicit list of activations. A version is active at block `n` if it or
/// any later version has an activation at or below `n`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainConfig {
    /// EIP-155 chain id.
    pub chain_id: u64,
    /// Fork activations, in any order.
    pub forks: Vec<ForkActivation>,
}

impl ChainConfig {
    /// Creates a config with every version up to and including `spec` active from genesis.
    pub fn new(chain_id: u64, spec: SpecId) -> Self {
        Self { chain_id, forks: vec![ForkActivation { spec, block: 0 }] }
    }

    /// Sets the activation block of `spec`, replacing any previous activation of it.
    pub fn with_fork(mut self, spec: SpecId, block: u64) -> Self {
        self.forks.retain(|f| f.spec != spec);
        self.forks.push(ForkActivation { spec, block });
        self
    }

    /// Returns the version governing block `number`.
    pub fn spec_at(&self, number: u64) -> SpecId {
        self.forks
            .iter()
            .filter(|f| f.block <= number)
            .map(|f| f.spec)
            .max()
            .unwrap_or(SpecId::FRONTIER)
    }

    /// Returns the activation block of `spec`, if scheduled.
    pub fn activation_block(&self, spec: SpecId) -> Option<u64> {
        self.forks.iter().filter(|f| f.spec.is_enabled(spec)).map(|f| f.block).min()
    }
}

impl Default for ChainConfig {
    fn default() -> Self {
        Self::new(1, SpecId::default())
    }
}
