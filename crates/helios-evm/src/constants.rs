//! Protocol constants.

/// Gas constants of the transaction and frame-level gas schedule.
pub mod gas {
    /// Base cost of every transaction.
    pub const TX_GAS: u64 = 21_000;
    /// Base cost of a contract-creation transaction after Homestead.
    pub const TX_GAS_CONTRACT_CREATION: u64 = 53_000;
    /// Cost of a zero byte of calldata.
    pub const TX_DATA_ZERO_GAS: u64 = 4;
    /// Cost of a non-zero byte of calldata before EIP-2028.
    pub const TX_DATA_NON_ZERO_GAS_FRONTIER: u64 = 68;
    /// Cost of a non-zero byte of calldata after EIP-2028.
    pub const TX_DATA_NON_ZERO_GAS_EIP2028: u64 = 16;
    /// Cost per 32-byte word of init code (EIP-3860).
    pub const INIT_CODE_WORD_GAS: u64 = 2;
    /// Cost per address of an access list (EIP-2930).
    pub const TX_ACCESS_LIST_ADDRESS_GAS: u64 = 2_400;
    /// Cost per storage key of an access list (EIP-2930).
    pub const TX_ACCESS_LIST_STORAGE_KEY_GAS: u64 = 1_900;
    /// Intrinsic cost per authorization tuple (EIP-7702).
    pub const PER_EMPTY_ACCOUNT_COST: u64 = 25_000;
    /// Part of [`PER_EMPTY_ACCOUNT_COST`] kept when the authority already exists (EIP-7702).
    pub const PER_AUTH_BASE_COST: u64 = 12_500;
    /// Cost per byte of deployed runtime code.
    pub const CREATE_DATA_GAS: u64 = 200;
    /// Maximum refund quotient before EIP-3529.
    pub const REFUND_QUOTIENT: u64 = 2;
    /// Maximum refund quotient after EIP-3529.
    pub const REFUND_QUOTIENT_EIP3529: u64 = 5;
}

/// Maximum size of init code (EIP-3860).
pub const MAX_INIT_CODE_SIZE: usize = 49_152;

/// Maximum size of deployed runtime code (EIP-170).
pub const MAX_CODE_SIZE: usize = 24_576;

/// Maximum number of authorization tuples in a SetCode transaction.
pub const MAX_AUTHORIZATION_LIST_SIZE: usize = 256;

/// Prefix of an EIP-7702 delegation designator: `0xef0100 ++ address`.
pub const DELEGATION_PREFIX: [u8; 3] = [0xef, 0x01, 0x00];

/// Length in bytes of an EIP-7702 delegation designator.
pub const DELEGATION_CODE_LEN: usize = 23;

/// Magic byte of the EIP-2718 typed signing payload of an authorization (EIP-7702).
pub const AUTHORIZATION_MAGIC: u8 = 0x05;

/// Maximum call depth.
pub const CALL_DEPTH_LIMIT: usize = 1024;

/// Number of past blocks whose hashes `BLOCKHASH` can read.
pub const BLOCK_HASH_HISTORY: u64 = 256;

/// Number of recent state roots kept referenced in memory before garbage collection.
pub const TRIES_IN_MEMORY: u64 = 16;

/// Gas limit of node-issued internal transactions.
pub const INTERNAL_TX_GAS_LIMIT: u64 = 500_000_000;

/// Precompiled contract addresses warmed by the access list (Berlin).
pub const PRECOMPILE_COUNT: u8 = 9;
