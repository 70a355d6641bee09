// Crate version followed by the short commit hash, set by build.rs
pub const VERSION: &str = env!("BUILD_VERSION");

// Lamports in one native coin
pub const LAMPORTS_PER_SOL: u64 = 1_000_000_000;

// Decimals of the native coin, also used for the wrapped native token mint
pub const NATIVE_DECIMALS: u8 = 9;

// Base units minted for every multi-token test mint
pub const DEFAULT_TEST_TOKEN_SUPPLY: u64 = 100_000_000_000;
