//! Static sector taxonomy and proxy-asset mapping.
//!
//! Both are external lookups from the engine's point of view: the decision
//! engine applies them but never computes them. Assets outside the crypto
//! universe proxy to WETH as a general risk-on instrument; a few chains we
//! cannot reach map to nothing and are unexecutable.

/// Sector keys used in worldview sector views.
pub const SECTOR_CRYPTO: &str = "crypto_ai";
pub const SECTOR_DEFI: &str = "defi";
pub const SECTOR_SOCIAL: &str = "social_media";
pub const SECTOR_EQUITIES: &str = "trad_equities";

const SOCIAL_ASSETS: &[&str] = &["SNAP", "META", "TWTR", "PINS", "RDDT"];
const DEFI_ASSETS: &[&str] = &["UNI", "AAVE", "SNX", "SUSHI", "CRV", "MKR", "COMP"];
const CRYPTO_ASSETS: &[&str] = &["BTC", "ETH", "SOL", "AVAX", "MATIC", "LINK"];

/// Map an asset to its sector. Unknown tickers default to traditional
/// equities; DeFi takes precedence over the broad crypto bucket.
pub fn sector_of(asset: &str) -> &'static str {
    let upper = asset.to_ascii_uppercase();
    if SOCIAL_ASSETS.contains(&upper.as_str()) {
        return SECTOR_SOCIAL;
    }
    if DEFI_ASSETS.contains(&upper.as_str()) {
        return SECTOR_DEFI;
    }
    if CRYPTO_ASSETS.contains(&upper.as_str()) {
        return SECTOR_CRYPTO;
    }
    SECTOR_EQUITIES
}

/// Resolve an asset to the instrument the venue can actually trade.
/// `None` means no mapping exists and the decision must be skipped.
pub fn resolve_proxy(asset: &str) -> Option<&'static str> {
    match asset.to_ascii_uppercase().as_str() {
        "BTC" => Some("WBTC"),
        "ETH" => Some("WETH"),
        "LINK" => Some("LINK"),
        "UNI" => Some("UNI"),
        "AAVE" => Some("AAVE"),
        // Not reachable on the execution network.
        "SOL" | "AVAX" | "MATIC" => None,
        // Everything else (equities included) proxies to the risk-on leg.
        _ => Some("WETH"),
    }
}
