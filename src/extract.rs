//! Keyword fallback extraction for signals that arrive untyped.
//!
//! The real extraction collaborator sits outside the core; this fallback
//! keeps raw-only records usable. It scores bullish and bearish keyword
//! hits, picks out `$TICKER` mentions and known crypto symbols, and blends
//! source trust with signal strength into a confidence. Deterministic by
//! construction.

use crate::model::{Direction, ExtractedSignal};

const BULLISH_KEYWORDS: &[&str] = &[
    "bullish", "long", "buy", "calls", "breakout", "moon", "pump", "undervalued", "accumulate",
    "upside", "rally", "rip", "opportunity", "gem", "cheap", "oversold",
];

const BEARISH_KEYWORDS: &[&str] = &[
    "bearish", "short", "sell", "puts", "breakdown", "dump", "crash", "overvalued", "distribute",
    "downside", "correction", "fade", "warning", "exit", "expensive", "overbought",
];

const KNOWN_ASSETS: &[&str] = &[
    "BTC", "ETH", "SOL", "AVAX", "MATIC", "LINK", "UNI", "AAVE", "SNX",
];

const ASSET_NAMES: &[(&str, &str)] = &[
    ("bitcoin", "BTC"),
    ("ethereum", "ETH"),
    ("solana", "SOL"),
];

fn keyword_hits(content_lower: &str, keywords: &[&str]) -> usize {
    keywords.iter().filter(|kw| content_lower.contains(**kw)).count()
}

/// Scan for `$TICKER` mentions (1-5 uppercase letters) and bare known
/// symbols. First mention wins; order of appearance in the text.
fn find_assets(content: &str) -> Vec<String> {
    let mut found: Vec<String> = Vec::new();
    let mut push = |sym: String| {
        if !found.contains(&sym) {
            found.push(sym);
        }
    };

    for token in content.split(|c: char| c.is_whitespace() || ",.!?;:()[]".contains(c)) {
        if let Some(rest) = token.strip_prefix('$') {
            if (1..=5).contains(&rest.len()) && rest.chars().all(|c| c.is_ascii_alphabetic()) {
                push(rest.to_ascii_uppercase());
                continue;
            }
        }
        let upper = token.to_ascii_uppercase();
        if KNOWN_ASSETS.contains(&upper.as_str()) {
            push(upper);
            continue;
        }
        let lower = token.to_ascii_lowercase();
        if let Some((_, sym)) = ASSET_NAMES.iter().find(|(name, _)| *name == lower) {
            push((*sym).to_string());
        }
    }
    found
}

/// Extract a typed signal from raw content, or `None` when no asset is
/// mentioned. Direction needs a margin of two keyword hits to leave
/// neutral, so mixed chatter stays non-directional.
pub fn extract(raw_content: &str, source_trust: f64) -> Option<ExtractedSignal> {
    let lower = raw_content.to_lowercase();
    let bullish = keyword_hits(&lower, BULLISH_KEYWORDS);
    let bearish = keyword_hits(&lower, BEARISH_KEYWORDS);

    let direction = if bullish > bearish + 1 {
        Direction::Long
    } else if bearish > bullish + 1 {
        Direction::Short
    } else {
        Direction::Neutral
    };

    let assets = find_assets(raw_content);
    let asset = assets.into_iter().next()?;

    let strength = (bullish.max(bearish) as f64 / 5.0).min(1.0);
    let confidence = (source_trust * 0.6 + strength * 0.4).clamp(0.1, 0.95);

    Some(ExtractedSignal {
        asset,
        direction,
        confidence,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bullish_text_yields_long() {
        let sig = extract(
            "$SNAP looks undervalued, big upside, accumulate before the breakout rally",
            0.8,
        )
        .unwrap();
        assert_eq!(sig.asset, "SNAP");
        assert_eq!(sig.direction, Direction::Long);
        assert!(sig.confidence > 0.5);
    }

    #[test]
    fn test_bearish_text_yields_short() {
        let sig = extract("BTC overbought, expect a dump and correction. exit now", 0.5).unwrap();
        assert_eq!(sig.asset, "BTC");
        assert_eq!(sig.direction, Direction::Short);
    }

    #[test]
    fn test_mixed_chatter_stays_neutral() {
        // One bullish hit ("buy"), one bearish ("sell"): within margin.
        let sig = extract("should I buy or sell ETH here?", 0.5).unwrap();
        assert_eq!(sig.direction, Direction::Neutral);
    }

    #[test]
    fn test_no_asset_yields_none() {
        assert!(extract("massive rally coming, everything pumps", 0.9).is_none());
    }

    #[test]
    fn test_full_name_detection() {
        let sig = extract("Ethereum is cheap here, accumulate, clear upside", 0.6).unwrap();
        assert_eq!(sig.asset, "ETH");
    }

    #[test]
    fn test_confidence_blend_and_clamp() {
        // Zero-trust source, single keyword: 0.6*0 + 0.4*(1/5) = 0.08 -> 0.1 floor
        let sig = extract("buy $ABC", 0.0).unwrap();
        assert!((sig.confidence - 0.1).abs() < 1e-9);

        // Max trust, saturated strength: 0.6 + 0.4 = 1.0 -> 0.95 ceiling
        let text = "buy calls, breakout, moon, pump, rally on $XYZ undervalued gem";
        let sig = extract(text, 1.0).unwrap();
        assert!((sig.confidence - 0.95).abs() < 1e-9);
    }

    #[test]
    fn test_ticker_punctuation_stripped() {
        let sig = extract("loading up on $RDDT, looks oversold. cheap gem here", 0.7).unwrap();
        assert_eq!(sig.asset, "RDDT");
    }
}
