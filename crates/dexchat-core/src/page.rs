//! Page eligibility and room derivation.
//!
//! A page hosts a voice room when its URL points at a Solana token page on
//! DexScreener. The room id is the token segment that follows; an eligible
//! URL without a readable token maps to the shared `default` room.

use std::sync::LazyLock;

use regex::Regex;

use crate::ids::RoomId;

/// Path marker that makes a page eligible.
pub const ELIGIBLE_MARKER: &str = "dexscreener.com/solana/";

/// Room used when an eligible URL carries no token.
pub const DEFAULT_ROOM: &str = "default";

static TOKEN_SEGMENT: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"dexscreener\.com/solana/(\w+)").ok());

/// Whether the page at `url` should host a voice room.
#[must_use]
pub fn is_eligible_page(url: &str) -> bool {
    url.contains(ELIGIBLE_MARKER)
}

/// Derive the room for `url`, or `None` when the page is not eligible.
#[must_use]
pub fn room_from_page_url(url: &str) -> Option<RoomId> {
    if !is_eligible_page(url) {
        return None;
    }
    let token = TOKEN_SEGMENT
        .as_ref()
        .and_then(|re| re.captures(url))
        .and_then(|caps| caps.get(1))
        .map_or(DEFAULT_ROOM, |m| m.as_str());
    RoomId::parse(token).ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn token_page_is_eligible() {
        let url = "https://dexscreener.com/solana/7xKXtg2CW87d97TXJSDpbD5jBkheTqA83TZRuJosgAsU";
        assert!(is_eligible_page(url));
        let room = room_from_page_url(url).unwrap();
        assert_eq!(room.as_str(), "7xKXtg2CW87d97TXJSDpbD5jBkheTqA83TZRuJosgAsU");
    }

    #[test]
    fn query_string_is_not_part_of_room() {
        let room = room_from_page_url("https://dexscreener.com/solana/abc123?maker=x").unwrap();
        assert_eq!(room.as_str(), "abc123");
    }

    #[test]
    fn other_chains_are_not_eligible() {
        assert!(!is_eligible_page("https://dexscreener.com/ethereum/0xabc"));
        assert!(room_from_page_url("https://example.com/").is_none());
    }

    #[test]
    fn eligible_without_token_uses_default_room() {
        let room = room_from_page_url("https://dexscreener.com/solana/").unwrap();
        assert_eq!(room.as_str(), DEFAULT_ROOM);
    }
}
