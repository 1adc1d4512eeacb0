//! Parsers for the node log lines the harness observes progress through.
//!
//! Two lines are recognised:
//! - `... best: #<N> (<hash>), finalized #<M> (<hash>) ...`
//! - `... <K>/<N> authorities known for session <S> ...`

use derive_more::Display;

const BEST_MARKER: &str = "best: #";
const FINALIZED_MARKER: &str = " finalized #";
const AUTHORITIES_MARKER: &str = " authorities known for session";

/// The heights a node last reported. `-1` means never observed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
#[display(fmt = "best=#{} finalized=#{}", best, finalized)]
pub struct BlockHeights {
    pub best: i64,
    pub finalized: i64,
}

impl BlockHeights {
    pub const UNKNOWN: BlockHeights = BlockHeights {
        best: -1,
        finalized: -1,
    };

    /// How far finalization lags behind the best imported block.
    pub fn gap(&self) -> i64 {
        self.best - self.finalized
    }
}

impl Default for BlockHeights {
    fn default() -> Self {
        Self::UNKNOWN
    }
}

/// Connectivity reported by an `authorities known` line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
#[display(fmt = "{}/{}", known, total)]
pub struct AuthorityCount {
    pub known: u64,
    pub total: u64,
}

impl AuthorityCount {
    pub fn is_complete(&self) -> bool {
        self.known == self.total
    }
}

/// Splits off the leading run of ASCII digits.
fn leading_number(s: &str) -> Option<(i64, &str)> {
    let end = s.find(|c: char| !c.is_ascii_digit()).unwrap_or(s.len());
    let number = s[..end].parse().ok()?;
    Some((number, &s[end..]))
}

pub fn parse_heights(line: &str) -> Option<BlockHeights> {
    let (_, rest) = line.split_once(BEST_MARKER)?;
    let (best, rest) = leading_number(rest)?;
    let rest = rest.strip_prefix(' ')?;

    // The finalized marker must not be the very first thing after the best height.
    let position = rest.rfind(FINALIZED_MARKER).filter(|p| *p > 0)?;
    let (finalized, _) = leading_number(&rest[position + FINALIZED_MARKER.len()..])?;

    Some(BlockHeights { best, finalized })
}

pub fn parse_authorities(line: &str) -> Option<AuthorityCount> {
    let (head, _) = line.split_once(AUTHORITIES_MARKER)?;
    let token = head
        .rsplit(|c: char| !(c.is_ascii_digit() || c == '/'))
        .next()?;
    let (known, total) = token.split_once('/')?;

    Some(AuthorityCount {
        known: known.parse().ok()?,
        total: total.parse().ok()?,
    })
}

/// The heights from the last matching line of `log`.
pub fn last_heights(log: &str) -> Option<BlockHeights> {
    log.lines().rev().find_map(parse_heights)
}

/// The count from the last matching line of `log`.
pub fn last_authorities(log: &str) -> Option<AuthorityCount> {
    log.lines().rev().find_map(parse_authorities)
}

#[cfg(test)]
mod tests {
    use super::*;

    const IDLE: &str = "2024-02-01 12:00:03 💤 Idle (5 peers), best: #57 (0x3a1c…9e02), \
                        finalized #54 (0x77f0…1b3c), ⬇ 1.2kiB/s ⬆ 0.9kiB/s";

    #[test]
    fn test_parse_idle_line() {
        assert_eq!(
            parse_heights(IDLE),
            Some(BlockHeights {
                best: 57,
                finalized: 54
            })
        );
    }

    #[test]
    fn test_parse_rejects_other_lines() {
        assert_eq!(parse_heights("Imported #12 (0xabc)"), None);
        assert_eq!(parse_heights("best: #12"), None);
        assert_eq!(parse_heights("best: #x finalized #3"), None);
        assert_eq!(parse_heights("best: #12 finalized #3"), None);
    }

    #[test]
    fn test_last_matching_line_wins() {
        let log = "starting\n\
                   Idle (0 peers), best: #3 (0x1), finalized #1 (0x2)\n\
                   something else\n\
                   Idle (0 peers), best: #9 (0x3), finalized #7 (0x4)\n\
                   shutting down\n";
        assert_eq!(
            last_heights(log),
            Some(BlockHeights {
                best: 9,
                finalized: 7
            })
        );
        assert_eq!(last_heights("no progress yet\n"), None);
    }

    #[test]
    fn test_authorities() {
        let log = "aleph-network: 2/4 authorities known for session 0.\n\
                   aleph-network: 4/4 authorities known for session 0.\n\
                   aleph-network: 3/4 authorities known for session 1.\n";
        let count = last_authorities(log).unwrap();
        assert_eq!(count, AuthorityCount { known: 3, total: 4 });
        assert!(!count.is_complete());
        assert!(parse_authorities("4/4 authorities known for session 2")
            .unwrap()
            .is_complete());
        assert_eq!(last_authorities("nothing here"), None);
    }

    #[test]
    fn test_unknown_heights() {
        assert_eq!(BlockHeights::default(), BlockHeights::UNKNOWN);
        assert_eq!(BlockHeights::UNKNOWN.to_string(), "best=#-1 finalized=#-1");
    }
}
