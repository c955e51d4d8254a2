//! Waiting for traffic that matches one of several templates.

use std::time::{Duration, Instant};

use tracing::{debug, trace};

use crate::chain::Chain;
use crate::connector::{Connector, PollOutcome};
use crate::error::Error;
use crate::packet::Packet;

/// One entry of the pattern list given to [`expect`].
#[derive(Debug, Clone)]
pub enum Pattern {
    /// Prefix match with [`Chain::matches`].
    Chain(Chain),
    /// Any packet of the chain matching, with [`Chain::contains`].
    Packet(Packet),
    /// Wins when the source reports end of file.
    Eof,
    /// Wins when the deadline passes.
    Timeout,
    /// Wins when the packet limit is used up.
    Limit,
}

impl Pattern {
    pub fn matches(&self, chain: &Chain) -> bool {
        match self {
            Pattern::Chain(t) => t.matches(chain),
            Pattern::Packet(t) => chain.contains(t).is_some(),
            Pattern::Eof | Pattern::Timeout | Pattern::Limit => false,
        }
    }
}

impl From<Chain> for Pattern {
    fn from(c: Chain) -> Self {
        Pattern::Chain(c)
    }
}

impl From<Packet> for Pattern {
    fn from(p: Packet) -> Self {
        Pattern::Packet(p)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ExpectConfig {
    /// Give up after this long; `None` waits forever.
    pub timeout: Option<Duration>,
    /// Give up after this many chains have been examined.
    pub limit: Option<usize>,
}

impl ExpectConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }
}

#[derive(Debug, Clone, Default)]
pub struct MatchResult {
    /// The winning chain followed by the contiguous chains of the same batch that
    /// matched the same template. Empty when a sentinel pattern won. Chains of the
    /// batch after the run are consumed and not returned.
    pub matched_chains: Vec<Chain>,
    pub matched_template_index: usize,
}

/// How an [`expect_outcome`] call ended.
#[derive(Debug, Clone)]
pub enum ExpectOutcome {
    Matched(MatchResult),
    Timeout(Duration),
    Eof,
    LimitReached(usize),
}

/// Read from `conn` until a template matches. End of file, the deadline and the
/// packet limit are returned as [`Error::Eof`], [`Error::Timeout`] and
/// [`Error::LimitReached`] unless the matching sentinel is among `patterns`, in which
/// case it wins with an empty match.
pub fn expect<C>(conn: &mut C, patterns: &[Pattern], config: &ExpectConfig) -> Result<MatchResult, Error>
where
    C: Connector + ?Sized,
{
    let sentinel = |want: fn(&Pattern) -> bool| {
        patterns.iter().position(want).map(|i| MatchResult {
            matched_chains: Vec::new(),
            matched_template_index: i,
        })
    };
    match expect_outcome(conn, patterns, config)? {
        ExpectOutcome::Matched(m) => Ok(m),
        ExpectOutcome::Timeout(after) => {
            sentinel(|p| matches!(p, Pattern::Timeout)).ok_or(Error::Timeout(after))
        }
        ExpectOutcome::Eof => sentinel(|p| matches!(p, Pattern::Eof)).ok_or(Error::Eof),
        ExpectOutcome::LimitReached(n) => {
            sentinel(|p| matches!(p, Pattern::Limit)).ok_or(Error::LimitReached(n))
        }
    }
}

/// Like [`expect`], with the terminal conditions returned as values.
///
/// The connector is switched to non-blocking mode for the duration of the call and
/// restored afterwards. Within one batch the first chain that matches any template
/// fixes the winner; the chains after it are tested against the winner only and
/// collection stops at the first one that does not match. That chain and the rest
/// of its batch have already been read from `conn` and are discarded, so pass a
/// [`limit`](ExpectConfig::limit) of 1 to consume no more than the winning chain.
pub fn expect_outcome<C>(
    conn: &mut C,
    patterns: &[Pattern],
    config: &ExpectConfig,
) -> Result<ExpectOutcome, Error>
where
    C: Connector + ?Sized,
{
    let previous = conn.set_nonblocking(true)?;
    let result = run(conn, patterns, config);
    let restored = conn.set_nonblocking(previous);
    let outcome = result?;
    restored?;
    Ok(outcome)
}

fn run<C>(conn: &mut C, patterns: &[Pattern], config: &ExpectConfig) -> Result<ExpectOutcome, Error>
where
    C: Connector + ?Sized,
{
    let start = Instant::now();
    let deadline = config.timeout.map(|t| start + t);
    let mut seen = 0usize;

    if config.limit == Some(0) {
        return Ok(ExpectOutcome::LimitReached(0));
    }

    loop {
        let wait = deadline.map(|d| d.saturating_duration_since(Instant::now()));
        match conn.poll_read(wait)? {
            PollOutcome::Ready => {}
            PollOutcome::Timeout => {
                if deadline.is_some_and(|d| Instant::now() >= d) {
                    debug!(elapsed = ?start.elapsed(), seen, "expect timed out");
                    return Ok(ExpectOutcome::Timeout(start.elapsed()));
                }
                continue;
            }
            PollOutcome::Eof => {
                debug!(seen, "expect reached end of file");
                return Ok(ExpectOutcome::Eof);
            }
        }

        let want = config.limit.map_or(0, |l| l - seen);
        let batch = conn.try_read_n_chains(want)?;
        trace!(batch = batch.len(), seen, "expect batch");

        let mut winner: Option<usize> = None;
        let mut matched = Vec::new();
        let total = batch.len();
        for (pos, chain) in batch.into_iter().enumerate() {
            match winner {
                None => {
                    seen += 1;
                    if let Some(i) = patterns.iter().position(|p| p.matches(&chain)) {
                        winner = Some(i);
                        matched.push(chain);
                    } else if config.limit.is_some_and(|l| seen >= l) {
                        break;
                    }
                }
                Some(i) => {
                    if !patterns[i].matches(&chain) {
                        debug!(template = i, dropped = total - pos, "discarding the rest of the batch");
                        break;
                    }
                    seen += 1;
                    matched.push(chain);
                }
            }
        }

        if let Some(i) = winner {
            debug!(template = i, chains = matched.len(), seen, "expect matched");
            return Ok(ExpectOutcome::Matched(MatchResult {
                matched_chains: matched,
                matched_template_index: i,
            }));
        }
        if let Some(limit) = config.limit.filter(|l| seen >= *l) {
            debug!(limit, "expect reached its packet limit");
            return Ok(ExpectOutcome::LimitReached(limit));
        }
        if deadline.is_some_and(|d| Instant::now() >= d) {
            debug!(elapsed = ?start.elapsed(), seen, "expect timed out");
            return Ok(ExpectOutcome::Timeout(start.elapsed()));
        }
    }
}
