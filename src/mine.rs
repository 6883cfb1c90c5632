use std::{
    cmp::Reverse,
    fmt,
    str::FromStr,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    time::{Duration, Instant},
};

use alloy_primitives::{Address, B256};
use rand::Rng;
use rayon::prelude::{IntoParallelIterator, ParallelIterator};

use crate::create2;

/// How often, in attempts, the cancellation flag is polled between progress points.
const CANCEL_CHECK_MASK: u64 = 0x3ff;

/// Errors raised before a mining session starts.
#[derive(Debug, thiserror::Error, PartialEq)]
pub(super) enum MineError {
    #[error("{what} must be a finite, non-negative number of seconds, got {value}")]
    InvalidDuration { what: &'static str, value: f64 },

    #[error("log interval must be greater than zero")]
    ZeroLogInterval,

    #[error("at least one mining session is required")]
    NoSessions,

    #[error("unknown ranking `{0}`, expected one of: lowest-hex, numeric, leading-zeros")]
    UnknownRanking(String),
}

/// Decides which of two addresses is preferable.
///
/// A candidate improves on the current best when its key is strictly smaller.
pub(super) trait Ranking: Sync {
    /// Sort key for an address. Smaller is better.
    type Key: Ord + Send;

    fn key(&self, address: &Address) -> Self::Key;
}

/// Lexicographically smallest EIP-55 checksummed string.
///
/// Digits sort before upper-case letters, which sort before lower-case ones,
/// so the checksum casing takes part in the ordering.
#[derive(Debug, Clone, Copy, Default)]
pub(super) struct LowestHex;

impl Ranking for LowestHex {
    type Key = String;

    fn key(&self, address: &Address) -> String {
        address.to_checksum(None)
    }
}

/// Numerically smallest 160-bit value.
#[derive(Debug, Clone, Copy, Default)]
pub(super) struct Numeric;

impl Ranking for Numeric {
    type Key = Address;

    fn key(&self, address: &Address) -> Address {
        *address
    }
}

/// Most leading zero bits.
#[derive(Debug, Clone, Copy, Default)]
pub(super) struct LeadingZeros;

impl Ranking for LeadingZeros {
    type Key = Reverse<u32>;

    fn key(&self, address: &Address) -> Reverse<u32> {
        let mut zeros = 0;
        for byte in address.as_slice() {
            zeros += byte.leading_zeros();
            if *byte != 0 {
                break;
            }
        }
        Reverse(zeros)
    }
}

/// Ranking selected by name on the command line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub(super) enum RankingKind {
    #[default]
    LowestHex,
    Numeric,
    LeadingZeros,
}

impl FromStr for RankingKind {
    type Err = MineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "lowest-hex" => Ok(Self::LowestHex),
            "numeric" => Ok(Self::Numeric),
            "leading-zeros" => Ok(Self::LeadingZeros),
            other => Err(MineError::UnknownRanking(other.to_owned())),
        }
    }
}

impl fmt::Display for RankingKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::LowestHex => "lowest-hex",
            Self::Numeric => "numeric",
            Self::LeadingZeros => "leading-zeros",
        })
    }
}

/// Limits of a mining session.
#[derive(Debug, Clone, Copy, PartialEq)]
pub(super) struct MiningBudget {
    /// Wall-clock time after which the session stops.
    pub(super) limit: Duration,
    /// Interval between progress events; also the cooperative yield point.
    pub(super) log_interval: Duration,
    /// Optional cap on the number of salts tried.
    pub(super) max_attempts: Option<u64>,
}

impl Default for MiningBudget {
    fn default() -> Self {
        Self {
            limit: Duration::from_secs(6),
            log_interval: Duration::from_secs(2),
            max_attempts: None,
        }
    }
}

impl MiningBudget {
    /// Builds a budget from operator-supplied seconds.
    pub(super) fn from_secs(
        limit: f64,
        log_interval: f64,
        max_attempts: Option<u64>,
    ) -> Result<Self, MineError> {
        let limit = Duration::try_from_secs_f64(limit).map_err(|_| MineError::InvalidDuration {
            what: "time limit",
            value: limit,
        })?;
        let log_interval = Duration::try_from_secs_f64(log_interval).map_err(|_| {
            MineError::InvalidDuration {
                what: "log interval",
                value: log_interval,
            }
        })?;
        if log_interval.is_zero() {
            return Err(MineError::ZeroLogInterval);
        }
        Ok(Self {
            limit,
            log_interval,
            max_attempts,
        })
    }
}

/// Cooperative cancellation flag shared between a miner and whoever stops it.
#[derive(Debug, Clone, Default)]
pub(super) struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub(super) fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub(super) fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

/// Something that happened during a mining session.
#[derive(Debug, Clone, PartialEq)]
pub(super) enum MiningEvent {
    /// A salt produced a better address than every salt before it.
    NewBest {
        session: usize,
        attempt: u64,
        address: Address,
        salt: B256,
    },
    /// Periodic throughput report.
    Progress {
        session: usize,
        attempts: u64,
        elapsed: Duration,
        /// Attempts per second since the run started.
        rate: f64,
        best: Option<Address>,
    },
}

/// Receives mining events. Shared by all sessions of a parallel run.
pub(super) trait MiningObserver: Sync {
    fn on_event(&self, event: &MiningEvent);
}

/// Observer that reports events through `tracing`.
#[derive(Debug, Clone, Copy, Default)]
pub(super) struct LogObserver;

impl MiningObserver for LogObserver {
    fn on_event(&self, event: &MiningEvent) {
        match event {
            MiningEvent::NewBest {
                session,
                attempt,
                address,
                salt,
            } => tracing::info!(session, attempt, %address, %salt, "new best"),
            MiningEvent::Progress {
                session,
                attempts,
                elapsed,
                rate,
                best,
            } => tracing::info!(
                session,
                attempts,
                elapsed_s = elapsed.as_secs_f64(),
                rate = rate.round() as u64,
                best = ?best,
                "mining"
            ),
        }
    }
}

/// Outcome of one or more mining sessions.
#[derive(Debug, Clone, PartialEq)]
pub(super) struct MiningResult {
    pub(super) best: Option<(Address, B256)>,
    pub(super) attempts: u64,
    pub(super) elapsed: Duration,
    pub(super) cancelled: bool,
}

impl MiningResult {
    /// Attempts per second over the whole run.
    pub(super) fn rate(&self) -> f64 {
        rate(self.attempts, self.elapsed)
    }
}

/// Wall clock shared by every session of one run.
#[derive(Debug, Clone, Copy)]
struct Clock {
    start: Instant,
    /// `None` when the limit is too far out to represent.
    deadline: Option<Instant>,
}

impl Clock {
    fn starting_now(limit: Duration) -> Self {
        let start = Instant::now();
        Self {
            start,
            deadline: start.checked_add(limit),
        }
    }

    fn expired(&self, now: Instant) -> bool {
        self.deadline.is_some_and(|deadline| now >= deadline)
    }
}

/// Mutable state of a single session, owned by the loop that runs it.
struct MiningSession<K> {
    best: Option<(Address, B256, K)>,
    attempts: u64,
    last_log: Instant,
    cancelled: bool,
}

/// Searches random salts for the best CREATE2 address under a [`Ranking`].
///
/// Each session is single-threaded and draws fresh 32-byte salts until its
/// budget runs out or it is cancelled. Sessions share only the run's clock, so
/// [`Create2Miner::mine_parallel`] simply runs several and keeps the best.
#[derive(Debug, Clone, Copy)]
pub(super) struct Create2Miner<R> {
    /// Address of the deterministic deployer that executes CREATE2
    deployer: Address,
    /// Keccak256 hash of the contract's initialization code
    init_code_hash: B256,
    ranking: R,
}

impl<R: Ranking> Create2Miner<R> {
    pub(super) fn new(deployer: Address, init_code_hash: B256, ranking: R) -> Self {
        Self {
            deployer,
            init_code_hash,
            ranking,
        }
    }

    fn compute_address(&self, salt: &B256) -> Address {
        create2::derive(self.deployer, salt, &self.init_code_hash)
    }

    /// Runs one session on the calling thread.
    ///
    /// Progress is reported every `budget.log_interval`; at that point the
    /// thread yields and the cancellation flag is checked. The deadline is
    /// checked after every attempt, so the session never stops before
    /// `budget.limit` unless cancelled or capped by `max_attempts`.
    pub(super) fn mine<G: Rng>(
        &self,
        rng: &mut G,
        budget: &MiningBudget,
        cancel: &CancelToken,
        observer: &dyn MiningObserver,
        session_id: usize,
    ) -> MiningResult {
        let clock = Clock::starting_now(budget.limit);
        self.mine_until(rng, budget, cancel, observer, session_id, clock)
    }

    /// Runs one session against `clock`, which may have started before this
    /// session got a thread.
    fn mine_until<G: Rng>(
        &self,
        rng: &mut G,
        budget: &MiningBudget,
        cancel: &CancelToken,
        observer: &dyn MiningObserver,
        session_id: usize,
        clock: Clock,
    ) -> MiningResult {
        let mut session = MiningSession::<R::Key> {
            best: None,
            attempts: 0,
            last_log: Instant::now(),
            cancelled: false,
        };

        loop {
            let salt = random_salt(rng);
            let address = self.compute_address(&salt);
            session.attempts += 1;

            let key = self.ranking.key(&address);
            if session.best.as_ref().is_none_or(|(_, _, best)| key < *best) {
                session.best = Some((address, salt, key));
                observer.on_event(&MiningEvent::NewBest {
                    session: session_id,
                    attempt: session.attempts,
                    address,
                    salt,
                });
            }

            let now = Instant::now();
            let mut check_cancel = session.attempts & CANCEL_CHECK_MASK == 0;
            if now.duration_since(session.last_log) >= budget.log_interval {
                let elapsed = now.duration_since(clock.start);
                observer.on_event(&MiningEvent::Progress {
                    session: session_id,
                    attempts: session.attempts,
                    elapsed,
                    rate: rate(session.attempts, elapsed),
                    best: session.best.as_ref().map(|(address, _, _)| *address),
                });
                session.last_log = now;
                std::thread::yield_now();
                check_cancel = true;
            }

            if check_cancel {
                session.cancelled = cancel.is_cancelled();
            }
            if session.cancelled
                || clock.expired(now)
                || budget.max_attempts.is_some_and(|max| session.attempts >= max)
            {
                break;
            }
        }

        MiningResult {
            best: session.best.map(|(address, salt, _)| (address, salt)),
            attempts: session.attempts,
            elapsed: clock.start.elapsed(),
            cancelled: session.cancelled,
        }
    }

    /// Runs `sessions` independent sessions on the rayon pool and reduces
    /// their results: best by ranking, attempts summed.
    ///
    /// All sessions share one deadline, so sessions queued behind a busy pool
    /// do not extend the run. The reported elapsed time is the wall time of
    /// the whole run.
    pub(super) fn mine_parallel(
        &self,
        sessions: usize,
        budget: &MiningBudget,
        cancel: &CancelToken,
        observer: &dyn MiningObserver,
    ) -> Result<MiningResult, MineError> {
        if sessions == 0 {
            return Err(MineError::NoSessions);
        }

        let clock = Clock::starting_now(budget.limit);
        let reduced = (0..sessions)
            .into_par_iter()
            .map(|session| {
                self.mine_until(&mut rand::rng(), budget, cancel, observer, session, clock)
            })
            .reduce_with(|a, b| self.merge(a, b));

        let mut result = reduced.unwrap_or(MiningResult {
            best: None,
            attempts: 0,
            elapsed: Duration::ZERO,
            cancelled: false,
        });
        result.elapsed = clock.start.elapsed();
        Ok(result)
    }

    fn merge(&self, a: MiningResult, b: MiningResult) -> MiningResult {
        let best = match (a.best, b.best) {
            (Some(left), Some(right)) => {
                if self.ranking.key(&right.0) < self.ranking.key(&left.0) {
                    Some(right)
                } else {
                    Some(left)
                }
            }
            (left, right) => left.or(right),
        };
        MiningResult {
            best,
            attempts: a.attempts + b.attempts,
            elapsed: a.elapsed.max(b.elapsed),
            cancelled: a.cancelled || b.cancelled,
        }
    }
}

/// Draws a uniformly random 32-byte salt.
pub(super) fn random_salt<G: Rng>(rng: &mut G) -> B256 {
    let mut salt = B256::ZERO;
    rng.fill(salt.as_mut_slice());
    salt
}

fn rate(attempts: u64, elapsed: Duration) -> f64 {
    let secs = elapsed.as_secs_f64();
    if secs > 0.0 { attempts as f64 / secs } else { 0.0 }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::DETERMINISTIC_DEPLOYER;
    use alloy_primitives::{address, keccak256};
    use rand::{SeedableRng, rngs::StdRng};
    use std::sync::Mutex;

    #[derive(Default)]
    struct Recorder(Mutex<Vec<MiningEvent>>);

    impl MiningObserver for Recorder {
        fn on_event(&self, event: &MiningEvent) {
            self.0.lock().unwrap().push(event.clone());
        }
    }

    impl Recorder {
        fn events(&self) -> Vec<MiningEvent> {
            self.0.lock().unwrap().clone()
        }

        fn progress(&self) -> Vec<(u64, Duration, f64)> {
            self.events()
                .into_iter()
                .filter_map(|event| match event {
                    MiningEvent::Progress {
                        attempts,
                        elapsed,
                        rate,
                        ..
                    } => Some((attempts, elapsed, rate)),
                    MiningEvent::NewBest { .. } => None,
                })
                .collect()
        }
    }

    fn miner<R: Ranking>(ranking: R) -> Create2Miner<R> {
        Create2Miner::new(DETERMINISTIC_DEPLOYER, keccak256([0x60, 0x80]), ranking)
    }

    fn capped(attempts: u64) -> MiningBudget {
        MiningBudget {
            limit: Duration::from_secs(60),
            log_interval: Duration::from_secs(60),
            max_attempts: Some(attempts),
        }
    }

    #[test]
    fn new_best_events_strictly_improve() {
        let miner = miner(LowestHex);
        let recorder = Recorder::default();
        let result = miner.mine(
            &mut StdRng::seed_from_u64(7),
            &capped(5_000),
            &CancelToken::default(),
            &recorder,
            0,
        );

        let bests: Vec<_> = recorder
            .events()
            .into_iter()
            .filter_map(|event| match event {
                MiningEvent::NewBest {
                    attempt, address, ..
                } => Some((attempt, address)),
                MiningEvent::Progress { .. } => None,
            })
            .collect();
        assert!(!bests.is_empty());
        for pair in bests.windows(2) {
            assert!(pair[0].0 < pair[1].0);
            assert!(LowestHex.key(&pair[1].1) < LowestHex.key(&pair[0].1));
        }

        let (address, salt) = result.best.unwrap();
        assert_eq!(address, bests.last().unwrap().1);
        assert_eq!(address, miner.compute_address(&salt));
        assert_eq!(result.attempts, 5_000);
        assert!(!result.cancelled);
    }

    #[test]
    fn seeded_sessions_are_reproducible() {
        let miner = miner(Numeric);
        let run = || {
            miner.mine(
                &mut StdRng::seed_from_u64(99),
                &capped(500),
                &CancelToken::default(),
                &LogObserver,
                0,
            )
        };
        assert_eq!(run().best, run().best);
    }

    #[test]
    fn cancellation_stops_the_session_with_its_best() {
        let cancel = CancelToken::default();
        cancel.cancel();
        let budget = MiningBudget {
            limit: Duration::from_secs(3600),
            log_interval: Duration::from_secs(3600),
            max_attempts: None,
        };
        let result = miner(LowestHex).mine(
            &mut StdRng::seed_from_u64(1),
            &budget,
            &cancel,
            &LogObserver,
            0,
        );
        assert!(result.cancelled);
        assert!(result.best.is_some());
        assert!(result.attempts <= CANCEL_CHECK_MASK + 1);
    }

    #[test]
    fn short_budget_honours_interval_and_deadline() {
        let budget = MiningBudget::from_secs(0.3, 0.1, None).unwrap();
        let recorder = Recorder::default();
        let result = miner(LeadingZeros).mine(
            &mut StdRng::seed_from_u64(3),
            &budget,
            &CancelToken::default(),
            &recorder,
            0,
        );
        assert!(result.elapsed >= budget.limit);
        assert!(result.elapsed < budget.limit + Duration::from_secs(1));

        let progress = recorder.progress();
        assert!(progress.len() >= 2, "{progress:?}");
        let mut previous = Duration::ZERO;
        for (attempts, elapsed, rate) in progress {
            assert!(elapsed - previous >= budget.log_interval);
            assert!((rate - attempts as f64 / elapsed.as_secs_f64()).abs() < 1e-6);
            previous = elapsed;
        }
    }

    #[test]
    fn six_second_budget_reports_at_least_twice() {
        let budget = MiningBudget::from_secs(6.0, 2.0, None).unwrap();
        let recorder = Recorder::default();
        let result = miner(LowestHex).mine(
            &mut rand::rng(),
            &budget,
            &CancelToken::default(),
            &recorder,
            0,
        );
        assert!(result.elapsed >= Duration::from_secs(6));
        assert!(result.elapsed <= Duration::from_secs(8));
        assert!(recorder.progress().len() >= 2);
        assert!(result.rate() > 0.0);
    }

    #[test]
    fn parallel_sessions_reduce_to_the_overall_best() {
        let miner = miner(Numeric);
        let recorder = Recorder::default();
        let result = miner
            .mine_parallel(3, &capped(1_000), &CancelToken::default(), &recorder)
            .unwrap();
        assert_eq!(result.attempts, 3_000);

        let overall = recorder
            .events()
            .into_iter()
            .filter_map(|event| match event {
                MiningEvent::NewBest { address, .. } => Some(address),
                MiningEvent::Progress { .. } => None,
            })
            .min()
            .unwrap();
        assert_eq!(result.best.unwrap().0, overall);

        assert_eq!(
            miner.mine_parallel(0, &capped(1), &CancelToken::default(), &recorder),
            Err(MineError::NoSessions)
        );
    }

    #[test]
    fn queued_sessions_share_the_deadline() {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(1)
            .build()
            .unwrap();
        let budget = MiningBudget::from_secs(0.3, 0.1, None).unwrap();
        let miner = miner(Numeric);

        let started = Instant::now();
        let result = pool
            .install(|| miner.mine_parallel(4, &budget, &CancelToken::default(), &LogObserver))
            .unwrap();
        let wall = started.elapsed();

        // Four sessions on one thread would take four limits back to back.
        assert!(wall < budget.limit * 2, "{wall:?}");
        assert!(result.elapsed >= budget.limit);
        assert!(result.elapsed <= wall);
        assert!(result.attempts >= 4);
        assert!(result.best.is_some());
    }

    #[test]
    fn huge_time_limit_runs_unbounded() {
        let budget = MiningBudget::from_secs(1e19, 2.0, Some(200)).unwrap();
        let result = miner(LowestHex).mine(
            &mut StdRng::seed_from_u64(5),
            &budget,
            &CancelToken::default(),
            &LogObserver,
            0,
        );
        assert_eq!(result.attempts, 200);
        assert!(!result.cancelled);
    }

    #[test]
    fn rankings_order_addresses() {
        let digits = address!("0x0000000000000000000000000000000000000001");
        let letters = address!("0xa000000000000000000000000000000000000000");
        assert!(LowestHex.key(&digits) < LowestHex.key(&letters));
        assert!(Numeric.key(&digits) < Numeric.key(&letters));
        assert_eq!(LeadingZeros.key(&digits), Reverse(159));
        assert_eq!(LeadingZeros.key(&letters), Reverse(0));
        assert!(LeadingZeros.key(&digits) < LeadingZeros.key(&letters));
    }

    #[test]
    fn lowest_hex_compares_checksummed_strings() {
        let address = address!("0x5aaeb6053f3e94c9b9a09f33669435e7ef1beaed");
        assert_eq!(
            LowestHex.key(&address),
            "0x5aAeb6053F3E94C9b9A09f33669435E7Ef1BeAed"
        );
        // Upper-case letters sort before lower-case ones.
        assert!(LowestHex.key(&address) < "0x5aaeb6053f3e94c9b9a09f33669435e7ef1beaed".to_owned());
    }

    #[test]
    fn rejects_malformed_configuration() {
        assert!(matches!(
            MiningBudget::from_secs(-1.0, 2.0, None),
            Err(MineError::InvalidDuration { what: "time limit", .. })
        ));
        assert!(matches!(
            MiningBudget::from_secs(6.0, f64::NAN, None),
            Err(MineError::InvalidDuration { what: "log interval", .. })
        ));
        assert_eq!(
            MiningBudget::from_secs(6.0, 0.0, None),
            Err(MineError::ZeroLogInterval)
        );
        assert_eq!(
            "smallest".parse::<RankingKind>(),
            Err(MineError::UnknownRanking("smallest".into()))
        );
        assert_eq!("leading-zeros".parse(), Ok(RankingKind::LeadingZeros));
        assert_eq!(RankingKind::default().to_string(), "lowest-hex");
    }
}
